//! In-memory cluster and tool doubles
//!
//! Useful for unit tests of everything above the cluster boundary
//! without requiring a Kubernetes cluster or helm.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use fleetdeck_core::pod::PodObservation;

use crate::cluster::{
    ClusterApi, EventRecord, NamespaceInfo, PodEvent, PodEventStream, PodFootprint, sort_newest_first,
};
use crate::error::{KubeError, Result};
use crate::tool::{ExternalTool, Invocation, ToolOutput};

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub pod_lists: usize,
    pub namespace_gets: usize,
    pub namespace_deletes: usize,
    pub watches_opened: usize,
    pub watches_closed: usize,
    pub log_reads: usize,
}

/// Scripted outcome of one `watch_pods` call
///
/// Each event replaces the namespace's pods with the paired list just
/// before it is delivered, so phase recomputation sees the new state.
#[derive(Debug, Clone, Default)]
pub struct WatchScript {
    pub events: Vec<(PodEvent, Vec<PodObservation>)>,
    /// Keep the stream open after the last event instead of ending it
    pub hold_open: bool,
    /// Deliver an error after the last event
    pub error: Option<String>,
    /// End with an expired resource version instead of closing
    pub expired: bool,
}

impl WatchScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, event: PodEvent, pods: Vec<PodObservation>) -> Self {
        self.events.push((event, pods));
        self
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn fail_with(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn expire(mut self) -> Self {
        self.expired = true;
        self
    }
}

#[derive(Default)]
struct ClusterState {
    pods: HashMap<String, Vec<PodObservation>>,
    footprints: Vec<PodFootprint>,
    namespaces: BTreeMap<String, NamespaceInfo>,
    node_memory: Option<u64>,
    config_maps: HashMap<(String, String), BTreeMap<String, String>>,
    events: HashMap<String, Vec<EventRecord>>,
    logs: HashMap<(String, String), String>,
    broken_logs: HashSet<(String, String)>,
    unreachable: bool,
    deletion_delay: usize,
    pending_deletions: HashMap<String, usize>,
    watches: VecDeque<WatchScript>,
    watch_versions: Vec<String>,
}

/// In-memory `ClusterApi` for testing
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<RwLock<ClusterState>>,
    operations: Arc<RwLock<OperationCounts>>,
}

impl MockCluster {
    /// Create a new empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    pub fn add_namespace(&self, namespace: NamespaceInfo) {
        self.state
            .write()
            .unwrap()
            .namespaces
            .insert(namespace.name.clone(), namespace);
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.read().unwrap().namespaces.contains_key(name)
    }

    pub fn set_pods(&self, namespace: &str, pods: Vec<PodObservation>) {
        self.state
            .write()
            .unwrap()
            .pods
            .insert(namespace.to_string(), pods);
    }

    pub fn add_footprint(&self, namespace: &str, name: &str, memory_request_bytes: u64) {
        self.state.write().unwrap().footprints.push(PodFootprint {
            namespace: namespace.to_string(),
            name: name.to_string(),
            memory_request_bytes,
        });
    }

    pub fn set_node_memory(&self, bytes: Option<u64>) {
        self.state.write().unwrap().node_memory = bytes;
    }

    pub fn set_config_map(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.state
            .write()
            .unwrap()
            .config_maps
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn add_event(&self, namespace: &str, event: EventRecord) {
        self.state
            .write()
            .unwrap()
            .events
            .entry(namespace.to_string())
            .or_default()
            .push(event);
    }

    pub fn set_logs(&self, namespace: &str, pod: &str, logs: impl Into<String>) {
        self.state
            .write()
            .unwrap()
            .logs
            .insert((namespace.to_string(), pod.to_string()), logs.into());
    }

    /// Make log reads for a pod fail
    pub fn break_logs(&self, namespace: &str, pod: &str) {
        self.state
            .write()
            .unwrap()
            .broken_logs
            .insert((namespace.to_string(), pod.to_string()));
    }

    /// Make every call fail as if the API server were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.write().unwrap().unreachable = unreachable;
    }

    /// Number of lookups a deleted namespace stays `Terminating` for
    pub fn set_deletion_delay(&self, lookups: usize) {
        self.state.write().unwrap().deletion_delay = lookups;
    }

    /// Queue the outcome of the next `watch_pods` call
    pub fn push_watch(&self, script: WatchScript) {
        self.state.write().unwrap().watches.push_back(script);
    }

    /// Resource version each `watch_pods` call started from, in call order
    pub fn watch_resource_versions(&self) -> Vec<String> {
        self.state.read().unwrap().watch_versions.clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state.read().unwrap().unreachable {
            return Err(api_error(503, "ServiceUnavailable", "connection refused"));
        }
        Ok(())
    }
}

/// Build a Kubernetes API error response
pub fn api_error(code: u16, reason: &str, message: &str) -> KubeError {
    KubeError::Api(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

struct WatchGuard(Arc<RwLock<OperationCounts>>);

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Ok(mut ops) = self.0.write() {
            ops.watches_closed += 1;
        }
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodObservation>> {
        self.check_reachable()?;
        self.operations.write().unwrap().pod_lists += 1;
        let state = self.state.read().unwrap();
        Ok(state.pods.get(namespace).cloned().unwrap_or_default())
    }

    async fn list_pods_by_label(&self, namespace: &str, selector: &str) -> Result<Vec<PodObservation>> {
        Ok(self
            .list_pods(namespace)
            .await?
            .into_iter()
            .filter(|p| matches_selector(&p.labels, selector))
            .collect())
    }

    async fn pod_footprints(&self) -> Result<Vec<PodFootprint>> {
        self.check_reachable()?;
        Ok(self.state.read().unwrap().footprints.clone())
    }

    async fn list_namespaces(&self, selector: Option<&str>) -> Result<Vec<NamespaceInfo>> {
        self.check_reachable()?;
        let state = self.state.read().unwrap();
        Ok(state
            .namespaces
            .values()
            .filter(|ns| selector.map(|s| matches_selector(&ns.labels, s)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>> {
        self.check_reachable()?;
        self.operations.write().unwrap().namespace_gets += 1;

        let mut state = self.state.write().unwrap();
        if let Some(remaining) = state.pending_deletions.get_mut(name) {
            if *remaining == 0 {
                state.pending_deletions.remove(name);
                state.namespaces.remove(name);
                state.pods.remove(name);
                return Ok(None);
            }
            *remaining -= 1;
        }
        Ok(state.namespaces.get(name).cloned())
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        self.check_reachable()?;
        self.operations.write().unwrap().namespace_deletes += 1;

        let mut state = self.state.write().unwrap();
        if !state.namespaces.contains_key(name) {
            return Ok(false);
        }
        if state.deletion_delay == 0 {
            state.namespaces.remove(name);
            state.pods.remove(name);
        } else {
            let delay = state.deletion_delay;
            state.pending_deletions.insert(name.to_string(), delay);
            if let Some(ns) = state.namespaces.get_mut(name) {
                ns.phase = Some("Terminating".to_string());
            }
        }
        Ok(true)
    }

    async fn allocatable_memory(&self) -> Result<Option<u64>> {
        self.check_reachable()?;
        Ok(self.state.read().unwrap().node_memory)
    }

    async fn config_map(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        self.check_reachable()?;
        let state = self.state.read().unwrap();
        Ok(state
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_events(&self, namespace: &str, limit: usize) -> Result<Vec<EventRecord>> {
        self.check_reachable()?;
        let mut records = self
            .state
            .read()
            .unwrap()
            .events
            .get(namespace)
            .cloned()
            .unwrap_or_default();
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        _container: Option<&str>,
        tail_lines: i64,
    ) -> Result<String> {
        self.check_reachable()?;
        self.operations.write().unwrap().log_reads += 1;

        let key = (namespace.to_string(), pod.to_string());
        let state = self.state.read().unwrap();
        if state.broken_logs.contains(&key) {
            return Err(api_error(400, "BadRequest", "container is waiting to start"));
        }
        let logs = state.logs.get(&key).cloned().unwrap_or_default();
        let lines: Vec<&str> = logs.lines().collect();
        let start = lines.len().saturating_sub(tail_lines.max(0) as usize);
        Ok(lines[start..].join("\n"))
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        resource_version: &str,
        _timeout_secs: u32,
    ) -> Result<PodEventStream> {
        self.check_reachable()?;
        self.operations.write().unwrap().watches_opened += 1;

        let script = {
            let mut state = self.state.write().unwrap();
            state.watch_versions.push(resource_version.to_string());
            state.watches.pop_front()
        };
        let guard = WatchGuard(self.operations.clone());

        let Some(script) = script else {
            return Ok(stream::pending::<Result<PodEvent>>()
                .map(move |item| {
                    let _guard = &guard;
                    item
                })
                .boxed());
        };

        let state = self.state.clone();
        let namespace = namespace.to_string();
        let events = stream::iter(script.events).map(move |(event, pods)| {
            state.write().unwrap().pods.insert(namespace.clone(), pods);
            Ok(event)
        });
        let tail = match (script.error, script.expired) {
            (Some(message), _) => stream::once(async move { Err(KubeError::Watch(message)) }).boxed(),
            (None, true) => stream::once(async { Err(KubeError::WatchExpired) }).boxed(),
            (None, false) => stream::empty::<Result<PodEvent>>().boxed(),
        };
        let hold = if script.hold_open {
            stream::pending::<Result<PodEvent>>().boxed()
        } else {
            stream::empty::<Result<PodEvent>>().boxed()
        };

        Ok(events
            .chain(tail)
            .chain(hold)
            .map(move |item| {
                let _guard = &guard;
                item
            })
            .boxed())
    }

    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }
}

type Responder = dyn Fn(&Invocation) -> Result<ToolOutput> + Send + Sync;

/// `ExternalTool` that records invocations and answers from a closure
#[derive(Clone)]
pub struct RecordingTool {
    invocations: Arc<Mutex<Vec<Invocation>>>,
    responder: Arc<Responder>,
}

impl RecordingTool {
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Invocation) -> Result<ToolOutput> + Send + Sync + 'static,
    {
        Self {
            invocations: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    /// Every call exits 0 with `stdout`
    pub fn succeeding(stdout: &str) -> Self {
        let stdout = stdout.to_string();
        Self::with_responder(move |_| Ok(ToolOutput::ok(stdout.clone())))
    }

    /// Every call exits with `code` and `stderr`
    pub fn failing(code: i32, stderr: &str) -> Self {
        let stderr = stderr.to_string();
        Self::with_responder(move |_| Ok(ToolOutput::failed(code, stderr.clone())))
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalTool for RecordingTool {
    async fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.invocations.lock().unwrap().push(invocation.clone());
        (self.responder)(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::PodEventKind;
    use fleetdeck_core::pod::PodPhase;

    #[test]
    fn test_selector_matching() {
        let labels = BTreeMap::from([
            ("app".to_string(), "n8n".to_string()),
            ("tier".to_string(), "main".to_string()),
        ]);
        assert!(matches_selector(&labels, "app=n8n"));
        assert!(matches_selector(&labels, "app=n8n, tier=main"));
        assert!(matches_selector(&labels, "tier"));
        assert!(!matches_selector(&labels, "app=redis"));
        assert!(matches_selector(&labels, ""));
    }

    #[tokio::test]
    async fn test_delayed_deletion() {
        let cluster = MockCluster::new();
        cluster.add_namespace(NamespaceInfo::new("demo"));
        cluster.set_deletion_delay(2);

        assert!(cluster.delete_namespace("demo").await.unwrap());
        let ns = cluster.get_namespace("demo").await.unwrap().unwrap();
        assert_eq!(ns.phase.as_deref(), Some("Terminating"));
        assert!(cluster.get_namespace("demo").await.unwrap().is_some());
        assert!(cluster.get_namespace("demo").await.unwrap().is_none());
        assert!(!cluster.delete_namespace("demo").await.unwrap());
    }

    #[tokio::test]
    async fn test_scripted_watch_replaces_pods() {
        let cluster = MockCluster::new();
        let pod = PodObservation::new("postgres-0", PodPhase::Running);
        cluster.push_watch(WatchScript::new().event(
            PodEvent {
                kind: PodEventKind::Added,
                pod: "postgres-0".to_string(),
                status: "Running".to_string(),
                resource_version: Some("7".to_string()),
            },
            vec![pod],
        ));

        let mut watch = cluster.watch_pods("demo", "0", 10).await.unwrap();
        assert!(watch.next().await.unwrap().is_ok());
        assert_eq!(cluster.list_pods("demo").await.unwrap().len(), 1);
        assert!(watch.next().await.is_none());
        drop(watch);

        let counts = cluster.operation_counts();
        assert_eq!(counts.watches_opened, 1);
        assert_eq!(counts.watches_closed, 1);
        assert_eq!(cluster.watch_resource_versions(), vec!["0".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let cluster = MockCluster::new();
        cluster.set_unreachable(true);
        assert!(cluster.ping().await.is_err());
        assert!(cluster.list_pods("demo").await.is_err());
    }

    #[tokio::test]
    async fn test_log_tail() {
        let cluster = MockCluster::new();
        cluster.set_logs("demo", "n8n-0", "a\nb\nc\n");
        assert_eq!(cluster.pod_logs("demo", "n8n-0", None, 2).await.unwrap(), "b\nc");
    }
}
