//! Cluster capability
//!
//! `ClusterApi` is the only way the rest of the crate reads or changes the
//! cluster. `KubeCluster` implements it over a `kube::Client` and translates
//! API objects into plain records; `MockCluster` implements it in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, LogParams, WatchEvent, WatchParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use fleetdeck_core::pod::{ContainerObservation, ContainerState, PodObservation, PodPhase};
use fleetdeck_core::quantity::parse_memory;

use crate::error::{KubeError, Result};

/// Namespace metadata the manager cares about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    /// `Active` or `Terminating`
    pub phase: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NamespaceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            phase: Some("Active".to_string()),
            labels: BTreeMap::new(),
        }
    }

    /// Seconds since creation, 0 when unknown
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.created_at
            .map(|created| (now - created).num_seconds().max(0))
            .unwrap_or(0)
    }
}

/// Memory footprint of one pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodFootprint {
    pub namespace: String,
    pub name: String,
    /// Sum of the memory requests of all containers, in bytes
    pub memory_request_bytes: u64,
}

/// A namespace event, newest first when listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
    /// `Kind/name` of the involved object
    pub object: String,
    pub count: Option<i32>,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Kind of pod change reported by a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PodEventKind {
    Added,
    Modified,
    Deleted,
}

/// One pod change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodEvent {
    #[serde(rename = "type")]
    pub kind: PodEventKind,
    pub pod: String,
    pub status: String,
    /// Where a re-opened watch resumes
    #[serde(skip)]
    pub resource_version: Option<String>,
}

/// Stream of pod changes; ends when the watch times out
pub type PodEventStream = BoxStream<'static, Result<PodEvent>>;

/// Read and write access to the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Pods in a namespace, in API order
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodObservation>>;

    /// Pods in a namespace matching a label selector
    async fn list_pods_by_label(&self, namespace: &str, selector: &str) -> Result<Vec<PodObservation>>;

    /// Memory requests of every pod in every namespace
    async fn pod_footprints(&self) -> Result<Vec<PodFootprint>>;

    /// Namespaces, optionally filtered by label selector
    async fn list_namespaces(&self, selector: Option<&str>) -> Result<Vec<NamespaceInfo>>;

    /// A namespace, or `None` if it does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>>;

    /// Delete a namespace in the foreground; `false` if it did not exist
    async fn delete_namespace(&self, name: &str) -> Result<bool>;

    /// Allocatable memory of the first node, in bytes
    async fn allocatable_memory(&self) -> Result<Option<u64>>;

    /// Data of a config map; empty when the map does not exist
    async fn config_map(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;

    /// Most recent events of a namespace
    async fn list_events(&self, namespace: &str, limit: usize) -> Result<Vec<EventRecord>>;

    /// Tail of a pod's log
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> Result<String>;

    /// Watch pod changes in a namespace for up to `timeout_secs`
    ///
    /// `resource_version` is `"0"` for a fresh watch, which first replays the
    /// existing pods as additions.
    async fn watch_pods(
        &self,
        namespace: &str,
        resource_version: &str,
        timeout_secs: u32,
    ) -> Result<PodEventStream>;

    /// Check the API server is reachable
    async fn ping(&self) -> Result<()>;
}

/// `ClusterApi` backed by a Kubernetes client
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    /// Connect using the in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = kube::Client::try_default().await?;
        Ok(Self { client })
    }

    /// Create with an existing Kubernetes client
    pub fn with_client(client: kube::Client) -> Self {
        Self { client }
    }

    /// Get the underlying Kubernetes client
    pub fn kube_client(&self) -> &kube::Client {
        &self.client
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodObservation>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(observe_pod).collect())
    }

    async fn list_pods_by_label(&self, namespace: &str, selector: &str) -> Result<Vec<PodObservation>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items.iter().map(observe_pod).collect())
    }

    async fn pod_footprints(&self) -> Result<Vec<PodFootprint>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(pod_footprint).collect())
    }

    async fn list_namespaces(&self, selector: Option<&str>) -> Result<Vec<NamespaceInfo>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let mut lp = ListParams::default();
        if let Some(selector) = selector {
            lp = lp.labels(selector);
        }
        let list = namespaces.list(&lp).await?;
        Ok(list.items.iter().map(namespace_info).collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        Ok(namespaces.get_opt(name).await?.as_ref().map(namespace_info))
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.delete(name, &DeleteParams::foreground()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn allocatable_memory(&self) -> Result<Option<u64>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list.items.first().map(|node| {
            node.status
                .as_ref()
                .and_then(|s| s.allocatable.as_ref())
                .and_then(|a| a.get("memory"))
                .map(|q| parse_memory(&q.0))
                .unwrap_or(0)
        }))
    }

    async fn config_map(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match maps.get_opt(name).await {
            Ok(map) => Ok(map.and_then(|m| m.data).unwrap_or_default()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(BTreeMap::new()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn list_events(&self, namespace: &str, limit: usize) -> Result<Vec<EventRecord>> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let list = match events.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(Vec::new()),
            Err(e) => return Err(KubeError::Api(e)),
        };

        let mut records: Vec<EventRecord> = list.items.iter().map(event_record).collect();
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: container.map(str::to_string),
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        Ok(pods.logs(pod, &params).await?)
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        resource_version: &str,
        timeout_secs: u32,
    ) -> Result<PodEventStream> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let wp = WatchParams::default().timeout(timeout_secs);
        let stream = pods.watch(&wp, resource_version).await?;

        Ok(stream
            .filter_map(|event| async move {
                match event {
                    Ok(WatchEvent::Added(pod)) => Some(Ok(pod_event(PodEventKind::Added, &pod))),
                    Ok(WatchEvent::Modified(pod)) => Some(Ok(pod_event(PodEventKind::Modified, &pod))),
                    Ok(WatchEvent::Deleted(pod)) => Some(Ok(pod_event(PodEventKind::Deleted, &pod))),
                    Ok(WatchEvent::Bookmark(_)) => None,
                    Ok(WatchEvent::Error(e)) if e.code == 410 => Some(Err(KubeError::WatchExpired)),
                    Ok(WatchEvent::Error(e)) => Some(Err(KubeError::Watch(e.message))),
                    Err(e) => Some(Err(KubeError::Api(e))),
                }
            })
            .boxed())
    }

    async fn ping(&self) -> Result<()> {
        self.client.apiserver_version().await?;
        Ok(())
    }
}

/// Convert an API pod into an observation
pub fn observe_pod(pod: &Pod) -> PodObservation {
    let status = pod.status.as_ref();
    let containers = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| {
                    let (state, state_detail) = match cs.state.as_ref() {
                        Some(s) if s.running.is_some() => (ContainerState::Running, None),
                        Some(s) if s.waiting.is_some() => (
                            ContainerState::Waiting,
                            s.waiting.as_ref().and_then(|w| w.reason.clone()),
                        ),
                        Some(s) if s.terminated.is_some() => (
                            ContainerState::Terminated,
                            s.terminated.as_ref().and_then(|t| t.reason.clone()),
                        ),
                        _ => (ContainerState::Unknown, None),
                    };
                    ContainerObservation {
                        name: cs.name.clone(),
                        ready: cs.ready,
                        state,
                        state_detail,
                        restart_count: cs.restart_count.max(0) as u32,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    PodObservation {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.as_deref())
            .map(PodPhase::from)
            .unwrap_or_default(),
        containers,
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        created_at: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
    }
}

/// Sum the container memory requests of a pod
pub fn pod_footprint(pod: &Pod) -> PodFootprint {
    let memory_request_bytes = pod
        .spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .filter_map(|c| c.resources.as_ref())
                .filter_map(|r| r.requests.as_ref())
                .filter_map(|requests| requests.get("memory"))
                .map(|q| parse_memory(&q.0))
                .sum()
        })
        .unwrap_or(0);

    PodFootprint {
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        name: pod.metadata.name.clone().unwrap_or_default(),
        memory_request_bytes,
    }
}

fn namespace_info(ns: &Namespace) -> NamespaceInfo {
    NamespaceInfo {
        name: ns.metadata.name.clone().unwrap_or_default(),
        created_at: ns.metadata.creation_timestamp.as_ref().map(|t| t.0),
        phase: ns.status.as_ref().and_then(|s| s.phase.clone()),
        labels: ns.metadata.labels.clone().unwrap_or_default(),
    }
}

fn event_record(event: &Event) -> EventRecord {
    let involved = &event.involved_object;
    EventRecord {
        event_type: event.type_.clone(),
        reason: event.reason.clone(),
        message: event.message.clone(),
        object: format!(
            "{}/{}",
            involved.kind.as_deref().unwrap_or("Unknown"),
            involved.name.as_deref().unwrap_or("")
        ),
        count: event.count,
        first_timestamp: event.first_timestamp.as_ref().map(|t| t.0),
        last_timestamp: event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0)),
    }
}

/// Order events by last occurrence, newest first; undated events go last
pub fn sort_newest_first(records: &mut [EventRecord]) {
    records.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
}

fn pod_event(kind: PodEventKind, pod: &Pod) -> PodEvent {
    PodEvent {
        kind,
        pod: pod.metadata.name.clone().unwrap_or_default(),
        status: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        resource_version: pod.metadata.resource_version.clone(),
    }
}
