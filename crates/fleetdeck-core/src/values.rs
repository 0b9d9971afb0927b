//! Typed helm values for a deployment
//!
//! The request carries a tree of optional settings. Unset and empty settings
//! are dropped so the rendered document only overrides what the caller asked
//! for. `rawYaml` is merged on top last and wins over the typed fields.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n8n_config: Option<N8nValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<ReplicasValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_env: Option<BTreeMap<String, String>>,
    /// Free-form YAML merged over everything else; ignored when invalid
    #[serde(default, skip_serializing)]
    pub raw_yaml: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolated: Option<IsolatedDatabase>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsolatedDatabase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageValues>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedisValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct N8nValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<ResourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<ResourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<ResourceSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceAmounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceAmounts>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceAmounts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicasValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceValues {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

impl HelmValues {
    /// Build the values document: typed fields first, then `rawYaml` on top
    pub fn to_document(&self) -> Result<JsonValue> {
        let mut doc = serde_json::to_value(self)?;
        prune_empty(&mut doc);

        if let Some(raw) = self.raw_yaml.as_deref().filter(|r| !r.trim().is_empty()) {
            match serde_yaml::from_str::<JsonValue>(raw) {
                Ok(overlay @ JsonValue::Object(_)) => deep_merge(&mut doc, &overlay),
                Ok(_) => tracing::warn!("rawYaml is not a mapping, ignoring it"),
                Err(e) => tracing::warn!("rawYaml is not valid YAML, ignoring it: {}", e),
            }
        }

        Ok(doc)
    }

    /// Render the values document as YAML, or `None` when nothing is set
    pub fn to_yaml(&self) -> Result<Option<String>> {
        let doc = self.to_document()?;
        match &doc {
            JsonValue::Object(map) if map.is_empty() => Ok(None),
            _ => Ok(Some(serde_yaml::to_string(&doc)?)),
        }
    }
}

/// Recursively merge `overlay` into `base`; overlay wins on conflicts
pub fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Drop nulls, empty strings and objects left empty by doing so
fn prune_empty(value: &mut JsonValue) {
    if let JsonValue::Object(map) = value {
        for child in map.values_mut() {
            prune_empty(child);
        }
        map.retain(|_, v| match v {
            JsonValue::Null => false,
            JsonValue::String(s) => !s.is_empty(),
            JsonValue::Object(m) => !m.is_empty(),
            _ => true,
        });
    }
}
