//! The desired-state snapshot annotation. A Namespace records its own labels and annotations,
//! as they were at the end of the last successful reconciliation, in one of its annotations.
//! The next reconciliation decodes that snapshot and diffs the live labels against it.
//!
//! The encoding has the same shape as a `kubectl apply` last-applied document, so namespaces
//! that were created with `kubectl apply` already carry a usable snapshot. The snapshot never
//! contains the snapshot annotation itself. Otherwise every write would nest the previous
//! snapshot inside the new one, and the annotation would never reach a fixed point.
use crate::resource::{Namespace, StringMap};

use serde::{Deserialize, Serialize};

/// The well-known annotation key that holds the snapshot
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub labels: StringMap,
    #[serde(default)]
    pub annotations: StringMap,
}

/// Labels and annotations of a Namespace as of the last successful reconciliation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastAppliedSnapshot {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: SnapshotMeta,
}

impl LastAppliedSnapshot {
    /// Captures the current labels and annotations of the namespace, leaving out the snapshot
    /// annotation.
    pub fn of(namespace: &Namespace) -> LastAppliedSnapshot {
        let annotations = namespace
            .annotations()
            .iter()
            .filter(|(key, _)| key.as_str() != LAST_APPLIED_ANNOTATION)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        LastAppliedSnapshot {
            api_version: namespace.api_version.clone(),
            kind: namespace.kind.clone(),
            metadata: SnapshotMeta {
                name: namespace.metadata.name.clone(),
                labels: namespace.labels().clone(),
                annotations,
            },
        }
    }

    /// Returns the raw snapshot annotation, or None if it's missing or blank
    pub fn raw(namespace: &Namespace) -> Option<&str> {
        namespace
            .annotations()
            .get(LAST_APPLIED_ANNOTATION)
            .map(String::as_str)
            .filter(|raw| !raw.trim().is_empty())
    }

    pub fn decode(raw: &str) -> Result<LastAppliedSnapshot, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Encodes the snapshot. The output is deterministic, since both maps are sorted.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn labels(&self) -> &StringMap {
        &self.metadata.labels
    }

    pub fn annotations(&self) -> &StringMap {
        &self.metadata.annotations
    }

    /// Writes the encoded snapshot into the namespace's annotations
    pub fn apply_to(&self, namespace: &mut Namespace) -> Result<(), serde_json::Error> {
        let encoded = self.encode()?;
        namespace
            .metadata
            .annotations
            .insert(LAST_APPLIED_ANNOTATION.to_owned(), encoded);
        Ok(())
    }
}
