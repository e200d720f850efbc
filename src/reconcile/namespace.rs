use crate::context::Context;
use crate::error::ReconcileError;
use crate::k8s_types::{self, K8sType};
use crate::labels::LabelDiff;
use crate::reconcile::{Outcome, Reconciler, SkipReason};
use crate::resource::{Namespace, Resource, ResourceKey};
use crate::snapshot::LastAppliedSnapshot;
use crate::store::{self, ResourceStore};

use async_trait::async_trait;

use std::sync::Arc;

/// Logs how the labels of a Namespace changed since the last reconciliation, then records the
/// current labels and annotations in the last-applied snapshot annotation.
pub struct NamespaceReconciler {
    store: Arc<dyn ResourceStore>,
}

impl NamespaceReconciler {
    pub fn new(store: Arc<dyn ResourceStore>) -> NamespaceReconciler {
        NamespaceReconciler { store }
    }

    async fn fetch(&self, key: &ResourceKey, ctx: &Context) -> Result<Option<Namespace>, ReconcileError> {
        match store::get::<Namespace>(&*self.store, key, ctx).await {
            Ok(ns) => Ok(Some(ns)),
            Err(err) if err.is_not_found() => {
                log::info!(
                    "Namespace '{}' not found, it was probably deleted after the reconcile was triggered",
                    key
                );
                Ok(None)
            }
            Err(err) => {
                log::error!("Failed to get namespace '{}': {}", key, err);
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl Reconciler for NamespaceReconciler {
    fn kind(&self) -> &'static K8sType {
        k8s_types::core::v1::Namespace
    }

    async fn reconcile(&self, key: &ResourceKey, ctx: &Context) -> Result<Outcome, ReconcileError> {
        let mut namespace = match self.fetch(key, ctx).await? {
            Some(ns) => ns,
            None => return Ok(Outcome::Skipped(SkipReason::NotFound)),
        };

        if namespace.is_being_deleted() {
            log::debug!("Namespace '{}' is being deleted, nothing to reconcile", key);
            return Ok(Outcome::Skipped(SkipReason::BeingDeleted));
        }

        let stored_snapshot = match LastAppliedSnapshot::raw(&namespace) {
            Some(raw) => raw.to_owned(),
            None => {
                log::debug!("Namespace '{}' has no last-applied snapshot yet", key);
                return Ok(Outcome::Skipped(SkipReason::NoSnapshot));
            }
        };

        let previous = LastAppliedSnapshot::decode(&stored_snapshot).map_err(|source| {
            log::error!("Failed to decode last-applied snapshot of namespace '{}': {}", key, source);
            ReconcileError::CorruptSnapshot {
                key: key.clone(),
                source,
            }
        })?;

        let diff = LabelDiff::between(namespace.labels(), previous.labels());
        log_label_diff(key, &diff);

        let current = LastAppliedSnapshot::of(&namespace);
        let encoded = current.encode().map_err(ReconcileError::Encode)?;
        if encoded == stored_snapshot {
            log::debug!("Last-applied snapshot of namespace '{}' is already up to date", key);
            return Ok(Outcome::Diffed(diff));
        }

        current.apply_to(&mut namespace).map_err(ReconcileError::Encode)?;
        match store::update(&*self.store, &namespace, ctx).await {
            Ok(_) => log::debug!("Updated last-applied snapshot of namespace '{}'", key),
            Err(err) if err.is_not_found() => {
                log::info!(
                    "Namespace '{}' was deleted before its last-applied snapshot could be updated",
                    key
                );
                return Ok(Outcome::Skipped(SkipReason::NotFound));
            }
            Err(err) => {
                log::warn!("Failed to update last-applied snapshot of namespace '{}': {}", key, err);
                return Err(err.into());
            }
        }

        Ok(Outcome::Diffed(diff))
    }
}

fn log_label_diff(key: &ResourceKey, diff: &LabelDiff) {
    for (label, value) in diff.added.iter() {
        log::info!("Label added on namespace '{}': key: '{}', value: '{}'", key, label, value);
    }
    for (label, change) in diff.updated.iter() {
        log::info!(
            "Label updated on namespace '{}': key: '{}', value: '{}', oldValue: '{}'",
            key,
            label,
            change.new,
            change.old
        );
    }
    for (label, value) in diff.removed.iter() {
        log::info!("Label removed on namespace '{}': key: '{}', value: '{}'", key, label, value);
    }
}
