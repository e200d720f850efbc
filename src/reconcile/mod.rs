//! Reconcilers re-derive the side effects for a single resource key from the current state in
//! the store. They hold no state between invocations, so running one twice for the same key,
//! or for events that arrive out of order, is always safe.
mod namespace;
mod test_resource;

pub use self::namespace::NamespaceReconciler;
pub use self::test_resource::{TestResourceReconciler, MANAGED_BY_LABEL, TEST_NAME_LABEL};

use crate::context::Context;
use crate::error::ReconcileError;
use crate::k8s_types::K8sType;
use crate::labels::LabelDiff;
use crate::resource::ResourceKey;

use async_trait::async_trait;

use std::fmt::{self, Display};

/// Why a reconcile finished without doing anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The resource was deleted before it could be read
    NotFound,
    /// The resource has a deletion marker
    BeingDeleted,
    /// The namespace has no last-applied snapshot to compare against
    NoSnapshot,
    /// The companion namespace already exists
    CompanionExists,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SkipReason::NotFound => "resource not found",
            SkipReason::BeingDeleted => "resource is being deleted",
            SkipReason::NoSnapshot => "no last-applied snapshot",
            SkipReason::CompanionExists => "companion already exists",
        };
        f.write_str(s)
    }
}

/// Result of a successful reconcile
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Labels were compared against the snapshot, and the snapshot was brought up to date
    Diffed(LabelDiff),
    /// A dependent resource was created
    Created(ResourceKey),
    Skipped(SkipReason),
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Diffed(diff) => write!(f, "diffed labels: {}", diff),
            Outcome::Created(key) => write!(f, "created '{}'", key),
            Outcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// The kind of resource whose events this reconciler handles
    fn kind(&self) -> &'static K8sType;

    /// Reconciles the resource with the given key. Any error that's returned is classified by
    /// `ReconcileError::kind`, and it's up to the caller to decide whether to retry.
    async fn reconcile(&self, key: &ResourceKey, ctx: &Context) -> Result<Outcome, ReconcileError>;
}
