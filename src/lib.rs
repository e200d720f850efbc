//! A small, level-triggered operator with two reconcilers:
//!
//! - The Namespace reconciler compares the live labels of a Namespace against the labels
//!   recorded in its last-applied snapshot annotation, logs every added, updated and removed
//!   label, and then brings the snapshot up to date.
//! - The Test reconciler makes sure that every `Test` custom resource has a companion Namespace
//!   with the same name.
//!
//! Both reconcilers read and write resources only through a `ResourceStore`, and the `Operator`
//! dispatches keys from an `EventSource` to them with bounded concurrency and per-key retries.
//!
//! ```no_run
//! use namespace_operator::prelude::*;
//!
//! let config = OperatorConfig::new("namespace-operator")
//!     .max_concurrent_reconciles(4)
//!     .expose_metrics(true);
//!
//! // whatever watches the api server sends events into `sender`
//! let (sender, events) = event_channel(1024);
//! # drop(sender);
//!
//! // blocks the current thread until the event source is exhausted
//! let stats = run_operator(config, events).expect("operator failed");
//! println!("reconciled {} keys", stats.reconciled);
//! ```
//!
//! Tests can use the `TestKit` from the `testkit` feature, which runs the operator against an
//! in-memory store instead of a cluster.

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod context;
pub mod error;
pub mod k8s_types;
pub mod labels;
pub mod reconcile;
pub mod resource;
pub mod runner;
pub mod snapshot;
pub mod store;

pub use serde_json;

pub mod prelude {
    pub use crate::config::{BackoffConfig, ClientConfig, OperatorConfig};
    pub use crate::context::Context;
    pub use crate::error::{ErrorKind, ReconcileError};
    pub use crate::k8s_types::{self, K8sType};
    pub use crate::labels::LabelDiff;
    pub use crate::reconcile::{Outcome, Reconciler};
    pub use crate::resource::{Namespace, Resource, ResourceKey, TestResource};
    pub use crate::runner::event::{event_channel, Event, EventSource};
    pub use crate::runner::{run_operator, start_operator, Operator, RunStats};
    pub use crate::snapshot::LastAppliedSnapshot;
    pub use crate::store::{ResourceStore, StoreError};
}
