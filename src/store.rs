//! The Resource Store is the only shared mutable state that reconcilers touch. It holds the
//! authoritative state of every resource, and is always accessed through a `ResourceStore`
//! trait object that's injected into each reconciler.
//!
//! The trait works on raw json, the same way the api server does, which keeps it object safe.
//! The free functions in this module add typed (de)serialization on top of it.
pub mod api_server;
#[cfg(any(test, feature = "testkit"))]
pub mod memory;

use crate::context::Context;
use crate::k8s_types::K8sType;
use crate::resource::{Resource, ResourceKey};
use crate::runner::client;

use async_trait::async_trait;
use serde_json::Value;

use std::fmt::{self, Display};

#[derive(Debug)]
pub enum StoreError {
    /// The resource does not exist
    NotFound(ResourceKey),
    /// A create was attempted for a key that already exists
    AlreadyExists(ResourceKey),
    /// The resource has been modified since it was read
    Conflict(ResourceKey),
    Cancelled,
    DeadlineExceeded,
    /// The resource returned by the store could not be deserialized
    InvalidResource(serde_json::Error),
    Client(client::Error),
    /// The store refused the request as malformed
    Rejected(String),
    /// Any other store failure, typically the store being unavailable
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Whether retrying the same operation later could possibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StoreError::InvalidResource(_) | StoreError::Rejected(_)
        )
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::NotFound(key) => write!(f, "resource '{}' not found", key),
            StoreError::AlreadyExists(key) => write!(f, "resource '{}' already exists", key),
            StoreError::Conflict(key) => write!(
                f,
                "resource '{}' was modified since it was read",
                key
            ),
            StoreError::Cancelled => f.write_str("operation was cancelled"),
            StoreError::DeadlineExceeded => f.write_str("operation deadline exceeded"),
            StoreError::InvalidResource(e) => write!(f, "invalid resource: {}", e),
            StoreError::Client(e) => write!(f, "client error: {}", e),
            StoreError::Rejected(msg) => write!(f, "request rejected: {}", msg),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::InvalidResource(e) => Some(e as &(dyn std::error::Error + 'static)),
            StoreError::Client(e) => Some(e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<client::Error> for StoreError {
    fn from(e: client::Error) -> StoreError {
        StoreError::Client(e)
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    async fn get(
        &self,
        k8s_type: &'static K8sType,
        key: &ResourceKey,
        ctx: &Context,
    ) -> Result<Value, StoreError>;

    /// Creates the resource and returns it as stored
    async fn create(
        &self,
        k8s_type: &'static K8sType,
        resource: &Value,
        ctx: &Context,
    ) -> Result<Value, StoreError>;

    /// Replaces the resource. If the resource includes a `metadata.resourceVersion`, then the
    /// update must fail with `Conflict` if the stored resource has a different version.
    async fn update(
        &self,
        k8s_type: &'static K8sType,
        resource: &Value,
        ctx: &Context,
    ) -> Result<Value, StoreError>;

    async fn delete(
        &self,
        k8s_type: &'static K8sType,
        key: &ResourceKey,
        ctx: &Context,
    ) -> Result<(), StoreError>;
}

pub async fn get<R: Resource>(
    store: &dyn ResourceStore,
    key: &ResourceKey,
    ctx: &Context,
) -> Result<R, StoreError> {
    let value = store.get(R::k8s_type(), key, ctx).await?;
    serde_json::from_value(value).map_err(StoreError::InvalidResource)
}

pub async fn create<R: Resource>(
    store: &dyn ResourceStore,
    resource: &R,
    ctx: &Context,
) -> Result<R, StoreError> {
    let value = serde_json::to_value(resource).map_err(StoreError::InvalidResource)?;
    let created = store.create(R::k8s_type(), &value, ctx).await?;
    serde_json::from_value(created).map_err(StoreError::InvalidResource)
}

pub async fn update<R: Resource>(
    store: &dyn ResourceStore,
    resource: &R,
    ctx: &Context,
) -> Result<R, StoreError> {
    let value = serde_json::to_value(resource).map_err(StoreError::InvalidResource)?;
    let updated = store.update(R::k8s_type(), &value, ctx).await?;
    serde_json::from_value(updated).map_err(StoreError::InvalidResource)
}
