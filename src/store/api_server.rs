//! `ResourceStore` backed by the Kubernetes api server
use crate::context::Context;
use crate::k8s_types::K8sType;
use crate::resource::json_ext::ResourceJson;
use crate::resource::ResourceKey;
use crate::runner::client::{self, Client};
use crate::store::{ResourceStore, StoreError};

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Create,
    Update,
}

#[derive(Debug, Clone)]
pub struct ApiServerStore {
    client: Client,
}

impl ApiServerStore {
    pub fn new(client: Client) -> ApiServerStore {
        ApiServerStore { client }
    }
}

fn key_of(k8s_type: &K8sType, resource: &Value) -> Result<ResourceKey, StoreError> {
    let key = resource
        .get_key_ref()
        .ok_or_else(|| StoreError::Rejected("metadata.name is required".to_owned()))?;
    if k8s_type.namespaced {
        Ok(key.to_owned())
    } else {
        Ok(ResourceKey::cluster_scoped(key.name()))
    }
}

/// Maps api server responses onto the store's error taxonomy. A 409 means "already exists" for
/// a create, and a resource version conflict for anything else.
fn map_error(err: client::Error, key: &ResourceKey, write: Option<Write>) -> StoreError {
    match err.status().map(|s| s.as_u16()) {
        Some(404) => StoreError::NotFound(key.clone()),
        Some(409) if write == Some(Write::Create) || err.reason() == Some("AlreadyExists") => {
            StoreError::AlreadyExists(key.clone())
        }
        Some(409) => StoreError::Conflict(key.clone()),
        Some(400) | Some(422) => StoreError::Rejected(err.to_string()),
        _ => StoreError::Client(err),
    }
}

#[async_trait]
impl ResourceStore for ApiServerStore {
    async fn get(&self, k8s_type: &'static K8sType, key: &ResourceKey, ctx: &Context) -> Result<Value, StoreError> {
        let op = async {
            self.client
                .get_resource(k8s_type, key)
                .await
                .map_err(|e| map_error(e, key, None))
        };
        ctx.run(op).await
    }

    async fn create(&self, k8s_type: &'static K8sType, resource: &Value, ctx: &Context) -> Result<Value, StoreError> {
        let key = key_of(k8s_type, resource)?;
        let op = async {
            self.client
                .create_resource(k8s_type, resource)
                .await
                .map_err(|e| map_error(e, &key, Some(Write::Create)))
        };
        ctx.run(op).await
    }

    async fn update(&self, k8s_type: &'static K8sType, resource: &Value, ctx: &Context) -> Result<Value, StoreError> {
        let key = key_of(k8s_type, resource)?;
        let op = async {
            self.client
                .replace_resource(k8s_type, &key, resource)
                .await
                .map_err(|e| map_error(e, &key, Some(Write::Update)))
        };
        ctx.run(op).await
    }

    async fn delete(&self, k8s_type: &'static K8sType, key: &ResourceKey, ctx: &Context) -> Result<(), StoreError> {
        let op = async {
            self.client
                .delete_resource(k8s_type, key)
                .await
                .map_err(|e| map_error(e, key, None))
        };
        ctx.run(op).await
    }
}
