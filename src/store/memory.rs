//! An in-process `ResourceStore` that behaves like a tiny api server: resource versions are
//! checked on update, creates of an existing key fail, and deletion can be left pending by
//! setting a deletion marker. Failures can be injected per operation, and every write can be
//! published as an `Event` so the operator sees the same notifications it would get from a
//! watch.
//!
//! **Only available in tests or when the `testkit` feature is enabled**
use crate::context::Context;
use crate::k8s_types::K8sType;
use crate::resource::json_ext::ResourceJson;
use crate::resource::{JsonObject, ResourceKey};
use crate::runner::event::{Event, EventSender};
use crate::store::{ResourceStore, StoreError};

use async_trait::async_trait;
use serde_json::Value;

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Update,
    Delete,
}

/// A failure to return from the next invocation of an `Operation`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Conflict,
    Unavailable,
    /// The operation never completes, so only cancellation or a deadline can end it
    Hang,
}

#[derive(Debug, Default)]
struct StoreState {
    resources: HashMap<(&'static K8sType, ResourceKey), Value>,
    last_version: u64,
    writes: usize,
    failures: HashMap<Operation, VecDeque<InjectedFailure>>,
}

impl StoreState {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    fn take_failure(&mut self, op: Operation) -> Option<InjectedFailure> {
        self.failures.get_mut(&op).and_then(VecDeque::pop_front)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    events: Option<EventSender>,
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }

    /// Publishes an event for every successful create, update and delete
    pub fn with_event_sender(mut self, sender: EventSender) -> InMemoryStore {
        self.events = Some(sender);
        self
    }

    /// Makes the next invocation of `op` fail. Multiple failures for the same operation are
    /// returned in the order they were injected.
    pub fn fail_next(&self, op: Operation, failure: InjectedFailure) {
        self.lock_state()
            .failures
            .entry(op)
            .or_insert_with(VecDeque::new)
            .push_back(failure);
    }

    /// Returns the stored resource without going through a `Context`
    pub fn get_now(&self, k8s_type: &'static K8sType, key: &ResourceKey) -> Option<Value> {
        self.lock_state()
            .resources
            .get(&(k8s_type, key.clone()))
            .cloned()
    }

    pub fn count(&self, k8s_type: &'static K8sType) -> usize {
        self.lock_state()
            .resources
            .keys()
            .filter(|(t, _)| *t == k8s_type)
            .count()
    }

    /// Total number of successful creates, updates and deletes
    pub fn write_count(&self) -> usize {
        self.lock_state().writes
    }

    /// Sets the deletion marker on a resource, as the api server does when deletion has been
    /// requested but finalizers are still pending. Returns false if the resource doesn't exist.
    pub fn mark_deleted(&self, k8s_type: &'static K8sType, key: &ResourceKey) -> bool {
        let marked = {
            let mut state = self.lock_state();
            let version = state.next_version();
            match state.resources.get_mut(&(k8s_type, key.clone())) {
                Some(resource) => {
                    if let Some(meta) = metadata_mut(resource) {
                        meta.insert("deletionTimestamp".to_owned(), Value::from("2022-10-01T00:00:00Z"));
                        meta.insert("resourceVersion".to_owned(), Value::from(version));
                    }
                    true
                }
                None => false,
            }
        };
        if marked {
            self.publish(k8s_type, key);
        }
        marked
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, k8s_type: &'static K8sType, key: &ResourceKey) {
        if let Some(sender) = self.events.as_ref() {
            let event = Event::new(k8s_type, key.clone());
            if let Err(err) = sender.try_send(event) {
                log::warn!("Failed to publish store event for {} '{}': {}", k8s_type, key, err);
            }
        }
    }

    fn injected(&self, op: Operation) -> Option<InjectedFailure> {
        self.lock_state().take_failure(op)
    }

    fn key_of(k8s_type: &'static K8sType, resource: &Value) -> Result<ResourceKey, StoreError> {
        let key = resource
            .get_key_ref()
            .ok_or_else(|| StoreError::Rejected("metadata.name is required".to_owned()))?;
        if k8s_type.namespaced {
            Ok(key.to_owned())
        } else {
            Ok(ResourceKey::cluster_scoped(key.name))
        }
    }

    fn do_get(&self, k8s_type: &'static K8sType, key: &ResourceKey) -> Result<Value, StoreError> {
        self.get_now(k8s_type, key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    fn do_create(&self, k8s_type: &'static K8sType, resource: &Value) -> Result<(Value, ResourceKey), StoreError> {
        let key = InMemoryStore::key_of(k8s_type, resource)?;
        let mut state = self.lock_state();
        let map_key = (k8s_type, key.clone());
        if state.resources.contains_key(&map_key) {
            return Err(StoreError::AlreadyExists(key));
        }

        let mut stored = resource.clone();
        let version = state.next_version();
        let meta = metadata_mut(&mut stored)
            .ok_or_else(|| StoreError::Rejected("metadata is required".to_owned()))?;
        if !k8s_type.namespaced {
            meta.remove("namespace");
        }
        meta.remove("deletionTimestamp");
        meta.insert("resourceVersion".to_owned(), Value::from(version.clone()));
        meta.insert("uid".to_owned(), Value::from(format!("uid-{}", version)));

        state.resources.insert(map_key, stored.clone());
        state.writes += 1;
        Ok((stored, key))
    }

    fn do_update(&self, k8s_type: &'static K8sType, resource: &Value) -> Result<(Value, ResourceKey), StoreError> {
        let key = InMemoryStore::key_of(k8s_type, resource)?;
        let mut state = self.lock_state();
        let map_key = (k8s_type, key.clone());
        let existing = state
            .resources
            .get(&map_key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if let Some(expected) = resource.get_resource_version() {
            if existing.get_resource_version() != Some(expected) {
                return Err(StoreError::Conflict(key));
            }
        }
        let uid = existing.pointer("/metadata/uid").cloned();
        let deletion_timestamp = existing.pointer("/metadata/deletionTimestamp").cloned();

        let mut stored = resource.clone();
        let version = state.next_version();
        let meta = metadata_mut(&mut stored)
            .ok_or_else(|| StoreError::Rejected("metadata is required".to_owned()))?;
        if !k8s_type.namespaced {
            meta.remove("namespace");
        }
        // the deletion marker and uid can't be changed by an update
        meta.remove("deletionTimestamp");
        if let Some(ts) = deletion_timestamp {
            meta.insert("deletionTimestamp".to_owned(), ts);
        }
        if let Some(uid) = uid {
            meta.insert("uid".to_owned(), uid);
        }
        meta.insert("resourceVersion".to_owned(), Value::from(version));

        state.resources.insert(map_key, stored.clone());
        state.writes += 1;
        Ok((stored, key))
    }

    fn do_delete(&self, k8s_type: &'static K8sType, key: &ResourceKey) -> Result<(), StoreError> {
        let mut state = self.lock_state();
        match state.resources.remove(&(k8s_type, key.clone())) {
            Some(_) => {
                state.writes += 1;
                Ok(())
            }
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    /// Turns an injected failure into the error that the operation returns. `Hang` never
    /// resolves, so the context is what ends it.
    async fn fail(&self, failure: InjectedFailure, key: ResourceKey, ctx: &Context) -> StoreError {
        match failure {
            InjectedFailure::Conflict => StoreError::Conflict(key),
            InjectedFailure::Unavailable => StoreError::Unavailable("injected failure".to_owned()),
            InjectedFailure::Hang => {
                let never = futures_util::future::pending::<Result<(), StoreError>>();
                match ctx.run(never).await {
                    Err(err) => err,
                    Ok(()) => StoreError::Unavailable("hung operation completed".to_owned()),
                }
            }
        }
    }
}

fn metadata_mut(resource: &mut Value) -> Option<&mut JsonObject> {
    resource.pointer_mut("/metadata").and_then(Value::as_object_mut)
}

fn key_hint(k8s_type: &'static K8sType, resource: &Value) -> ResourceKey {
    InMemoryStore::key_of(k8s_type, resource).unwrap_or_else(|_| ResourceKey::cluster_scoped(""))
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, k8s_type: &'static K8sType, key: &ResourceKey, ctx: &Context) -> Result<Value, StoreError> {
        ctx.check()?;
        if let Some(failure) = self.injected(Operation::Get) {
            return Err(self.fail(failure, key.clone(), ctx).await);
        }
        self.do_get(k8s_type, key)
    }

    async fn create(&self, k8s_type: &'static K8sType, resource: &Value, ctx: &Context) -> Result<Value, StoreError> {
        ctx.check()?;
        if let Some(failure) = self.injected(Operation::Create) {
            return Err(self.fail(failure, key_hint(k8s_type, resource), ctx).await);
        }
        let (created, key) = self.do_create(k8s_type, resource)?;
        self.publish(k8s_type, &key);
        Ok(created)
    }

    async fn update(&self, k8s_type: &'static K8sType, resource: &Value, ctx: &Context) -> Result<Value, StoreError> {
        ctx.check()?;
        if let Some(failure) = self.injected(Operation::Update) {
            return Err(self.fail(failure, key_hint(k8s_type, resource), ctx).await);
        }
        let (updated, key) = self.do_update(k8s_type, resource)?;
        self.publish(k8s_type, &key);
        Ok(updated)
    }

    async fn delete(&self, k8s_type: &'static K8sType, key: &ResourceKey, ctx: &Context) -> Result<(), StoreError> {
        ctx.check()?;
        if let Some(failure) = self.injected(Operation::Delete) {
            return Err(self.fail(failure, key.clone(), ctx).await);
        }
        self.do_delete(k8s_type, key)?;
        self.publish(k8s_type, key);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::k8s_types::core::v1::Namespace;
    use crate::k8s_types::demo_com_example::v1alpha1::Test;
    use serde_json::json;

    fn namespace(name: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name, "namespace": name }
        })
    }

    #[tokio::test]
    async fn create_assigns_version_and_strips_namespace_for_cluster_scoped_types() {
        let store = InMemoryStore::new();
        let ctx = Context::background();

        let created = store.create(Namespace, &namespace("alpha"), &ctx).await.unwrap();

        assert_eq!(Some("1"), created.get_resource_version());
        assert!(created.pointer("/metadata/namespace").is_none());
        let key = ResourceKey::cluster_scoped("alpha");
        assert_eq!(Some(created), store.get_now(Namespace, &key));
        assert_eq!(1, store.write_count());
    }

    #[tokio::test]
    async fn create_of_existing_key_fails_with_already_exists() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        store.create(Namespace, &namespace("alpha"), &ctx).await.unwrap();

        let err = store.create(Namespace, &namespace("alpha"), &ctx).await.unwrap_err();

        assert!(err.is_already_exists());
        assert_eq!(1, store.count(Namespace));
    }

    #[tokio::test]
    async fn update_with_stale_resource_version_conflicts() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        let mut first = store.create(Namespace, &namespace("alpha"), &ctx).await.unwrap();
        let second = store.update(Namespace, &first, &ctx).await.unwrap();
        assert_eq!(Some("2"), second.get_resource_version());

        first["metadata"]["labels"] = json!({"env": "dev"});
        let err = store.update(Namespace, &first, &ctx).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_preserves_deletion_marker() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        store.create(Namespace, &namespace("alpha"), &ctx).await.unwrap();
        let key = ResourceKey::cluster_scoped("alpha");
        assert!(store.mark_deleted(Namespace, &key));

        let mut current = store.get(Namespace, &key, &ctx).await.unwrap();
        current["metadata"].as_object_mut().unwrap().remove("deletionTimestamp");
        let updated = store.update(Namespace, &current, &ctx).await.unwrap();

        assert!(updated.pointer("/metadata/deletionTimestamp").is_some());
    }

    #[tokio::test]
    async fn get_and_delete_of_missing_resource_is_not_found() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        let key = ResourceKey::new("alpha", "alpha");

        assert!(store.get(Test, &key, &ctx).await.unwrap_err().is_not_found());
        assert!(store.delete(Test, &key, &ctx).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_failures_are_returned_once_in_order() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        store.fail_next(Operation::Create, InjectedFailure::Unavailable);
        store.fail_next(Operation::Create, InjectedFailure::Conflict);

        let first = store.create(Namespace, &namespace("alpha"), &ctx).await.unwrap_err();
        let second = store.create(Namespace, &namespace("alpha"), &ctx).await.unwrap_err();
        let third = store.create(Namespace, &namespace("alpha"), &ctx).await;

        assert!(matches!(first, StoreError::Unavailable(_)));
        assert!(second.is_conflict());
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn hung_operation_ends_at_the_deadline() {
        let store = InMemoryStore::new();
        let ctx = Context::background().with_timeout(std::time::Duration::from_millis(10));
        store.fail_next(Operation::Get, InjectedFailure::Hang);

        let err = store
            .get(Namespace, &ResourceKey::cluster_scoped("alpha"), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn writes_are_published_as_events() {
        let (sender, mut receiver) = crate::runner::event::event_channel(8);
        let store = InMemoryStore::new().with_event_sender(sender);
        let ctx = Context::background();

        store.create(Namespace, &namespace("alpha"), &ctx).await.unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(Event::new(Namespace, ResourceKey::cluster_scoped("alpha")), event);
    }
}
