//! A synchronous harness for testing the operator end to end against an `InMemoryStore`.
//! Every write to the store publishes an event, and `reconcile_pending` feeds those events
//! through the operator until no new ones are produced.
//!
//! **Only available when the `testkit` feature is enabled**
use crate::config::OperatorConfig;
use crate::context::Context;
use crate::error::ReconcileError;
use crate::k8s_types::{self, K8sType};
use crate::reconcile::Outcome;
use crate::resource::{Namespace, Resource, ResourceKey};
use crate::runner::event::{event_channel, Event, EventReceiver};
use crate::runner::{Operator, RunStats};
use crate::store::memory::{InMemoryStore, InjectedFailure, Operation};
use crate::store::{self, StoreError};

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use std::collections::VecDeque;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use std::time::{Duration, Instant};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
pub struct TestKitError(String);

impl Display for TestKitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TestKitError: {}", self.0)
    }
}

impl std::error::Error for TestKitError {}

pub struct TestKit {
    runtime: Runtime,
    store: Arc<InMemoryStore>,
    events: EventReceiver,
    operator: Operator,
}

impl Debug for TestKit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TestKit")
            .field("store", &self.store)
            .field("operator", &self.operator)
            .finish()
    }
}

impl TestKit {
    pub fn new(config: OperatorConfig) -> Result<TestKit, std::io::Error> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (sender, events) = event_channel(EVENT_BUFFER);
        let store = Arc::new(InMemoryStore::new().with_event_sender(sender));
        let operator = Operator::new(config, store.clone());
        Ok(TestKit {
            runtime,
            store,
            events,
            operator,
        })
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn fail_next(&self, op: Operation, failure: InjectedFailure) {
        self.store.fail_next(op, failure);
    }

    pub fn create_resource<R: Resource>(&mut self, resource: &R) -> Result<R, StoreError> {
        let store = self.store.clone();
        self.runtime
            .block_on(async move { store::create(&*store, resource, &Context::background()).await })
    }

    pub fn update_resource<R: Resource>(&mut self, resource: &R) -> Result<R, StoreError> {
        let store = self.store.clone();
        self.runtime
            .block_on(async move { store::update(&*store, resource, &Context::background()).await })
    }

    /// Returns the current state of the resource, or `None` if it doesn't exist
    pub fn get_resource<R: Resource>(&mut self, key: &ResourceKey) -> Result<Option<R>, StoreError> {
        let store = self.store.clone();
        let result = self
            .runtime
            .block_on(async move { store::get::<R>(&*store, key, &Context::background()).await });
        match result {
            Ok(resource) => Ok(Some(resource)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn get_namespace(&mut self, name: &str) -> Option<Namespace> {
        self.get_resource(&ResourceKey::cluster_scoped(name))
            .unwrap_or_else(|err| panic!("failed to get namespace '{}': {}", name, err))
    }

    /// Runs a single reconcile of the key, without going through the queue
    pub fn reconcile(&mut self, kind: &'static K8sType, key: &ResourceKey) -> Result<Outcome, ReconcileError> {
        let TestKit {
            runtime, operator, ..
        } = self;
        runtime.block_on(operator.reconcile(kind, key))
    }

    /// Feeds every event that the store has published through the operator, repeatedly, until
    /// reconciling no longer produces new events. Returns an error if that doesn't happen
    /// within the timeout.
    pub fn reconcile_pending(&mut self, timeout: Duration) -> Result<RunStats, TestKitError> {
        let deadline = Instant::now() + timeout;
        let mut total = RunStats::default();
        loop {
            let batch = self.take_events();
            if batch.is_empty() {
                return Ok(total);
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| TestKitError(format!("operator did not settle within {:?}", timeout)))?;

            let TestKit {
                runtime, operator, ..
            } = self;
            let run = operator.run(batch, CancellationToken::new());
            let stats = runtime
                .block_on(async { tokio::time::timeout(remaining, run).await })
                .map_err(|_| TestKitError(format!("operator did not settle within {:?}", timeout)))?;

            total.events += stats.events;
            total.reconciled += stats.reconciled;
            total.failed += stats.failed;
            total.retried += stats.retried;
        }
    }

    /// Like `reconcile_pending`, but panics if anything fails
    pub fn reconcile_and_assert_success(&mut self, timeout: Duration) -> RunStats {
        let stats = self
            .reconcile_pending(timeout)
            .unwrap_or_else(|err| panic!("{}", err));
        assert_eq!(0, stats.failed, "expected every reconcile to succeed: {:?}", stats);
        stats
    }

    pub fn assert_namespace_exists(&mut self, name: &str) -> Namespace {
        self.get_namespace(name)
            .unwrap_or_else(|| panic!("expected namespace '{}' to exist", name))
    }

    pub fn assert_namespace_absent(&mut self, name: &str) {
        if let Some(ns) = self.get_namespace(name) {
            panic!("expected namespace '{}' to be absent, but found: {:?}", name, ns);
        }
    }

    pub fn namespace_count(&self) -> usize {
        self.store.count(k8s_types::core::v1::Namespace)
    }

    fn take_events(&mut self) -> VecDeque<Event> {
        let mut batch = VecDeque::new();
        while let Ok(event) = self.events.try_recv() {
            batch.push_back(event);
        }
        batch
    }
}
