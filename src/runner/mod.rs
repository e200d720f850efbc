//! The runner pulls events from an `EventSource` and dispatches each key to the `Reconciler`
//! that's registered for its kind. Keys are de-duplicated while they wait, reconciles of the
//! same key never overlap, and at most `max_concurrent_reconciles` run at once. Retryable
//! failures are re-queued with a per-key exponential backoff. Permanent failures are logged,
//! and the key waits for the next event.
pub mod client;
pub mod event;
pub mod metrics;
mod queue;
mod server;

#[cfg(feature = "testkit")]
pub mod testkit;

use crate::config::{ClientConfig, OperatorConfig};
use crate::context::Context;
use crate::error::{ErrorKind, ReconcileError};
use crate::k8s_types::K8sType;
use crate::reconcile::{NamespaceReconciler, Outcome, Reconciler, TestResourceReconciler};
use crate::resource::ResourceKey;
use crate::store::api_server::ApiServerStore;
use crate::store::ResourceStore;

use self::client::Client;
use self::event::{Event, EventSource};
use self::metrics::Metrics;
use self::queue::WorkQueue;

use futures_util::FutureExt;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Counters for a single call to `Operator::run`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub events: usize,
    pub reconciled: usize,
    pub failed: usize,
    pub retried: usize,
}

#[derive(Debug)]
struct Completion {
    event: Event,
    result: Result<Outcome, ReconcileError>,
}

pub struct Operator {
    config: OperatorConfig,
    reconcilers: HashMap<&'static K8sType, Arc<dyn Reconciler>>,
    metrics: Arc<Metrics>,
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Operator")
            .field("config", &self.config)
            .field("kinds", &self.reconcilers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Operator {
    /// Creates an operator with the Namespace and Test reconcilers registered, both using the
    /// given store
    pub fn new(config: OperatorConfig, store: Arc<dyn ResourceStore>) -> Operator {
        Operator::with_metrics(config, store, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(config: OperatorConfig, store: Arc<dyn ResourceStore>, metrics: Arc<Metrics>) -> Operator {
        let operator_name = config.operator_name.clone();
        Operator::empty(config, metrics)
            .with_reconciler(NamespaceReconciler::new(store.clone()))
            .with_reconciler(TestResourceReconciler::new(store, operator_name))
    }

    /// An operator without any reconcilers
    pub fn empty(config: OperatorConfig, metrics: Arc<Metrics>) -> Operator {
        Operator {
            config,
            reconcilers: HashMap::new(),
            metrics,
        }
    }

    /// Registers the reconciler for its kind, replacing any previous one
    pub fn with_reconciler(mut self, reconciler: impl Reconciler) -> Self {
        let kind = reconciler.kind();
        if self.reconcilers.insert(kind, Arc::new(reconciler)).is_some() {
            log::warn!("Replaced the reconciler for {}", kind);
        }
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn reconciler_for(&self, kind: &'static K8sType) -> Result<Arc<dyn Reconciler>, ReconcileError> {
        self.reconcilers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ReconcileError::UnknownKind(kind.to_string()))
    }

    /// Runs a single reconcile of the key, outside of the queue
    pub async fn reconcile(&self, kind: &'static K8sType, key: &ResourceKey) -> Result<Outcome, ReconcileError> {
        let reconciler = self.reconciler_for(kind)?;
        let ctx = Context::background().with_timeout(self.config.reconcile_timeout);
        invoke(reconciler, &Event::new(kind, key.clone()), ctx, &self.metrics).await
    }

    /// Processes events until the event source is exhausted or `shutdown` is cancelled.
    ///
    /// Once the source is exhausted, keys that are already queued or in flight are still
    /// reconciled, but pending retries and resyncs are dropped. Cancelling `shutdown` cancels
    /// the contexts of all in-flight reconciles and drops everything that's queued.
    pub async fn run<S: EventSource>(&self, mut events: S, shutdown: CancellationToken) -> RunStats {
        let mut queue = WorkQueue::new(self.config.backoff.clone());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let abort = CancellationToken::new();
        let mut stats = RunStats::default();
        let mut source_done = false;

        log::info!(
            "Starting operator '{}' for {} kinds with at most {} concurrent reconciles",
            self.config.operator_name,
            self.reconcilers.len(),
            self.config.max_concurrent_reconciles
        );

        loop {
            while queue.in_flight_count() < self.config.max_concurrent_reconciles {
                match queue.pop(Instant::now()) {
                    Some(event) => self.spawn_reconcile(event, &abort, &done_tx),
                    None => break,
                }
            }
            self.metrics.set_queue_depth(queue.len());

            if source_done && queue.is_drained() {
                break;
            }

            // due keys are only promoted by `pop`, so a saturated pool must wait for a completion
            let saturated = queue.in_flight_count() >= self.config.max_concurrent_reconciles;
            let deadline = if source_done || saturated { None } else { queue.next_deadline() };
            let delayed = async move {
                match deadline {
                    Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
                    None => futures_util::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::info!(
                        "Shutdown requested, cancelling {} in-flight reconciles and dropping {} queued keys",
                        queue.in_flight_count(),
                        queue.len()
                    );
                    abort.cancel();
                    break;
                }
                Some(done) = done_rx.recv() => {
                    self.complete(&mut queue, &mut stats, done, !source_done);
                }
                next = events.next_event(), if !source_done => match next {
                    Some(event) => self.accept(&mut queue, &mut stats, event),
                    None => {
                        source_done = true;
                        let dropped = queue.clear_delayed();
                        log::info!(
                            "Event source is exhausted, draining {} in-flight and queued keys, dropping {} delayed keys",
                            queue.in_flight_count() + queue.len(),
                            dropped
                        );
                    }
                },
                _ = delayed => {}
            }
        }

        while queue.in_flight_count() > 0 {
            match done_rx.recv().await {
                Some(done) => self.complete(&mut queue, &mut stats, done, false),
                None => break,
            }
        }
        self.metrics.set_queue_depth(0);
        log::info!("Operator '{}' stopped: {:?}", self.config.operator_name, stats);
        stats
    }

    fn accept(&self, queue: &mut WorkQueue, stats: &mut RunStats, event: Event) {
        stats.events += 1;
        self.metrics.event_received();
        if !self.reconcilers.contains_key(&event.kind) {
            let err = ReconcileError::UnknownKind(event.kind.to_string());
            self.metrics.reconcile_failed(event.kind, err.kind());
            log::error!("Dropping event for {} with {} error: {}", event, err.kind(), err);
            return;
        }
        if queue.add(event.clone()) {
            log::debug!("Queued {}", event);
        }
    }

    fn spawn_reconcile(&self, event: Event, abort: &CancellationToken, done_tx: &mpsc::UnboundedSender<Completion>) {
        let reconciler = match self.reconciler_for(event.kind) {
            Ok(r) => r,
            Err(err) => {
                let _ = done_tx.send(Completion { event, result: Err(err) });
                return;
            }
        };
        let ctx = Context::new(abort.child_token()).with_timeout(self.config.reconcile_timeout);
        let metrics = self.metrics.clone();
        let done_tx = done_tx.clone();
        log::debug!("Starting reconcile of {}", event);
        tokio::spawn(async move {
            let result = invoke(reconciler, &event, ctx, &metrics).await;
            let _ = done_tx.send(Completion { event, result });
        });
    }

    fn complete(&self, queue: &mut WorkQueue, stats: &mut RunStats, done: Completion, schedule: bool) {
        let Completion { event, result } = done;
        let requeued = queue.done(&event);
        if requeued {
            log::debug!("{} changed while it was being reconciled, queued it again", event);
        }

        match result {
            Ok(outcome) => {
                stats.reconciled += 1;
                queue.forget(&event);
                log::info!("Reconciled {}: {}", event, outcome);
                if let (Some(period), true, false) = (self.config.resync_period, schedule, requeued) {
                    queue.add_after(event, period);
                }
            }
            Err(err) => {
                stats.failed += 1;
                match err.kind() {
                    ErrorKind::Retryable if requeued => {
                        log::warn!(
                            "Reconcile of {} failed with {} error, it's already queued again: {}",
                            event,
                            err.kind(),
                            err
                        );
                    }
                    ErrorKind::Retryable if schedule => {
                        let delay = queue.retry(event.clone());
                        stats.retried += 1;
                        log::warn!(
                            "Reconcile of {} failed with {} error, retrying in {}ms: {}",
                            event,
                            err.kind(),
                            delay.as_millis(),
                            err
                        );
                    }
                    ErrorKind::Retryable => {
                        log::warn!(
                            "Reconcile of {} failed with {} error while stopping, not retrying: {}",
                            event,
                            err.kind(),
                            err
                        );
                    }
                    ErrorKind::Permanent => {
                        queue.forget(&event);
                        log::error!("Reconcile of {} failed with {} error: {}", event, err.kind(), err);
                    }
                }
            }
        }
    }
}

async fn invoke(
    reconciler: Arc<dyn Reconciler>,
    event: &Event,
    ctx: Context,
    metrics: &Metrics,
) -> Result<Outcome, ReconcileError> {
    let timer = metrics.reconcile_started(event.kind);
    let result = AssertUnwindSafe(reconciler.reconcile(&event.key, &ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(ReconcileError::Panicked(panic_message(panic.as_ref()))));
    timer.observe_duration();

    match result.as_ref() {
        Ok(Outcome::Diffed(diff)) => metrics.labels_changed(diff),
        Err(err) => metrics.reconcile_failed(event.kind, err.kind()),
        Ok(_) => {}
    }
    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// A handle to a running operator. Dropping the handle shuts the operator down.
pub struct OperatorHandle {
    shutdown: CancellationToken,
    join: Option<JoinHandle<RunStats>>,
}

impl Drop for OperatorHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl OperatorHandle {
    pub fn shutdown_now(&self) {
        self.shutdown.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Waits for the operator to stop, either because the event source was exhausted or
    /// because it was shut down
    pub async fn stopped(mut self) -> RunStats {
        match self.join.take() {
            Some(join) => join.await.unwrap_or_else(|err| {
                log::error!("Operator task failed: {}", err);
                RunStats::default()
            }),
            None => RunStats::default(),
        }
    }
}

/// Spawns the operator onto the runtime, along with the metrics and health server if it's
/// enabled, and returns immediately
pub fn start_operator<S>(runtime: &Runtime, operator: Operator, events: S) -> OperatorHandle
where
    S: EventSource + 'static,
{
    let shutdown = CancellationToken::new();
    let server_shutdown = CancellationToken::new();

    let config = operator.config();
    if config.server_enabled() {
        runtime.spawn(server::start(
            config.server_port,
            operator.metrics().clone(),
            config.expose_metrics,
            config.expose_health,
            server_shutdown.clone(),
        ));
    }

    let token = shutdown.clone();
    let join = runtime.spawn(async move {
        let stats = operator.run(events, token).await;
        server_shutdown.cancel();
        stats
    });
    OperatorHandle {
        shutdown,
        join: Some(join),
    }
}

/// Runs the operator against the api server, using the service account or kubeconfig
/// credentials. Blocks the current thread until the event source is exhausted.
pub fn run_operator<S>(config: OperatorConfig, events: S) -> Result<RunStats, anyhow::Error>
where
    S: EventSource + 'static,
{
    let client_config = ClientConfig::load(config.operator_name.as_str())?;
    run_operator_with_client_config(config, client_config, events)
}

pub fn run_operator_with_client_config<S>(
    config: OperatorConfig,
    client_config: ClientConfig,
    events: S,
) -> Result<RunStats, anyhow::Error>
where
    S: EventSource + 'static,
{
    let metrics = Arc::new(Metrics::new());
    let client = Client::new(client_config, metrics.client_metrics())?;
    let store: Arc<dyn ResourceStore> = Arc::new(ApiServerStore::new(client));
    let operator = Operator::with_metrics(config, store, metrics);

    let runtime = Runtime::new()?;
    let handle = start_operator(&runtime, operator, events);
    let stats = runtime.block_on(handle.stopped());
    log::warn!("Operator stopped, shutting down runtime");
    Ok(stats)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::k8s_types::core::v1::Namespace as NamespaceType;
    use crate::k8s_types::demo_com_example::v1alpha1::Test as TestType;
    use crate::resource::{Namespace, TestResource};
    use crate::runner::event::event_channel;
    use crate::store::memory::{InMemoryStore, InjectedFailure, Operation};
    use crate::store;

    use async_trait::async_trait;

    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn config() -> OperatorConfig {
        OperatorConfig::new("test-operator")
            .backoff(BackoffConfig::fixed_interval(Duration::from_millis(10)))
            .expose_metrics(false)
            .expose_health(false)
    }

    async fn create<R: crate::resource::Resource>(store: &InMemoryStore, resource: R) {
        store::create(store, &resource, &Context::background()).await.unwrap();
    }

    #[tokio::test]
    async fn reconciles_every_event_until_the_source_is_exhausted() {
        let _ = env_logger::try_init();
        let store = Arc::new(InMemoryStore::new());
        create(&*store, TestResource::new("alpha", "alpha", 1)).await;
        create(&*store, TestResource::new("beta", "beta", 2)).await;
        let operator = Operator::new(config(), store.clone());

        let (tx, rx) = event_channel(16);
        for name in &["alpha", "beta", "alpha"] {
            tx.send(Event::new(TestType, ResourceKey::new(*name, *name))).await.unwrap();
        }
        drop(tx);

        let stats = operator.run(rx, CancellationToken::new()).await;

        assert_eq!(3, stats.events);
        assert_eq!(0, stats.failed);
        assert!(stats.reconciled >= 2);
        assert_eq!(2, store.count(NamespaceType));
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_with_backoff() {
        let _ = env_logger::try_init();
        let store = Arc::new(InMemoryStore::new());
        create(&*store, TestResource::new("alpha", "alpha", 1)).await;
        store.fail_next(Operation::Create, InjectedFailure::Unavailable);
        store.fail_next(Operation::Create, InjectedFailure::Unavailable);
        let operator = Operator::new(config(), store.clone());

        let (tx, rx) = event_channel(16);
        tx.send(Event::new(TestType, ResourceKey::new("alpha", "alpha"))).await.unwrap();
        let shutdown = CancellationToken::new();
        let run = operator.run(rx, shutdown.clone());
        let stop = async {
            while store.count(NamespaceType) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            // keep the sender alive until the retry succeeded
            drop(tx);
        };
        let (stats, _) = tokio::time::timeout(Duration::from_secs(5), futures_util::future::join(run, stop))
            .await
            .expect("operator did not finish");

        assert_eq!(2, stats.failed);
        assert_eq!(2, stats.retried);
        assert_eq!(1, stats.reconciled);
        assert_eq!(1, store.count(NamespaceType));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let _ = env_logger::try_init();
        let store = Arc::new(InMemoryStore::new());
        create(&*store, TestResource::new("alpha", "Not.Valid", 1)).await;
        let operator = Operator::new(config(), store.clone());

        let (tx, rx) = event_channel(4);
        tx.send(Event::new(TestType, ResourceKey::new("alpha", "Not.Valid"))).await.unwrap();
        drop(tx);

        let stats = operator.run(rx, CancellationToken::new()).await;

        assert_eq!(1, stats.failed);
        assert_eq!(0, stats.retried);
        assert_eq!(0, store.count(NamespaceType));
    }

    #[tokio::test]
    async fn events_for_unknown_kinds_are_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let operator = Operator::empty(config(), Arc::new(Metrics::new()))
            .with_reconciler(NamespaceReconciler::new(store));

        let (tx, rx) = event_channel(4);
        tx.send(Event::new(TestType, ResourceKey::new("a", "a"))).await.unwrap();
        drop(tx);
        let stats = operator.run(rx, CancellationToken::new()).await;

        assert_eq!(1, stats.events);
        assert_eq!(0, stats.reconciled);
        assert!(matches!(
            operator.reconcile(TestType, &ResourceKey::new("a", "a")).await,
            Err(ReconcileError::UnknownKind(_))
        ));
    }

    /// Records the maximum number of concurrent invocations, and whether any key was ever
    /// reconciled concurrently with itself
    struct Probe {
        active: Mutex<HashSet<ResourceKey>>,
        current: AtomicUsize,
        max_seen: AtomicUsize,
        overlapped: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reconciler for Arc<Probe> {
        fn kind(&self) -> &'static K8sType {
            NamespaceType
        }

        async fn reconcile(&self, key: &ResourceKey, _ctx: &Context) -> Result<Outcome, ReconcileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.active.lock().unwrap().insert(key.clone()) {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.active.lock().unwrap().remove(key);
            Ok(Outcome::Skipped(crate::reconcile::SkipReason::NotFound))
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded_and_keys_never_overlap() {
        let probe = Arc::new(Probe {
            active: Mutex::new(HashSet::new()),
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            overlapped: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let operator = Operator::empty(config().max_concurrent_reconciles(2), Arc::new(Metrics::new()))
            .with_reconciler(probe.clone());

        let (tx, rx) = event_channel(64);
        let producer = async move {
            for round in 0..3 {
                for name in &["a", "b", "c", "d"] {
                    tx.send(Event::new(NamespaceType, ResourceKey::cluster_scoped(*name)))
                        .await
                        .unwrap();
                }
                if round < 2 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };
        let (stats, _) = futures_util::future::join(operator.run(rx, CancellationToken::new()), producer).await;

        assert_eq!(12, stats.events);
        assert!(probe.max_seen.load(Ordering::SeqCst) <= 2);
        assert_eq!(0, probe.overlapped.load(Ordering::SeqCst));
        // duplicates are collapsed, but every key is reconciled at least once
        let calls = probe.calls.load(Ordering::SeqCst);
        assert!(calls >= 4 && calls <= 12, "unexpected number of calls: {}", calls);
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_reconciles() {
        let _ = env_logger::try_init();
        let store = Arc::new(InMemoryStore::new());
        create(&*store, Namespace::new("alpha")).await;
        store.fail_next(Operation::Get, InjectedFailure::Hang);
        let operator = Operator::new(config(), store.clone());

        let (tx, rx) = event_channel(4);
        tx.send(Event::new(NamespaceType, ResourceKey::cluster_scoped("alpha"))).await.unwrap();
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let stats = tokio::time::timeout(Duration::from_secs(5), operator.run(rx, shutdown))
            .await
            .expect("operator did not stop");

        assert_eq!(1, stats.failed);
        assert_eq!(0, stats.retried);
        drop(tx);
    }

    /// Counts how often the run loop asks for the next event, then ends at `closes_at`
    struct CountingSource {
        events: VecDeque<Event>,
        polls: Arc<AtomicUsize>,
        closes_at: tokio::time::Instant,
    }

    #[async_trait]
    impl EventSource for CountingSource {
        async fn next_event(&mut self) -> Option<Event> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            tokio::time::sleep_until(self.closes_at).await;
            None
        }
    }

    /// `slow` takes a while to succeed, every other key fails with a retryable error
    struct SlowOrFailing;

    #[async_trait]
    impl Reconciler for SlowOrFailing {
        fn kind(&self) -> &'static K8sType {
            NamespaceType
        }

        async fn reconcile(&self, key: &ResourceKey, _ctx: &Context) -> Result<Outcome, ReconcileError> {
            if key.name() == "slow" {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(Outcome::Skipped(crate::reconcile::SkipReason::NotFound))
            } else {
                Err(ReconcileError::Store(store::StoreError::Unavailable("down".to_owned())))
            }
        }
    }

    #[tokio::test]
    async fn due_retry_does_not_spin_while_all_workers_are_busy() {
        let _ = env_logger::try_init();
        let operator = Operator::empty(config().max_concurrent_reconciles(1), Arc::new(Metrics::new()))
            .with_reconciler(SlowOrFailing);
        let polls = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            events: vec![
                Event::new(NamespaceType, ResourceKey::cluster_scoped("failing")),
                Event::new(NamespaceType, ResourceKey::cluster_scoped("slow")),
            ]
            .into(),
            polls: polls.clone(),
            closes_at: tokio::time::Instant::now() + Duration::from_millis(250),
        };

        let stats = tokio::time::timeout(Duration::from_secs(5), operator.run(source, CancellationToken::new()))
            .await
            .expect("operator did not finish");

        assert_eq!(1, stats.reconciled);
        assert!(stats.failed >= 1);
        let polls = polls.load(Ordering::SeqCst);
        assert!(polls < 50, "run loop went around {} times", polls);
    }

    #[test]
    fn failure_of_a_requeued_key_does_not_schedule_a_retry() {
        let operator = Operator::empty(config(), Arc::new(Metrics::new()));
        let mut queue = WorkQueue::new(BackoffConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            randomization_factor: 0.0,
        });
        let mut stats = RunStats::default();
        let event = Event::new(NamespaceType, ResourceKey::cluster_scoped("alpha"));
        queue.add(event.clone());
        let in_flight = queue.pop(Instant::now()).unwrap();
        // a new event arrives while the reconcile is running
        queue.add(event.clone());

        let failure = ReconcileError::Store(store::StoreError::Unavailable("down".to_owned()));
        let done = Completion {
            event: in_flight,
            result: Err(failure),
        };
        operator.complete(&mut queue, &mut stats, done, true);

        assert_eq!(1, stats.failed);
        assert_eq!(0, stats.retried);
        assert_eq!(None, queue.next_deadline());
        let next = queue.pop(Instant::now()).unwrap();
        assert_eq!(event, next);
        queue.done(&next);
        // the backoff was never advanced
        assert_eq!(Duration::from_millis(100), queue.retry(event));
    }

    #[tokio::test]
    async fn panicking_reconciler_is_reported_as_a_failure() {
        struct Panics;

        #[async_trait]
        impl Reconciler for Panics {
            fn kind(&self) -> &'static K8sType {
                NamespaceType
            }

            async fn reconcile(&self, _key: &ResourceKey, _ctx: &Context) -> Result<Outcome, ReconcileError> {
                panic!("boom")
            }
        }

        let operator = Operator::empty(config(), Arc::new(Metrics::new())).with_reconciler(Panics);
        let err = operator
            .reconcile(NamespaceType, &ResourceKey::cluster_scoped("alpha"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Panicked(ref msg) if msg == "boom"));
        assert!(!err.is_retryable());
    }
}
