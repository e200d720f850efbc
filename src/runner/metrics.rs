use crate::error::ErrorKind;
use crate::k8s_types::K8sType;
use crate::labels::LabelDiff;

use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

use std::fmt::{self, Debug};

const KIND: &[&str] = &["kind"];
const KIND_AND_CLASS: &[&str] = &["kind", "class"];
const CHANGE: &[&str] = &["change"];

/// All of the operator's prometheus metrics, registered in a dedicated `Registry`
pub struct Metrics {
    registry: Registry,
    api_server_request_times: Histogram,
    events_received: IntCounter,
    reconciles_by_kind: IntCounterVec,
    reconcile_errors_by_kind: IntCounterVec,
    reconcile_durations: HistogramVec,
    label_changes: IntCounterVec,
    queue_depth: IntGauge,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Metrics")
    }
}

impl Default for Metrics {
    fn default() -> Metrics {
        Metrics::new()
    }
}

// metric names and label sets are fixed, so registration can only fail on a programming error
impl Metrics {
    pub fn new() -> Metrics {
        let registry = Registry::new();

        let request_time_opts = HistogramOpts::new(
            "api_server_request_time",
            "Total time from sending the request to receiving the response headers",
        )
        .subsystem("client")
        .buckets(exponential_buckets(0.005, 2.0, 12).unwrap());
        let api_server_request_times = Histogram::with_opts(request_time_opts).unwrap();
        registry.register(Box::new(api_server_request_times.clone())).unwrap();

        let events_opts = Opts::new("events_received", "total number of events received from the event source");
        let events_received = IntCounter::with_opts(events_opts).unwrap();
        registry.register(Box::new(events_received.clone())).unwrap();

        let reconcile_opts = Opts::new("reconciles", "number of reconciles started, by kind");
        let reconciles_by_kind = IntCounterVec::new(reconcile_opts, KIND).unwrap();
        registry.register(Box::new(reconciles_by_kind.clone())).unwrap();

        let error_opts = Opts::new(
            "reconcile_errors",
            "number of failed reconciles, by kind and error class",
        );
        let reconcile_errors_by_kind = IntCounterVec::new(error_opts, KIND_AND_CLASS).unwrap();
        registry.register(Box::new(reconcile_errors_by_kind.clone())).unwrap();

        let duration_opts = HistogramOpts::new("reconcile_duration", "time taken by each reconcile, in seconds")
            .buckets(exponential_buckets(0.001, 2.0, 15).unwrap());
        let reconcile_durations = HistogramVec::new(duration_opts, KIND).unwrap();
        registry.register(Box::new(reconcile_durations.clone())).unwrap();

        let label_opts = Opts::new("label_changes", "number of namespace label changes observed, by type of change");
        let label_changes = IntCounterVec::new(label_opts, CHANGE).unwrap();
        registry.register(Box::new(label_changes.clone())).unwrap();

        let queue_opts = Opts::new("queue_depth", "number of keys waiting to be reconciled");
        let queue_depth = IntGauge::with_opts(queue_opts).unwrap();
        registry.register(Box::new(queue_depth.clone())).unwrap();

        Metrics {
            registry,
            api_server_request_times,
            events_received,
            reconciles_by_kind,
            reconcile_errors_by_kind,
            reconcile_durations,
            label_changes,
            queue_depth,
        }
    }

    pub fn client_metrics(&self) -> ClientMetrics {
        ClientMetrics {
            api_server_request_times: self.api_server_request_times.clone(),
        }
    }

    pub fn event_received(&self) {
        self.events_received.inc();
    }

    /// Returns a timer that records the reconcile duration when it's observed or dropped
    pub fn reconcile_started(&self, kind: &K8sType) -> prometheus::HistogramTimer {
        self.reconciles_by_kind.with_label_values(&[kind.kind]).inc();
        self.reconcile_durations.with_label_values(&[kind.kind]).start_timer()
    }

    pub fn reconcile_failed(&self, kind: &K8sType, class: ErrorKind) {
        self.reconcile_errors_by_kind
            .with_label_values(&[kind.kind, class.as_str()])
            .inc();
    }

    pub fn labels_changed(&self, diff: &LabelDiff) {
        let counts = [
            ("added", diff.added.len()),
            ("updated", diff.updated.len()),
            ("removed", diff.removed.len()),
        ];
        for (change, count) in counts.iter() {
            if *count > 0 {
                self.label_changes.with_label_values(&[*change]).inc_by(*count as i64);
            }
        }
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn encode_as_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::with_capacity(4096);
        encoder.encode(self.registry.gather().as_slice(), &mut buffer)?;
        Ok(buffer)
    }
}

#[derive(Clone)]
pub struct ClientMetrics {
    api_server_request_times: Histogram,
}

impl Debug for ClientMetrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ClientMetrics")
    }
}

impl ClientMetrics {
    /// Metrics that aren't registered anywhere, for clients created outside of an operator
    pub fn unregistered() -> ClientMetrics {
        Metrics::new().client_metrics()
    }

    pub fn request_started(&self) -> prometheus::HistogramTimer {
        self.api_server_request_times.start_timer()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::k8s_types;

    fn text(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_as_text().unwrap()).unwrap()
    }

    #[test]
    fn records_reconciles_and_failures_by_kind() {
        let metrics = Metrics::new();
        let kind = k8s_types::core::v1::Namespace;

        metrics.reconcile_started(kind).observe_duration();
        metrics.reconcile_failed(kind, ErrorKind::Retryable);

        let encoded = text(&metrics);
        assert!(encoded.contains("reconciles{kind=\"Namespace\"} 1"), "{}", encoded);
        assert!(
            encoded.contains("reconcile_errors{class=\"retryable\",kind=\"Namespace\"} 1"),
            "{}",
            encoded
        );
    }

    #[test]
    fn counts_label_changes_by_type() {
        let metrics = Metrics::new();
        let mut current = crate::resource::StringMap::new();
        current.insert("env".to_owned(), "prod".to_owned());
        current.insert("tier".to_owned(), "web".to_owned());
        let mut previous = crate::resource::StringMap::new();
        previous.insert("env".to_owned(), "dev".to_owned());

        metrics.labels_changed(&LabelDiff::between(&current, &previous));

        let encoded = text(&metrics);
        assert!(encoded.contains("label_changes{change=\"added\"} 1"), "{}", encoded);
        assert!(encoded.contains("label_changes{change=\"updated\"} 1"), "{}", encoded);
        assert!(!encoded.contains("change=\"removed\""), "{}", encoded);
    }
}
