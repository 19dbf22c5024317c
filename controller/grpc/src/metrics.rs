use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::{sync::atomic::AtomicU64, time::Duration};
use tokio::time;

#[derive(Clone, Debug)]
pub struct GrpcClientMetricsFamily {
    started: Family<Labels, Counter>,
    handling: Family<Labels, Histogram>,
    handled: Family<CodeLabels, Counter>,
}

#[derive(Clone, Debug)]
pub(crate) struct GrpcClientRpcMetrics {
    started: Counter,
    handling: Histogram,
    handled: Family<CodeLabels, Counter>,
    labels: Labels,
}

pub(crate) struct ResponseObserver {
    handled: Option<ResponseHandle>,
}

struct ResponseHandle {
    start: time::Instant,
    durations: Histogram,
    codes: Family<CodeLabels, Counter>,
    labels: Labels,
}

/// Health of the agent telemetry stream.
#[derive(Clone, Debug, Default)]
pub struct MonitorMetrics {
    connects: Counter,
    disconnects: Counter,
    backoff: Gauge<f64, AtomicU64>,
    batches_received: Counter,
    batches_dropped: Counter,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct Labels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct CodeLabels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
    grpc_code: &'static str,
}

// === GrpcClientMetricsFamily ===

impl GrpcClientMetricsFamily {
    pub fn register(reg: &mut Registry) -> Self {
        let started = Family::<Labels, Counter>::default();
        reg.register(
            "started",
            "Total number of RPCs started by the client",
            started.clone(),
        );

        let handled = Family::<CodeLabels, Counter>::default();
        reg.register(
            "handled",
            "Total number of RPCs completed by the client, regardless of success or failure",
            handled.clone(),
        );

        let handling = Family::<Labels, Histogram>::new_with_constructor(|| {
            // Agent calls are bounded by a ~1s timeout.
            Histogram::new([0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0])
        });
        reg.register_with_unit(
            "handling",
            "Histogram of response latency (seconds) of gRPC calls made to the agent",
            Unit::Seconds,
            handling.clone(),
        );

        Self {
            started,
            handled,
            handling,
        }
    }

    pub(crate) fn unary_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
    ) -> GrpcClientRpcMetrics {
        self.rpc(svc, method, "unary")
    }

    pub(crate) fn server_stream_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
    ) -> GrpcClientRpcMetrics {
        self.rpc(svc, method, "server_stream")
    }

    fn rpc(
        &self,
        grpc_service: &'static str,
        grpc_method: &'static str,
        grpc_type: &'static str,
    ) -> GrpcClientRpcMetrics {
        let labels = Labels {
            grpc_service,
            grpc_method,
            grpc_type,
        };
        GrpcClientRpcMetrics {
            started: self.started.get_or_create(&labels).clone(),
            handled: self.handled.clone(),
            handling: self.handling.get_or_create(&labels).clone(),
            labels,
        }
    }
}

impl Default for GrpcClientMetricsFamily {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

// === GrpcClientRpcMetrics ===

impl GrpcClientRpcMetrics {
    pub(crate) fn start(&self) -> ResponseObserver {
        self.started.inc();

        // Pre-register OK
        let _ = self.handled.get_or_create(&CodeLabels {
            grpc_service: self.labels.grpc_service,
            grpc_method: self.labels.grpc_method,
            grpc_type: self.labels.grpc_type,
            grpc_code: code_str(tonic::Code::Ok),
        });

        ResponseObserver {
            handled: Some(ResponseHandle {
                start: time::Instant::now(),
                durations: self.handling.clone(),
                codes: self.handled.clone(),
                labels: self.labels.clone(),
            }),
        }
    }
}

// === ResponseObserver ===

impl ResponseObserver {
    pub(crate) fn end(mut self, code: tonic::Code) {
        if let Some(handle) = self.handled.take() {
            handle.inc_end(code);
        }
    }
}

impl Drop for ResponseObserver {
    fn drop(&mut self) {
        if let Some(inner) = self.handled.take() {
            inner.inc_end(tonic::Code::Cancelled);
        }
    }
}

// === ResponseHandle ===

impl ResponseHandle {
    #[inline]
    fn inc_end(self, code: tonic::Code) {
        let Self {
            start,
            durations,
            codes,
            labels,
        } = self;
        durations.observe(start.elapsed().as_secs_f64());
        codes
            .get_or_create(&CodeLabels {
                grpc_service: labels.grpc_service,
                grpc_method: labels.grpc_method,
                grpc_type: labels.grpc_type,
                grpc_code: code_str(code),
            })
            .inc();
    }
}

// === MonitorMetrics ===

impl MonitorMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "connects",
            "Total number of attempts to open the agent telemetry stream",
            metrics.connects.clone(),
        );
        reg.register(
            "disconnects",
            "Total number of times the agent telemetry stream ended or failed to open",
            metrics.disconnects.clone(),
        );
        reg.register_with_unit(
            "backoff",
            "Current delay before the telemetry stream is reopened",
            Unit::Seconds,
            metrics.backoff.clone(),
        );
        reg.register(
            "batches_received",
            "Total number of telemetry batches received from the agent",
            metrics.batches_received.clone(),
        );
        reg.register(
            "batches_dropped",
            "Total number of telemetry batches discarded before reconciliation",
            metrics.batches_dropped.clone(),
        );
        metrics
    }

    pub(crate) fn connect(&self) {
        self.connects.inc();
    }

    pub(crate) fn disconnect(&self, delay: Duration) {
        self.disconnects.inc();
        self.backoff.set(delay.as_secs_f64());
    }

    pub(crate) fn batch_received(&self) {
        self.batches_received.inc();
    }

    /// Records batches overwritten in the queue before the reconciler read
    /// them.
    pub fn batches_dropped(&self, n: u64) {
        self.batches_dropped.inc_by(n);
    }

    pub fn dropped_total(&self) -> u64 {
        self.batches_dropped.get()
    }

    pub fn received_total(&self) -> u64 {
        self.batches_received.get()
    }
}

fn code_str(code: tonic::Code) -> &'static str {
    use tonic::Code::*;
    match code {
        Ok => "OK",
        Cancelled => "CANCELLED",
        Unknown => "UNKNOWN",
        InvalidArgument => "INVALID_ARGUMENT",
        DeadlineExceeded => "DEADLINE_EXCEEDED",
        NotFound => "NOT_FOUND",
        AlreadyExists => "ALREADY_EXISTS",
        PermissionDenied => "PERMISSION_DENIED",
        ResourceExhausted => "RESOURCE_EXHAUSTED",
        FailedPrecondition => "FAILED_PRECONDITION",
        Aborted => "ABORTED",
        OutOfRange => "OUT_OF_RANGE",
        Unimplemented => "UNIMPLEMENTED",
        Internal => "INTERNAL",
        Unavailable => "UNAVAILABLE",
        DataLoss => "DATA_LOSS",
        Unauthenticated => "UNAUTHENTICATED",
    }
}
