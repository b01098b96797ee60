use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

/// Per-application request counters and store sizes.
#[derive(Clone, Debug)]
pub struct FeatureMetrics {
    requests: Family<OperationLabels, Counter>,
    active: Family<ApplicationLabels, Gauge>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GetAll,
    Get,
    Set,
    PreSet,
    Delete,
}

#[derive(Clone, Debug)]
pub struct GrpcServerMetricsFamily {
    started: Family<RpcLabels, Counter>,
    handling: Family<RpcLabels, Histogram>,
    handled: Family<CodeLabels, Counter>,
    msg_received: Family<RpcLabels, Counter>,
    msg_sent: Family<RpcLabels, Counter>,
}

#[derive(Clone, Debug)]
pub(crate) struct GrpcServerRpcMetrics {
    started: Counter,
    msg_received: Counter,
    msg_sent: Counter,
    handling: Histogram,
    handled: Family<CodeLabels, Counter>,
    labels: RpcLabels,
}

/// Tracks a single call from request to final status.
pub(crate) struct ResponseObserver {
    msg_sent: Counter,
    handled: Option<ResponseHandle>,
}

struct ResponseHandle {
    start: time::Instant,
    durations: Histogram,
    codes: Family<CodeLabels, Counter>,
    labels: RpcLabels,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OperationLabels {
    application: String,
    operation: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ApplicationLabels {
    application: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RpcLabels {
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

// === impl FeatureMetrics ===

impl FeatureMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<OperationLabels, Counter>::default();
        reg.register(
            "requests",
            "Total number of feature requests by application and operation",
            requests.clone(),
        );

        let active = Family::<ApplicationLabels, Gauge>::default();
        reg.register(
            "active",
            "Number of features stored per application",
            active.clone(),
        );

        Self { requests, active }
    }

    pub(crate) fn request(&self, application: &str, op: Operation) {
        self.requests
            .get_or_create(&OperationLabels {
                application: application.to_string(),
                operation: op.as_str(),
            })
            .inc();
    }

    pub(crate) fn set_active(&self, application: &str, count: usize) {
        self.active
            .get_or_create(&ApplicationLabels {
                application: application.to_string(),
            })
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    #[cfg(test)]
    pub(crate) fn requests(&self, application: &str, op: Operation) -> u64 {
        self.requests
            .get_or_create(&OperationLabels {
                application: application.to_string(),
                operation: op.as_str(),
            })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn active(&self, application: &str) -> i64 {
        self.active
            .get_or_create(&ApplicationLabels {
                application: application.to_string(),
            })
            .get()
    }
}

// === impl Operation ===

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::GetAll => "get_all",
            Self::Get => "get",
            Self::Set => "set",
            Self::PreSet => "preset",
            Self::Delete => "delete",
        }
    }
}

// === impl GrpcServerMetricsFamily ===

impl GrpcServerMetricsFamily {
    pub fn register(reg: &mut Registry) -> Self {
        let started = Family::<RpcLabels, Counter>::default();
        reg.register(
            "started",
            "Total number of RPCs started on the server",
            started.clone(),
        );

        let msg_received = Family::<RpcLabels, Counter>::default();
        reg.register(
            "msg_received",
            "Total number of RPC stream messages received on the server",
            msg_received.clone(),
        );

        let msg_sent = Family::<RpcLabels, Counter>::default();
        reg.register(
            "msg_sent",
            "Total number of gRPC stream messages sent by the server",
            msg_sent.clone(),
        );

        let handled = Family::<CodeLabels, Counter>::default();
        reg.register(
            "handled",
            "Total number of RPCs completed on the server, regardless of success or failure",
            handled.clone(),
        );

        // Calls are short-lived; a ConfigMap round trip dominates.
        let handling = Family::<RpcLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.005, 0.025, 0.1, 0.5, 2.5, 10.0])
        });
        reg.register_with_unit(
            "handling",
            "Histogram of response latency (seconds) of gRPC that had been application-level handled by the server",
            Unit::Seconds,
            handling.clone(),
        );

        Self {
            started,
            msg_received,
            msg_sent,
            handled,
            handling,
        }
    }

    pub(crate) fn unary_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
    ) -> GrpcServerRpcMetrics {
        self.rpc(svc, method, "unary")
    }

    pub(crate) fn server_stream_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
    ) -> GrpcServerRpcMetrics {
        self.rpc(svc, method, "server_stream")
    }

    fn rpc(
        &self,
        grpc_service: &'static str,
        grpc_method: &'static str,
        grpc_type: &'static str,
    ) -> GrpcServerRpcMetrics {
        let labels = RpcLabels {
            grpc_service,
            grpc_method,
            grpc_type,
        };
        GrpcServerRpcMetrics {
            started: self.started.get_or_create(&labels).clone(),
            msg_received: self.msg_received.get_or_create(&labels).clone(),
            msg_sent: self.msg_sent.get_or_create(&labels).clone(),
            handled: self.handled.clone(),
            handling: self.handling.get_or_create(&labels).clone(),
            labels,
        }
    }
}

// === impl GrpcServerRpcMetrics ===

impl GrpcServerRpcMetrics {
    pub(crate) fn start(&self) -> ResponseObserver {
        self.started.inc();

        // Every method takes a single request message.
        self.msg_received.inc();

        let _ = self.handled.get_or_create(&self.labels.with_code(tonic::Code::Ok));

        ResponseObserver {
            msg_sent: self.msg_sent.clone(),
            handled: Some(ResponseHandle {
                start: time::Instant::now(),
                durations: self.handling.clone(),
                codes: self.handled.clone(),
                labels: self.labels.clone(),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn handled(&self, code: tonic::Code) -> u64 {
        self.handled.get_or_create(&self.labels.with_code(code)).get()
    }
}

// === impl ResponseObserver ===

impl ResponseObserver {
    pub(crate) fn msg_sent(&self) {
        self.msg_sent.inc();
    }

    pub(crate) fn end(mut self, code: tonic::Code) {
        if let Some(handle) = self.handled.take() {
            handle.inc_end(code);
        }
    }

    /// Records the outcome of a unary call.
    pub(crate) fn observe<T>(self, res: Result<T, tonic::Status>) -> Result<T, tonic::Status> {
        match &res {
            Ok(_) => {
                self.msg_sent();
                self.end(tonic::Code::Ok);
            }
            Err(status) => self.end(status.code()),
        }
        res
    }
}

impl Drop for ResponseObserver {
    fn drop(&mut self) {
        if let Some(handle) = self.handled.take() {
            handle.inc_end(tonic::Code::Ok);
        }
    }
}

// === impl ResponseHandle ===

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
        codes.get_or_create(&labels.with_code(code)).inc();
    }
}

// === impl RpcLabels ===

impl RpcLabels {
    fn with_code(&self, code: tonic::Code) -> CodeLabels {
        CodeLabels {
            grpc_service: self.grpc_service,
            grpc_method: self.grpc_method,
            grpc_type: self.grpc_type,
            grpc_code: code_str(code),
        }
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
