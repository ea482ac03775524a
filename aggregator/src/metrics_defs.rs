use shared::metrics_defs::{MetricDef, MetricType};

pub const PROVIDER_CALL_SUCCESS: MetricDef = MetricDef {
    name: "provider.call.success",
    metric_type: MetricType::Counter,
    description: "Provider calls that returned a usable answer. Tagged with provider.",
};

pub const PROVIDER_CALL_FAILURE: MetricDef = MetricDef {
    name: "provider.call.failure",
    metric_type: MetricType::Counter,
    description: "Provider calls that failed or timed out. Tagged with provider.",
};

pub const PROVIDER_CALL_DURATION: MetricDef = MetricDef {
    name: "provider.call.duration",
    metric_type: MetricType::Histogram,
    description: "Provider call duration in seconds. Tagged with provider.",
};

pub const AGGREGATE_PROVIDERS_CONTACTED: MetricDef = MetricDef {
    name: "aggregate.providers.contacted",
    metric_type: MetricType::Histogram,
    description: "Number of providers dispatched to per aggregate call",
};

pub const ALL_METRICS: &[MetricDef] = &[
    PROVIDER_CALL_SUCCESS,
    PROVIDER_CALL_FAILURE,
    PROVIDER_CALL_DURATION,
    AGGREGATE_PROVIDERS_CONTACTED,
];
