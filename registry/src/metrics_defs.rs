//! Metrics definitions for the provider registry.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REFRESH_SUCCESS: MetricDef = MetricDef {
    name: "registry.refresh.success",
    metric_type: MetricType::Counter,
    description: "Number of registry refreshes that installed a new snapshot",
};

pub const REFRESH_FAILURE: MetricDef = MetricDef {
    name: "registry.refresh.failure",
    metric_type: MetricType::Counter,
    description: "Number of registry refreshes that failed and kept the previous snapshot",
};

pub const REFRESH_DURATION: MetricDef = MetricDef {
    name: "registry.refresh.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch and install a registry snapshot in seconds",
};

pub const PROVIDERS: MetricDef = MetricDef {
    name: "registry.providers",
    metric_type: MetricType::Gauge,
    description: "Number of providers in the current snapshot",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REFRESH_SUCCESS,
    REFRESH_FAILURE,
    REFRESH_DURATION,
    PROVIDERS,
];
