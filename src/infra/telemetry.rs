use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "blockmirror_cache_hit_total",
            Unit::Count,
            "Cache reads served without an upstream call, by entry kind."
        );
        describe_counter!(
            "blockmirror_cache_miss_total",
            Unit::Count,
            "Cache reads that went upstream, by entry kind."
        );
        describe_counter!(
            "blockmirror_remote_retry_total",
            Unit::Count,
            "Upstream calls retried after a transient failure."
        );
        describe_counter!(
            "blockmirror_cache_corrupt_total",
            Unit::Count,
            "Durable cache records skipped because they could not be read or decoded."
        );
        describe_histogram!(
            "blockmirror_cache_persist_ms",
            Unit::Milliseconds,
            "Metadata record write latency in milliseconds."
        );
    });
}
