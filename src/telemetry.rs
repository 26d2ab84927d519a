//! Telemetry logic.
//! Support logging and metrics descriptions.
use metrics::Unit;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, `info` when unset.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Describe every metric the crate records.
///
/// Installing a recorder, e.g. a Prometheus exporter, is up to the host
/// application; call this right after.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "auth_tokens_issued_total",
        Unit::Count,
        "Tokens issued, by type."
    );
    metrics::describe_counter!(
        "auth_token_rejections_total",
        Unit::Count,
        "Tokens rejected, by reason."
    );
    metrics::describe_counter!(
        "auth_revocations_total",
        Unit::Count,
        "Tokens revoked through logout."
    );
    metrics::describe_counter!(
        "auth_revocations_swept_total",
        Unit::Count,
        "Revocation entries removed once their token expired."
    );
    metrics::describe_gauge!(
        "auth_revocations_active",
        Unit::Count,
        "Revocation entries currently held."
    );
}
