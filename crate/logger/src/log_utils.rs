use std::sync::Once;

use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// The filter used when neither `RUST_LOG` nor an explicit filter is set
pub const DEFAULT_LOG_FILTER: &str = "info,mldsa_hsm_base=debug";

static LOG_INIT: Once = Once::new();

/// Install the global tracing subscriber, once per process.
///
/// `RUST_LOG` wins over `default_filter`, which wins over [`DEFAULT_LOG_FILTER`].
/// Later calls are no-ops, so every test may call it.
pub fn log_init(default_filter: Option<&str>) {
    LOG_INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_err() {
            unsafe {
                std::env::set_var("RUST_LOG", default_filter.unwrap_or(DEFAULT_LOG_FILTER));
            }
        }
        tracing_setup();
    });
}

fn tracing_setup() {
    let format = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_writer(std::io::stderr)
        .compact();

    // another subscriber may already be installed by the host process
    if tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(format)
        .try_init()
        .is_ok()
    {
        debug!("Tracing initialized");
    }
}
