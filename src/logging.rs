//! Tracing subscriber bootstrap.
//!
//! `RUST_LOG` wins over the configured level. `log` records from the
//! library crates are bridged into the same subscriber.

use crate::settings::Settings;
use perim_core::{PerimeterError, PerimeterResult};
use tracing_subscriber::EnvFilter;

/// Whether log lines are emitted as JSON objects.
pub fn json_enabled(settings: &Settings) -> bool {
    cfg!(feature = "logs-json") || settings.log_json
}

fn filter(settings: &Settings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},tower_http=info,hyper=warn,reqwest=warn",
            settings.log_level
        ))
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(settings: &Settings) -> PerimeterResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(settings))
        .with_target(true);

    let result = if json_enabled(settings) {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| PerimeterError::io(format!("failed to initialise logging: {}", e)))
}
