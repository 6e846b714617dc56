//! HTTP front end of the data perimeter tool.
//!
//! The domain work lives in `perim-core`; this crate adds settings, logging,
//! the perimeter flag store, the AWS CLI pass-through, and the axum router.

pub mod api;
pub mod cli;
pub mod logging;
pub mod perimeter_state;
pub mod settings;

pub use api::ApiService;
pub use settings::Settings;

use std::sync::Arc;

/// Load settings, install logging, and serve until the listener fails.
pub async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = Settings::load()?;
    logging::init(&settings)?;
    tracing::info!(
        region = %settings.region,
        endpoint = settings.endpoint_url.as_deref().unwrap_or("aws"),
        "starting data perimeter service"
    );

    let addr = settings.bind_addr()?;
    let service = Arc::new(ApiService::from_settings(&settings)?);
    service.start_server(addr).await
}
