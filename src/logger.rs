//! Logger initialization.
//!
//! Thin wrapper over `tracing-subscriber`. `init` is called twice at startup:
//! once with the default level before config is available, and again with the
//! configured level. The first call installs the global subscriber with a
//! reloadable env filter; later calls swap the filter in place, so the
//! configured level (and `ATELIER_LOG_LEVEL`) actually take effect.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use crate::error::AppError;

static RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Initialize the global tracing subscriber at `level`, or re-target an
/// already-installed subscriber to `level`.
///
/// `RUST_LOG` (if set) takes precedence over `level` on every call.
pub fn init(level: &str) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))?;

    if let Some(handle) = RELOAD_HANDLE.get() {
        return handle
            .reload(filter)
            .map_err(|e| AppError::Logger(format!("reload filter: {e}")));
    }

    let (filter_layer, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| AppError::Logger(format!("subscriber init: {e}")))?;

    let _ = RELOAD_HANDLE.set(handle);
    Ok(())
}
