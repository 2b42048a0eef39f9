//! Logging setup with a runtime-adjustable filter.

use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use crate::error::ProxyError;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "completion_proxy=info,completion_core=info,tower_http=info";

/// Handle for swapping the active filter at runtime
pub type LogHandle = reload::Handle<EnvFilter, Registry>;

/// Install the global subscriber and return the handle to its filter
pub fn init() -> LogHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    handle
}

/// Replace the active filter, e.g. with `"debug"` or `"completion_core=trace"`
pub fn set_level(handle: &LogHandle, level: &str) -> Result<(), ProxyError> {
    let filter = EnvFilter::try_new(level).map_err(|e| ProxyError::InvalidLogLevel(e.to_string()))?;
    handle
        .reload(filter)
        .map_err(|e| ProxyError::Internal(format!("failed to reload log filter: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_level() {
        let (layer, handle) = reload::Layer::new(EnvFilter::new("info"));
        let _subscriber = tracing_subscriber::registry().with(layer);

        assert!(set_level(&handle, "debug").is_ok());
        assert!(handle.with_current(|f| f.to_string() == "debug").unwrap());
        assert!(matches!(
            set_level(&handle, "completion_core=notalevel"),
            Err(ProxyError::InvalidLogLevel(_))
        ));
    }
}
