use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` uses the `env_logger` filter syntax, e.g.
/// "kiln_engine=trace,wgpu_core=warn". When unset, `RUST_LOG` is consulted,
/// then [`default_filter`].
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

/// Filter used when neither the config nor `RUST_LOG` names one.
///
/// Info everywhere, debug for this crate (fence waits, pool growth, uploads),
/// warnings only from wgpu's internals.
pub fn default_filter() -> String {
    let engine = env!("CARGO_PKG_NAME").replace('-', "_");
    format!("info,{engine}=debug,wgpu_core=warn,wgpu_hal=warn")
}

static INIT: Once = Once::new();

/// Installs the global `env_logger` once; later calls do nothing.
///
/// Call early in `main`. A logger installed by someone else (a test harness)
/// is left in place.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = config
            .env_filter
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(default_filter);

        let installed = env_logger::Builder::new()
            .parse_filters(&filter)
            .write_style(config.write_style)
            .try_init()
            .is_ok();
        if installed {
            log::debug!("logging initialized with `{filter}`");
        }
    });
}

#[cfg(test)]
mod logging_tests {
    use super::*;

    #[test]
    fn default_filter_names_this_crate() {
        let filter = default_filter();
        assert!(filter.contains("kiln_engine=debug"), "{filter}");
        assert!(!filter.contains('-'), "{filter}");
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_logging(LoggingConfig::default());
        init_logging(LoggingConfig {
            env_filter: Some("trace".into()),
            ..LoggingConfig::default()
        });
    }
}
