//! Tracing subscriber setup.

use medsim_core::config::GeneralConfig;
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` wins over `general.log_level`. With `general.json_logs` set,
/// events are written as JSON lines. Returns `false` if a global subscriber
/// was already installed, in which case nothing changes.
pub fn init_tracing(general: &GeneralConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if general.json_logs {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(
            level = %general.log_level,
            json = general.json_logs,
            "Tracing initialised"
        );
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_no_op() {
        let general = GeneralConfig::default();
        // Another test in this binary may have installed one already.
        let _ = init_tracing(&general);
        assert!(!init_tracing(&general));
    }
}
