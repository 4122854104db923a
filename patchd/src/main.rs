//! Patchbay event routing daemon
//!
//! Reads a TOML configuration, instantiates the declared backend instances,
//! and runs the routing loop until SIGINT or SIGTERM requests shutdown.

use std::process::ExitCode;

use anyhow::Context;
use patch_config::{Config, ConfigError};
use patch_core::{BackendFactory, PollMultiplexer, Router};
use patch_sim::LoopbackFactory;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "patchbay.toml";

fn usage() {
    eprintln!("usage: patchd [configfile]");
    eprintln!("       (default configuration file: {DEFAULT_CONFIG})");
}

fn factories() -> Vec<Box<dyn BackendFactory>> {
    vec![Box::new(LoopbackFactory)]
}

/// Load the configuration and build a fully configured router
///
/// Every configuration failure funnels through this one result, whether it
/// comes from reading the file, parsing it, instantiating a backend, or
/// building the mapping graph.
fn configure(config_path: &str) -> Result<Router, ConfigError> {
    let config = Config::load(config_path)?;
    let mut router = Router::new();
    config.apply(&mut router, &factories())?;
    Ok(router)
}

fn run() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let mut router = configure(&config_path).map_err(|e| {
        usage();
        anyhow::anyhow!(e).context(format!("cannot configure from {config_path}"))
    })?;

    let shutdown = router.shutdown_flag();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, shutdown.handle())
            .context("cannot register signal handler")?;
    }

    tracing::info!(config = %config_path, "starting patchbay router");
    router.run(&mut PollMultiplexer::new())?;
    tracing::info!("shutdown complete");
    Ok(())
}

fn main() -> ExitCode {
    // Include all our crates in the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "patchd=info,patch_core=info,patch_config=info,patch_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("patchd-{name}-{}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_config_file_is_a_configuration_error() {
        let result = configure("/nonexistent/patchbay.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_apply_failure_surfaces_as_a_configuration_error() {
        // unknown backend types fail at apply time, not parse time, and must
        // take the same usage path as an unreadable file
        let path = temp_config(
            "unknown-backend",
            "[[instance]]\nbackend = \"telepathy\"\nname = \"hub\"\n",
        );
        let result = configure(path.to_str().unwrap());
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(ConfigError::UnknownBackend(_))));
    }

    #[test]
    fn test_valid_config_builds_a_router() {
        let path = temp_config(
            "valid",
            "[[instance]]\nbackend = \"loopback\"\nname = \"hub\"\n\n\
             [[route]]\nfrom = \"hub.a\"\nto = [\"hub.b\"]\n",
        );
        let router = configure(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(router.mapping_count(), 1);
    }
}
