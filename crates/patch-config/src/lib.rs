//! Patchbay configuration
//!
//! Loads the TOML configuration file, instantiates backend instances through
//! the registered factories, and builds the router's mapping graph:
//!
//! ```toml
//! [[instance]]
//! backend = "loopback"
//! name = "hub"
//!
//! [instance.options]
//! "forward.monitor" = "echo"
//!
//! [[route]]
//! from = "hub.fader1"
//! to = ["hub.dimmer1", "hub.dimmer2"]
//! ```
//!
//! Channel specifications are `instance.channel`; everything after the first
//! dot is handed to the owning backend's channel parser. The configuration
//! layer does not validate that the resulting routing graph is acyclic; a
//! cyclic graph keeps the router's drain cycle from ever reaching
//! quiescence, so routes should be written without loops.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use patch_core::{BackendFactory, Router, RouterError};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while reading or applying a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        /// Path that was attempted
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for the expected schema
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// An instance refers to a backend type no factory provides
    #[error("unknown backend type: {0}")]
    UnknownBackend(String),

    /// Two instances share a name
    #[error("duplicate instance name: {0}")]
    DuplicateInstance(String),

    /// A route refers to an instance that was never declared
    #[error("route refers to unknown instance: {0}")]
    UnknownInstance(String),

    /// A channel specification is missing its `instance.channel` structure
    #[error("invalid channel specification: {0:?} (expected instance.channel)")]
    InvalidChannelSpec(String),

    /// A factory failed to create an instance
    #[error("cannot create instance {instance}: {source}")]
    Instance {
        /// Instance name from the configuration
        instance: String,
        /// Backend-reported cause
        source: patch_core::BackendError,
    },

    /// The router rejected part of the configuration
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// One backend instance declaration
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Backend type, resolved against the registered factories
    pub backend: String,
    /// Unique instance name, referenced by routes
    pub name: String,
    /// Backend-specific options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// One routing declaration: a source channel and its destinations
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Source channel as `instance.channel`
    pub from: String,
    /// Destination channels as `instance.channel`
    pub to: Vec<String>,
}

/// Parsed configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Backend instances to create
    #[serde(default, rename = "instance")]
    pub instances: Vec<InstanceConfig>,
    /// Mapping edges to install
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteConfig>,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "read configuration file");
        Self::parse(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for instance in &self.instances {
            if !names.insert(instance.name.as_str()) {
                return Err(ConfigError::DuplicateInstance(instance.name.clone()));
            }
        }

        for route in &self.routes {
            for spec in std::iter::once(&route.from).chain(route.to.iter()) {
                let (instance, _) = split_spec(spec)?;
                if !names.contains(instance) {
                    return Err(ConfigError::UnknownInstance(instance.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Instantiate the declared backends and install the routes
    ///
    /// Instances are created through the factory matching their backend
    /// type and registered with the router under their declared names; each
    /// route's channels are resolved by the owning backend and added to the
    /// mapping table in declaration order.
    pub fn apply(
        &self,
        router: &mut Router,
        factories: &[Box<dyn BackendFactory>],
    ) -> Result<(), ConfigError> {
        for instance in &self.instances {
            let factory = factories
                .iter()
                .find(|f| f.backend_type() == instance.backend)
                .ok_or_else(|| ConfigError::UnknownBackend(instance.backend.clone()))?;
            let backend = factory
                .create(&instance.name, &instance.options)
                .map_err(|source| ConfigError::Instance {
                    instance: instance.name.clone(),
                    source,
                })?;
            router.add_backend(instance.name.clone(), backend);
        }

        for route in &self.routes {
            let (instance, channel) = split_spec(&route.from)?;
            let from = router.channel(instance, channel)?;
            for spec in &route.to {
                let (instance, channel) = split_spec(spec)?;
                let to = router.channel(instance, channel)?;
                router.map_channel(from, to)?;
            }
            debug!(from = %route.from, destinations = route.to.len(), "installed route");
        }

        info!(
            instances = self.instances.len(),
            routes = self.routes.len(),
            "configuration applied"
        );
        Ok(())
    }
}

fn split_spec(spec: &str) -> Result<(&str, &str), ConfigError> {
    match spec.split_once('.') {
        Some((instance, channel)) if !instance.is_empty() && !channel.is_empty() => {
            Ok((instance, channel))
        }
        _ => Err(ConfigError::InvalidChannelSpec(spec.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patch_sim::LoopbackFactory;

    fn factories() -> Vec<Box<dyn BackendFactory>> {
        vec![Box::new(LoopbackFactory)]
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [[instance]]
            backend = "loopback"
            name = "hub"

            [instance.options]
            "forward.monitor" = "echo"

            [[route]]
            from = "hub.fader"
            to = ["hub.dim1", "hub.dim2"]
            "#,
        )
        .unwrap();

        assert_eq!(config.instances.len(), 1);
        assert_eq!(config.instances[0].backend, "loopback");
        assert_eq!(
            config.instances[0].options.get("forward.monitor"),
            Some(&"echo".to_string())
        );
        assert_eq!(config.routes[0].to.len(), 2);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = Config::parse("").unwrap();
        assert!(config.instances.is_empty());
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_duplicate_instance_is_rejected() {
        let result = Config::parse(
            r#"
            [[instance]]
            backend = "loopback"
            name = "hub"

            [[instance]]
            backend = "loopback"
            name = "hub"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::DuplicateInstance(_))));
    }

    #[test]
    fn test_route_to_undeclared_instance_is_rejected() {
        let result = Config::parse(
            r#"
            [[route]]
            from = "hub.fader"
            to = ["hub.dim"]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::UnknownInstance(_))));
    }

    #[test]
    fn test_channel_spec_requires_instance_prefix() {
        let result = Config::parse(
            r#"
            [[instance]]
            backend = "loopback"
            name = "hub"

            [[route]]
            from = "fader"
            to = ["hub.dim"]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidChannelSpec(_))));
    }

    #[test]
    fn test_apply_builds_instances_and_routes() {
        let config = Config::parse(
            r#"
            [[instance]]
            backend = "loopback"
            name = "hub"

            [[route]]
            from = "hub.fader"
            to = ["hub.dim1", "hub.dim2"]
            "#,
        )
        .unwrap();

        let mut router = Router::new();
        config.apply(&mut router, &factories()).unwrap();

        assert!(router.backend_id("hub").is_some());
        assert_eq!(router.mapping_count(), 1);
    }

    #[test]
    fn test_apply_rejects_unknown_backend_type() {
        let config = Config::parse(
            r#"
            [[instance]]
            backend = "telepathy"
            name = "hub"
            "#,
        )
        .unwrap();

        let mut router = Router::new();
        let result = config.apply(&mut router, &factories());
        assert!(matches!(result, Err(ConfigError::UnknownBackend(_))));
    }
}
