//! Model configuration
//!
//! Describes which components make up the coupled model, which registered
//! implementation backs each one, how their ports are wired, and the numeric
//! settings handed to them. Loaded from a small YAML document.

use log::{info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{CouplingError, CouplingResult};

/// Paths searched by [`Configuration::load_default`]
const CONFIG_PATHS: [&str; 2] = [
    "config/reaction_diffusion.yaml",
    "../config/reaction_diffusion.yaml",
];

/// Complete model description
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Configuration {
    pub model: ModelConfig,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub components: BTreeMap<String, ComponentConfig>,
    /// Sender endpoint -> receiver endpoint, both `component.port`
    #[serde(default)]
    pub conduits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComponentConfig {
    pub implementation: String,
}

/// One end of a conduit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub component: String,
    pub port: String,
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> CouplingResult<Self> {
        match endpoint.split_once('.') {
            Some((component, port)) if !component.is_empty() && !port.is_empty() => Ok(Self {
                component: component.to_string(),
                port: port.to_string(),
            }),
            _ => Err(CouplingError::Config(format!(
                "conduit endpoint '{endpoint}' must have the form component.port"
            ))),
        }
    }
}

/// A parsed conduit, sender to receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conduit {
    pub sender: Endpoint,
    pub receiver: Endpoint,
}

/// Numeric settings, keyed either `name` or `component.name`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, f64>);

impl Settings {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).unwrap_or(default)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Names in `self` that are not in `known`
    pub fn unknown_names<'a>(&'a self, known: &[&str]) -> Vec<&'a str> {
        self.iter()
            .map(|(key, _)| key)
            .filter(|key| !known.contains(key))
            .collect()
    }

    /// Scoped keys whose component is not `component`
    pub fn scoped_outside<'a>(&'a self, component: &str) -> Vec<&'a str> {
        self.iter()
            .map(|(key, _)| key)
            .filter(|key| matches!(key.split_once('.'), Some((scope, _)) if scope != component))
            .collect()
    }

    /// Settings as seen by `component`: global keys, overridden by keys
    /// scoped to that component, with the scope prefix stripped.
    pub fn for_component(&self, component: &str) -> Settings {
        let mut scoped = Settings::default();
        for (key, value) in self.iter() {
            if !key.contains('.') {
                scoped.insert(key, value);
            }
        }
        let prefix = format!("{component}.");
        for (key, value) in self.iter() {
            if let Some(name) = key.strip_prefix(&prefix) {
                scoped.insert(name, value);
            }
        }
        scoped
    }
}

impl Default for Configuration {
    fn default() -> Self {
        let mut components = BTreeMap::new();
        components.insert(
            "macro".to_string(),
            ComponentConfig {
                implementation: "diffusion".to_string(),
            },
        );
        components.insert(
            "micro".to_string(),
            ComponentConfig {
                implementation: "reaction".to_string(),
            },
        );

        let mut conduits = BTreeMap::new();
        conduits.insert(
            "macro.state_out".to_string(),
            "micro.initial_state".to_string(),
        );
        conduits.insert(
            "micro.final_state".to_string(),
            "macro.state_in".to_string(),
        );

        Self {
            model: ModelConfig {
                name: "reaction_diffusion".to_string(),
                components,
                conduits,
            },
            settings: Settings::default(),
        }
    }
}

impl Configuration {
    /// Parse and validate a YAML model description
    pub fn from_yaml(yaml: &str) -> CouplingResult<Self> {
        let config: Configuration = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> CouplingResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| CouplingError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&content)?;
        info!("[config] Loaded model '{}' from {}", config.model.name, path.display());
        Ok(config)
    }

    /// Load from the first well-known path under the working directory,
    /// else use the built-in reaction-diffusion model.
    pub fn load_default() -> CouplingResult<Self> {
        Self::load_from_dir(".")
    }

    /// Like [`Configuration::load_default`], searching relative to `dir`
    pub fn load_from_dir(dir: impl AsRef<Path>) -> CouplingResult<Self> {
        let dir = dir.as_ref();
        for path in CONFIG_PATHS {
            let candidate = dir.join(path);
            if candidate.is_file() {
                return Self::load(candidate);
            }
        }
        warn!(
            "[config] No model file under {}, using built-in reaction-diffusion model",
            dir.display()
        );
        Ok(Self::default())
    }

    /// Parsed conduits, in sender order
    pub fn conduits(&self) -> CouplingResult<Vec<Conduit>> {
        self.model
            .conduits
            .iter()
            .map(|(sender, receiver)| {
                Ok(Conduit {
                    sender: Endpoint::parse(sender)?,
                    receiver: Endpoint::parse(receiver)?,
                })
            })
            .collect()
    }

    pub fn validate(&self) -> CouplingResult<()> {
        if self.model.name.trim().is_empty() {
            return Err(CouplingError::Config("model name must not be empty".to_string()));
        }
        if self.model.components.is_empty() {
            return Err(CouplingError::Config(
                "model must declare at least one component".to_string(),
            ));
        }
        for (name, component) in &self.model.components {
            if name.is_empty() || name.contains('.') {
                return Err(CouplingError::Config(format!(
                    "invalid component name '{name}'"
                )));
            }
            if component.implementation.trim().is_empty() {
                return Err(CouplingError::Config(format!(
                    "component '{name}' has no implementation"
                )));
            }
        }
        for conduit in self.conduits()? {
            for endpoint in [&conduit.sender, &conduit.receiver] {
                if !self.model.components.contains_key(&endpoint.component) {
                    return Err(CouplingError::Config(format!(
                        "conduit refers to undeclared component '{}'",
                        endpoint.component
                    )));
                }
            }
            if conduit.sender.component == conduit.receiver.component {
                return Err(CouplingError::Config(format!(
                    "conduit loops back into component '{}'",
                    conduit.sender.component
                )));
            }
        }
        for (key, value) in self.settings.iter() {
            if !value.is_finite() {
                return Err(CouplingError::Config(format!(
                    "setting '{key}' must be finite, got {value}"
                )));
            }
        }
        Ok(())
    }
}
