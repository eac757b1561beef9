//! Process-wide logger setup
//!
//! Call [`init`] once at process entry. `RUST_LOG` is applied on top of the
//! configured levels, so it can always widen or narrow them.

use log::LevelFilter;

use crate::error::{CouplingError, CouplingResult};

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every module
    pub level: LevelFilter,
    /// Per-module overrides, e.g. `("reaction_diffusion_lib::coupling", Trace)`
    pub module_levels: Vec<(String, LevelFilter)>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            module_levels: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: LevelFilter) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn module(mut self, module: impl Into<String>, level: LevelFilter) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    fn builder(&self) -> env_logger::Builder {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.level);
        for (module, level) in &self.module_levels {
            builder.filter_module(module, *level);
        }
        builder.parse_default_env();
        builder
    }
}

/// Install the global logger.
///
/// Fails if a logger is already installed.
pub fn init(config: &LoggingConfig) -> CouplingResult<()> {
    config
        .builder()
        .try_init()
        .map_err(|e| CouplingError::Config(format!("logger already initialised: {e}")))
}
