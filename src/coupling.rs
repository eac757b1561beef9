//! In-process macro/micro coupler
//!
//! Resolves the components of a [`Configuration`] against a registry of
//! named implementations, checks that the conduits form a single macro/micro
//! pair, and runs the macro model with an exchange that forwards each state
//! to the micro model.

use log::{info, trace, warn};
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{Configuration, Settings};
use crate::diffusion::diffusion_model;
use crate::error::{CouplingError, CouplingResult};
use crate::reaction::reaction;

/// State sent between submodels
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub timestamp: f64,
    pub next_timestamp: Option<f64>,
    pub data: Array1<f64>,
}

/// Macro-side view of the coupled micro model
pub trait MicroExchange {
    /// Send the current state and wait for the micro model's result.
    fn exchange(&mut self, message: Message) -> CouplingResult<Message>;
}

impl<F> MicroExchange for F
where
    F: FnMut(Message) -> CouplingResult<Message>,
{
    fn exchange(&mut self, message: Message) -> CouplingResult<Message> {
        self(message)
    }
}

/// Exchange used when the macro model has no micro partner
#[derive(Debug, Clone, Copy, Default)]
pub struct Uncoupled;

impl MicroExchange for Uncoupled {
    fn exchange(&mut self, message: Message) -> CouplingResult<Message> {
        Ok(message)
    }
}

/// Output of a macro model run
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub final_state: Array1<f64>,
    /// One row per recorded state, initial state first
    pub history: Array2<f64>,
    pub t_end: f64,
    pub steps: usize,
}

pub type MicroFn = fn(&Array1<f64>) -> Array1<f64>;
pub type MacroFn = fn(&Settings, &mut dyn MicroExchange) -> CouplingResult<Trajectory>;

/// A registered submodel implementation
#[derive(Clone, Copy)]
pub enum Implementation {
    /// Owns the time loop and calls out to a micro model
    Macro(MacroFn),
    /// Maps an initial state to a final state
    Micro(MicroFn),
}

impl Implementation {
    pub fn is_macro(&self) -> bool {
        matches!(self, Implementation::Macro(_))
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Implementation::Macro(_) => f.write_str("Implementation::Macro"),
            Implementation::Micro(_) => f.write_str("Implementation::Micro"),
        }
    }
}

/// Name -> implementation registry
#[derive(Debug, Clone, Default)]
pub struct Implementations {
    entries: BTreeMap<String, Implementation>,
}

impl Implementations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `diffusion` and `reaction` models
    pub fn standard() -> Self {
        let mut implementations = Self::new();
        implementations.register("diffusion", Implementation::Macro(diffusion_model));
        implementations.register("reaction", Implementation::Micro(reaction));
        implementations
    }

    /// Register `implementation` under `name`, returning any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        implementation: Implementation,
    ) -> Option<Implementation> {
        let name = name.into();
        let previous = self.entries.insert(name.clone(), implementation);
        if previous.is_some() {
            warn!("[coupling] Implementation '{}' replaced", name);
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<Implementation> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Result of a coupled run
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub model: String,
    pub macro_component: String,
    pub micro_component: Option<String>,
    pub trajectory: Trajectory,
    pub exchanges: usize,
}

/// Serializable digest of a run for the command line
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub model: String,
    pub macro_component: String,
    pub micro_component: Option<String>,
    pub t_end: f64,
    pub steps: usize,
    pub exchanges: usize,
    pub final_state: Vec<f64>,
}

impl SimulationOutcome {
    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            model: self.model.clone(),
            macro_component: self.macro_component.clone(),
            micro_component: self.micro_component.clone(),
            t_end: self.trajectory.t_end,
            steps: self.trajectory.steps,
            exchanges: self.exchanges,
            final_state: self.trajectory.final_state.to_vec(),
        }
    }
}

/// Forwards macro states to a micro implementation
struct MicroConduit<'a> {
    component: &'a str,
    micro: MicroFn,
    exchanges: usize,
}

impl MicroExchange for MicroConduit<'_> {
    fn exchange(&mut self, message: Message) -> CouplingResult<Message> {
        let expected = message.data.len();
        if expected == 0 {
            return Err(CouplingError::Validation(format!(
                "empty state sent to micro model '{}'",
                self.component
            )));
        }
        trace!(
            "[coupling] -> {} t = {:e} ({} samples)",
            self.component,
            message.timestamp,
            expected
        );

        let data = (self.micro)(&message.data);
        if data.len() != expected {
            return Err(CouplingError::ShapeMismatch {
                component: self.component.to_string(),
                expected,
                got: data.len(),
            });
        }
        self.exchanges += 1;

        Ok(Message {
            timestamp: message.timestamp,
            next_timestamp: None,
            data,
        })
    }
}

/// Resolved macro/micro wiring
struct Topology<'a> {
    macro_component: &'a str,
    macro_fn: MacroFn,
    micro: Option<(&'a str, MicroFn)>,
}

fn resolve<'a>(
    config: &'a Configuration,
    implementations: &Implementations,
) -> CouplingResult<Topology<'a>> {
    let mut resolved = BTreeMap::new();
    for (name, component) in &config.model.components {
        let implementation = implementations.get(&component.implementation).ok_or_else(|| {
            CouplingError::UnknownImplementation {
                component: name.clone(),
                implementation: component.implementation.clone(),
            }
        })?;
        resolved.insert(name.as_str(), implementation);
    }

    let macros: Vec<(&str, MacroFn)> = resolved
        .iter()
        .filter_map(|(name, implementation)| match implementation {
            Implementation::Macro(f) => Some((*name, *f)),
            Implementation::Micro(_) => None,
        })
        .collect();
    let (macro_component, macro_fn) = match macros.as_slice() {
        [single] => *single,
        [] => return Err(CouplingError::Topology("model has no macro component".to_string())),
        _ => {
            return Err(CouplingError::Topology(format!(
                "model has {} macro components, expected one",
                macros.len()
            )))
        }
    };

    let conduits = config.conduits()?;
    let mut partner: Option<&str> = None;
    let mut has_return = false;
    for conduit in &conduits {
        let sender = conduit.sender.component.as_str();
        let receiver = conduit.receiver.component.as_str();
        let other = if sender == macro_component {
            receiver
        } else if receiver == macro_component {
            has_return = true;
            sender
        } else {
            return Err(CouplingError::Topology(format!(
                "conduit {}.{} -> {}.{} does not involve macro component '{}'",
                sender, conduit.sender.port, receiver, conduit.receiver.port, macro_component
            )));
        };
        match partner {
            Some(existing) if existing != other => {
                return Err(CouplingError::Topology(format!(
                    "macro component '{}' is wired to both '{}' and '{}'",
                    macro_component, existing, other
                )));
            }
            _ => partner = Some(other),
        }
    }

    let micro = match partner {
        None => {
            for name in resolved.keys().filter(|name| **name != macro_component) {
                warn!("[coupling] Component '{}' has no conduits and will not run", name);
            }
            None
        }
        Some(other) => {
            let (name, _) = config.model.components.get_key_value(other).ok_or_else(|| {
                CouplingError::Topology(format!("conduit refers to undeclared component '{other}'"))
            })?;
            let name = name.as_str();
            let micro_fn = match resolved.get(name) {
                Some(Implementation::Micro(f)) => *f,
                _ => {
                    return Err(CouplingError::Topology(format!(
                        "component '{name}' coupled to the macro model is not a micro model"
                    )))
                }
            };
            let has_send = conduits
                .iter()
                .any(|c| c.sender.component == macro_component && c.receiver.component == name);
            if !has_send || !has_return {
                return Err(CouplingError::Topology(format!(
                    "macro '{}' and micro '{}' need conduits in both directions",
                    macro_component, name
                )));
            }
            Some((name, micro_fn))
        }
    };

    Ok(Topology {
        macro_component,
        macro_fn,
        micro,
    })
}

/// Run the coupled model described by `config`
pub fn run_simulation(
    config: &Configuration,
    implementations: &Implementations,
) -> CouplingResult<SimulationOutcome> {
    config.validate()?;
    let topology = resolve(config, implementations)?;
    let settings = config.settings.for_component(topology.macro_component);
    for key in config.settings.scoped_outside(topology.macro_component) {
        warn!("[config] Setting '{}' is not read by any model", key);
    }

    info!(
        "[coupling] Running '{}': macro = {}, micro = {}",
        config.model.name,
        topology.macro_component,
        topology.micro.map(|(name, _)| name).unwrap_or("none")
    );

    let (trajectory, exchanges) = match topology.micro {
        Some((component, micro)) => {
            let mut conduit = MicroConduit {
                component,
                micro,
                exchanges: 0,
            };
            let trajectory = (topology.macro_fn)(&settings, &mut conduit)?;
            (trajectory, conduit.exchanges)
        }
        None => ((topology.macro_fn)(&settings, &mut Uncoupled)?, 0),
    };

    info!(
        "[coupling] Finished '{}' after {} steps, {} exchanges",
        config.model.name, trajectory.steps, exchanges
    );

    Ok(SimulationOutcome {
        model: config.model.name.clone(),
        macro_component: topology.macro_component.to_string(),
        micro_component: topology.micro.map(|(name, _)| name.to_string()),
        trajectory,
        exchanges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComponentConfig;
    use crate::diffusion::{diffusion, initial_state, DiffusionParams};

    fn run_default() -> SimulationOutcome {
        run_simulation(&Configuration::default(), &Implementations::standard()).unwrap()
    }

    fn run_with_setting(key: &str, value: f64) -> CouplingResult<SimulationOutcome> {
        let mut config = Configuration::default();
        config.settings.insert(key, value);
        run_simulation(&config, &Implementations::standard())
    }

    fn truncate(state: &Array1<f64>) -> Array1<f64> {
        state.slice(ndarray::s![1..]).to_owned()
    }

    #[test]
    fn test_standard_registry() {
        let implementations = Implementations::standard();
        assert!(implementations.contains("diffusion"));
        assert!(implementations.contains("reaction"));
        assert!(implementations.get("diffusion").unwrap().is_macro());
        assert!(!implementations.get("reaction").unwrap().is_macro());
        assert_eq!(
            implementations.names().collect::<Vec<_>>(),
            vec!["diffusion", "reaction"]
        );
    }

    #[test]
    fn test_register_replaces() {
        let mut implementations = Implementations::standard();
        let previous = implementations.register("reaction", Implementation::Micro(truncate));
        assert!(previous.is_some());
        assert!(implementations.register("other", Implementation::Micro(truncate)).is_none());
    }

    #[test]
    fn test_coupled_run() {
        let outcome = run_default();
        assert_eq!(outcome.model, "reaction_diffusion");
        assert_eq!(outcome.macro_component, "macro");
        assert_eq!(outcome.micro_component.as_deref(), Some("micro"));
        assert_eq!(outcome.trajectory.steps, 49);
        assert_eq!(outcome.exchanges, outcome.trajectory.steps);
    }

    #[test]
    fn test_coupled_matches_manual_loop() {
        let params = DiffusionParams::default();
        let mut micro = |msg: Message| -> CouplingResult<Message> {
            Ok(Message {
                data: reaction(&msg.data),
                ..msg
            })
        };
        let manual = diffusion(&params, &initial_state(&params), &mut micro).unwrap();
        let outcome = run_default();
        assert_eq!(outcome.trajectory.final_state, manual.final_state);
    }

    #[test]
    fn test_reaction_removes_mass() {
        let coupled = run_default();
        let mut config = Configuration::default();
        config.model.components.remove("micro");
        config.model.conduits.clear();
        let uncoupled = run_simulation(&config, &Implementations::standard()).unwrap();
        assert_eq!(uncoupled.exchanges, 0);
        assert!(uncoupled.micro_component.is_none());
        assert!(coupled.trajectory.final_state.sum() < uncoupled.trajectory.final_state.sum());
    }

    #[test]
    fn test_settings_reach_macro() {
        let mut config = Configuration::default();
        config.settings.insert("macro.t_max", 10.0 * crate::diffusion::constants::DT);
        let outcome = run_simulation(&config, &Implementations::standard()).unwrap();
        assert!(outcome.trajectory.steps < 49);
        assert_eq!(outcome.exchanges, outcome.trajectory.steps);
    }

    #[test]
    fn test_unknown_implementation() {
        let mut config = Configuration::default();
        config.model.components.insert(
            "micro".to_string(),
            ComponentConfig {
                implementation: "catalysis".to_string(),
            },
        );
        let err = run_simulation(&config, &Implementations::standard()).unwrap_err();
        assert!(matches!(err, CouplingError::UnknownImplementation { .. }));
    }

    #[test]
    fn test_no_macro() {
        let mut config = Configuration::default();
        config.model.components.insert(
            "macro".to_string(),
            ComponentConfig {
                implementation: "reaction".to_string(),
            },
        );
        let err = run_simulation(&config, &Implementations::standard()).unwrap_err();
        assert!(matches!(err, CouplingError::Topology(_)));
    }

    #[test]
    fn test_two_macros() {
        let mut config = Configuration::default();
        config.model.components.insert(
            "micro".to_string(),
            ComponentConfig {
                implementation: "diffusion".to_string(),
            },
        );
        let err = run_simulation(&config, &Implementations::standard()).unwrap_err();
        assert!(matches!(err, CouplingError::Topology(_)));
    }

    #[test]
    fn test_missing_return_conduit() {
        let mut config = Configuration::default();
        config.model.conduits.remove("micro.final_state");
        let err = run_simulation(&config, &Implementations::standard()).unwrap_err();
        assert!(matches!(err, CouplingError::Topology(_)));
    }

    #[test]
    fn test_conduit_between_micros_rejected() {
        let mut config = Configuration::default();
        config.model.components.insert(
            "side".to_string(),
            ComponentConfig {
                implementation: "reaction".to_string(),
            },
        );
        config
            .model
            .conduits
            .insert("side.out".to_string(), "micro.in".to_string());
        let err = run_simulation(&config, &Implementations::standard()).unwrap_err();
        assert!(matches!(err, CouplingError::Topology(_)));
    }

    #[test]
    fn test_shape_mismatch() {
        let mut implementations = Implementations::standard();
        implementations.register("reaction", Implementation::Micro(truncate));
        let err = run_simulation(&Configuration::default(), &implementations).unwrap_err();
        match err {
            CouplingError::ShapeMismatch { component, expected, got } => {
                assert_eq!(component, "micro");
                assert_eq!(expected, 101);
                assert_eq!(got, 100);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_state_rejected() {
        let mut conduit = MicroConduit {
            component: "micro",
            micro: reaction,
            exchanges: 0,
        };
        let err = conduit
            .exchange(Message {
                timestamp: 0.0,
                next_timestamp: None,
                data: Array1::zeros(0),
            })
            .unwrap_err();
        assert!(matches!(err, CouplingError::Validation(_)));
        assert_eq!(conduit.exchanges, 0);
    }

    #[test]
    fn test_summary() {
        let outcome = run_default();
        let summary = outcome.summary();
        assert_eq!(summary.final_state.len(), 101);
        assert_eq!(summary.steps, 49);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"model\":\"reaction_diffusion\""));
    }

    #[test]
    fn test_zero_dx_is_validation_error() {
        let err = run_with_setting("macro.dx", 0.0).unwrap_err();
        assert!(matches!(err, CouplingError::Validation(_)), "{err}");
    }

    #[test]
    fn test_vanishing_dx_is_validation_error() {
        let err = run_with_setting("macro.dx", 1e-300).unwrap_err();
        assert!(matches!(err, CouplingError::Validation(_)), "{err}");
    }

    #[test]
    fn test_endless_horizon_is_validation_error() {
        let err = run_with_setting("macro.t_max", 1e300).unwrap_err();
        assert!(matches!(err, CouplingError::Validation(_)), "{err}");
    }

    #[test]
    fn test_settings_for_micro_do_not_change_run() {
        let outcome = run_with_setting("micro.k", -1.0).unwrap();
        assert_eq!(outcome.trajectory.final_state, run_default().trajectory.final_state);
    }
}
