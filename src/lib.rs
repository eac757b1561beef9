//! Reaction-Diffusion Coupling Library
//!
//! Two toy submodels, a diffusion macro model and a reaction micro model,
//! plus a small in-process coupler that wires them together from a model
//! description.

pub mod config;
pub mod coupling;
pub mod diffusion;
pub mod error;
pub mod logging;
pub mod reaction;

pub use config::{Configuration, Settings};
pub use coupling::{
    run_simulation, Implementation, Implementations, Message, SimulationOutcome, Trajectory,
};
pub use error::{CouplingError, CouplingResult};
pub use reaction::reaction;
