//! Reaction micro model
//!
//! First-order exponential decay applied independently to every sample,
//! advanced with fixed explicit Euler steps. There is no spatial coupling
//! here; neighbour interaction comes from the diffusion model.

use log::warn;
use ndarray::Array1;

/// Reaction constants of the tutorial model
pub mod constants {
    pub const T_MAX: f64 = 2.469136e-6; // [s]
    pub const DT: f64 = 2.469136e-8; // [s]
    pub const K: f64 = -4.05e4; // [1/s]

    /// Hard cap on decay steps for caller-supplied parameters
    pub const MAX_STEPS: usize = 10_000_000;
}

/// Time-stepping parameters for the decay loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReactionParams {
    pub t_max: f64, // Simulated horizon [s]
    pub dt: f64,    // Step size [s]
    pub k: f64,     // Decay rate [1/s]
}

impl Default for ReactionParams {
    fn default() -> Self {
        Self {
            t_max: constants::T_MAX,
            dt: constants::DT,
            k: constants::K,
        }
    }
}

/// Next time point if another step fits strictly before `t_max`.
///
/// Returns `None` once `t_cur + dt` no longer changes `t_cur`.
fn next_time(t_cur: f64, dt: f64, t_max: f64) -> Option<f64> {
    let t_next = t_cur + dt;
    (t_next < t_max && t_next != t_cur).then_some(t_next)
}

/// Drive the time loop, calling `step` once per step; returns the count.
fn run_steps(params: &ReactionParams, mut step: impl FnMut()) -> usize {
    if !(params.dt > 0.0) {
        return 0;
    }
    let mut steps = 0;
    let mut t_cur = 0.0;
    while let Some(t_next) = next_time(t_cur, params.dt, params.t_max) {
        if steps == constants::MAX_STEPS {
            warn!(
                "[reaction] Stopped after {} steps at t = {:e} < t_max = {:e}",
                steps, t_cur, params.t_max
            );
            break;
        }
        step();
        t_cur = t_next;
        steps += 1;
    }
    steps
}

/// Run the reaction model with the built-in constants.
///
/// The caller's array is left untouched; a new array of the same length is
/// returned. NaN and infinities propagate through the arithmetic as usual.
pub fn reaction(initial_state: &Array1<f64>) -> Array1<f64> {
    reaction_with(&ReactionParams::default(), initial_state)
}

/// Run the decay loop with explicit parameters
///
/// # Arguments
/// * `params` - Horizon, step size and rate
/// * `initial_state` - Samples along the line
///
/// # Returns
/// The state after every step with `t_cur + dt < t_max` has been taken,
/// up to [`constants::MAX_STEPS`] steps
pub fn reaction_with(params: &ReactionParams, initial_state: &Array1<f64>) -> Array1<f64> {
    let mut u = initial_state.to_owned();
    let (k, dt) = (params.k, params.dt);
    run_steps(params, || u.mapv_inplace(|x| x + k * x * dt));
    u
}

/// Number of steps the decay loop takes for `params`.
///
/// Replays the accumulated time counter, so floating-point drift in
/// `t_cur` is accounted for exactly as in [`reaction_with`].
pub fn step_count(params: &ReactionParams) -> usize {
    run_steps(params, || {})
}

/// Closed-form amplification `(1 + k*dt)^n` over the whole horizon
pub fn decay_factor(params: &ReactionParams) -> f64 {
    (1.0 + params.k * params.dt).powi(step_count(params) as i32)
}
