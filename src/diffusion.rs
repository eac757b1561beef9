//! Diffusion macro model
//!
//! Explicit finite-difference diffusion on a 1D grid. The model owns the
//! time loop: before every diffusion step the current state is handed to the
//! coupled micro model and replaced by whatever comes back.

use log::{debug, info, warn};
use ndarray::{s, stack, Array1, ArrayView1, Axis};

use crate::config::Settings;
use crate::coupling::{Message, MicroExchange, Trajectory};
use crate::error::{CouplingError, CouplingResult};

/// Diffusion constants of the tutorial model
pub mod constants {
    pub const T_MAX: f64 = 1.234568e-4; // [s]
    pub const DT: f64 = 2.469136e-6; // [s]
    pub const X_MAX: f64 = 1.01; // Domain length [m]
    pub const DX: f64 = 0.01; // Grid spacing [m]
    pub const D: f64 = 4.05e-2; // Diffusion coefficient [m²/s]

    /// Background level of the initial profile
    pub const BACKGROUND: f64 = 1e-20;
    /// Grid indices that start with a spike
    pub const SPIKES: [usize; 3] = [25, 50, 75];
    pub const SPIKE_HEIGHT: f64 = 2.0;

    // Limits enforced by `DiffusionParams::validate` and `diffusion`
    pub const MAX_GRID_POINTS: usize = 10_000_000;
    pub const MAX_STEPS: usize = 1_000_000;
    /// Upper bound on `grid points * (steps + 1)` kept in the history
    pub const MAX_HISTORY_SAMPLES: usize = 100_000_000;
}

/// Setting names read by [`DiffusionParams::from_settings`]
pub const SETTING_NAMES: [&str; 5] = ["t_max", "dt", "x_max", "dx", "d"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffusionParams {
    pub t_max: f64,
    pub dt: f64,
    pub x_max: f64,
    pub dx: f64,
    pub d: f64,
}

impl Default for DiffusionParams {
    fn default() -> Self {
        Self {
            t_max: constants::T_MAX,
            dt: constants::DT,
            x_max: constants::X_MAX,
            dx: constants::DX,
            d: constants::D,
        }
    }
}

impl DiffusionParams {
    /// Read parameters from component settings, keeping defaults for
    /// anything not set.
    pub fn from_settings(settings: &Settings) -> Self {
        for name in settings.unknown_names(&SETTING_NAMES) {
            warn!("[config] Setting '{}' is not used by the diffusion model", name);
        }
        let defaults = Self::default();
        Self {
            t_max: settings.get_or("t_max", defaults.t_max),
            dt: settings.get_or("dt", defaults.dt),
            x_max: settings.get_or("x_max", defaults.x_max),
            dx: settings.get_or("dx", defaults.dx),
            d: settings.get_or("d", defaults.d),
        }
    }

    /// Number of grid points, `round(x_max / dx)`, clamped to
    /// [`constants::MAX_GRID_POINTS`]
    pub fn grid_len(&self) -> usize {
        let points = (self.x_max / self.dx).round();
        if !points.is_finite() || points <= 0.0 {
            return 0;
        }
        points.min(constants::MAX_GRID_POINTS as f64) as usize
    }

    /// Rough number of time steps, `t_max / dt`
    fn step_estimate(&self) -> f64 {
        (self.t_max / self.dt).max(0.0)
    }

    pub fn validate(&self) -> CouplingResult<()> {
        for (name, value) in [
            ("t_max", self.t_max),
            ("dt", self.dt),
            ("x_max", self.x_max),
            ("dx", self.dx),
            ("d", self.d),
        ] {
            if !value.is_finite() {
                return Err(CouplingError::Validation(format!(
                    "diffusion parameter {name} must be finite, got {value}"
                )));
            }
        }
        if self.dt <= 0.0 {
            return Err(CouplingError::Validation(format!(
                "diffusion dt must be > 0, got {}",
                self.dt
            )));
        }
        if self.dx <= 0.0 {
            return Err(CouplingError::Validation(format!(
                "diffusion dx must be > 0, got {}",
                self.dx
            )));
        }
        let points = self.x_max / self.dx;
        if !points.is_finite() || points > constants::MAX_GRID_POINTS as f64 {
            return Err(CouplingError::Validation(format!(
                "x_max / dx = {points:e} exceeds {} grid points",
                constants::MAX_GRID_POINTS
            )));
        }
        let steps = self.step_estimate();
        if !steps.is_finite() || steps > constants::MAX_STEPS as f64 {
            return Err(CouplingError::Validation(format!(
                "t_max / dt = {steps:e} exceeds {} steps",
                constants::MAX_STEPS
            )));
        }
        Ok(())
    }
}

/// Background profile with a few spikes
pub fn initial_state(params: &DiffusionParams) -> Array1<f64> {
    let mut u = Array1::from_elem(params.grid_len(), constants::BACKGROUND);
    for &i in constants::SPIKES.iter() {
        if let Some(x) = u.get_mut(i) {
            *x = constants::SPIKE_HEIGHT;
        }
    }
    u
}

/// Second-order central difference on the interior points.
///
/// Returns `N - 2` values; callers must pass at least 3 samples.
pub fn laplacian(z: ArrayView1<'_, f64>, dx: f64) -> Array1<f64> {
    let left = z.slice(s![..-2]);
    let right = z.slice(s![2..]);
    let center = z.slice(s![1..-1]);
    (&left + &right - 2.0 * &center) / dx.powi(2)
}

/// Next time point if another step fits within `t_max`.
///
/// Returns `None` once `t_cur + dt` no longer changes `t_cur`.
fn next_time(t_cur: f64, dt: f64, t_max: f64) -> Option<f64> {
    let t_next = t_cur + dt;
    (t_next <= t_max && t_next != t_cur).then_some(t_next)
}

/// Run the diffusion time loop, exchanging state with `micro` each step.
pub fn diffusion(
    params: &DiffusionParams,
    initial: &Array1<f64>,
    micro: &mut dyn MicroExchange,
) -> CouplingResult<Trajectory> {
    params.validate()?;
    let n = initial.len();
    if n < 3 {
        return Err(CouplingError::Validation(format!(
            "diffusion grid needs at least 3 points, got {n}"
        )));
    }
    let samples = n as f64 * (params.step_estimate() + 1.0);
    if samples > constants::MAX_HISTORY_SAMPLES as f64 {
        return Err(CouplingError::Validation(format!(
            "history of {samples:e} samples exceeds {}",
            constants::MAX_HISTORY_SAMPLES
        )));
    }

    let mut u = initial.to_owned();
    let mut history = vec![u.clone()];
    let mut du = Array1::<f64>::zeros(n);

    let mut t_cur = 0.0;
    let mut steps = 0;
    while let Some(t_next) = next_time(t_cur, params.dt, params.t_max) {
        let reply = micro.exchange(Message {
            timestamp: t_cur,
            next_timestamp: Some(t_next),
            data: u,
        })?;
        u = reply.data;

        let lap = laplacian(u.view(), params.dx);
        du.slice_mut(s![1..n - 1]).assign(&(params.d * &lap));
        du[0] = du[1];
        du[n - 1] = du[n - 2];

        u.scaled_add(params.dt, &du);
        history.push(u.clone());
        t_cur = t_next;
        steps += 1;
    }

    debug!("[diffusion] {} steps, t_end = {:e}", steps, t_cur);

    let views: Vec<ArrayView1<'_, f64>> = history.iter().map(|row| row.view()).collect();
    let history = stack(Axis(0), &views)
        .map_err(|e| CouplingError::Validation(format!("inconsistent state history: {e}")))?;

    Ok(Trajectory {
        final_state: u,
        history,
        t_end: t_cur,
        steps,
    })
}

/// Registered entry point for the `diffusion` implementation
pub fn diffusion_model(
    settings: &Settings,
    micro: &mut dyn MicroExchange,
) -> CouplingResult<Trajectory> {
    let params = DiffusionParams::from_settings(settings);
    params.validate()?;
    info!(
        "[diffusion] {} points, dt = {:e}, t_max = {:e}",
        params.grid_len(),
        params.dt,
        params.t_max
    );
    diffusion(&params, &initial_state(&params), micro)
}
