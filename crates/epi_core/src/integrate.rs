use crate::error::{EpiError, EpiResult};
use crate::solvers::{DormandPrince, Euler, RK4};
use crate::traits::{DynamicalSystem, Steppable};
use crate::trajectory::Trajectory;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum IntegrationMethod {
    /// Adaptive Dormand-Prince 5(4) with rtol/atol error control.
    #[default]
    DormandPrince,
    /// Classic RK4 with at most `step` per internal step.
    Rk4 { step: f64 },
    /// Forward Euler with at most `step` per internal step.
    Euler { step: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSettings {
    pub method: IntegrationMethod,
    pub rtol: f64,
    pub atol: f64,
    /// First adaptive step; `0.0` picks one from the initial derivative.
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    /// Budget of internal steps (accepted and rejected) for the whole run.
    pub max_steps: usize,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            method: IntegrationMethod::default(),
            rtol: 1e-6,
            atol: 1e-9,
            initial_step: 0.0,
            min_step: 1e-12,
            max_step: f64::INFINITY,
            max_steps: 100_000,
        }
    }
}

impl IntegrationSettings {
    pub fn validate(&self) -> EpiResult<()> {
        if !(self.rtol.is_finite() && self.rtol > 0.0) {
            return Err(EpiError::invalid("rtol must be finite and positive"));
        }
        if !(self.atol.is_finite() && self.atol > 0.0) {
            return Err(EpiError::invalid("atol must be finite and positive"));
        }
        if !(self.initial_step.is_finite() && self.initial_step >= 0.0) {
            return Err(EpiError::invalid("initial_step must be finite and non-negative"));
        }
        if !(self.min_step > 0.0) {
            return Err(EpiError::invalid("min_step must be positive"));
        }
        if !(self.max_step >= self.min_step) {
            return Err(EpiError::invalid("max_step must be at least min_step"));
        }
        if self.max_steps == 0 {
            return Err(EpiError::invalid("max_steps must be greater than zero"));
        }
        match self.method {
            IntegrationMethod::Rk4 { step } | IntegrationMethod::Euler { step }
                if !(step.is_finite() && step > 0.0) =>
            {
                Err(EpiError::invalid("fixed step must be finite and positive"))
            }
            _ => Ok(()),
        }
    }
}

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

/// Integrates `system` from `initial_state` at `time_points[0]` and samples the
/// solution at every requested time point.
///
/// Internal steps are clamped so each requested time is hit exactly; the first
/// returned state is `initial_state` itself. The system is only read, so one
/// system can serve several concurrent integrations.
pub fn integrate<S>(
    system: &S,
    initial_state: &[f64],
    time_points: &[f64],
    settings: &IntegrationSettings,
) -> EpiResult<Trajectory>
where
    S: DynamicalSystem<f64>,
{
    settings.validate()?;
    let dim = system.dimension();
    if initial_state.len() != dim {
        return Err(EpiError::shape("initial state", dim, initial_state.len()));
    }
    if initial_state.iter().any(|v| !v.is_finite()) {
        return Err(EpiError::invalid("initial state must be finite"));
    }
    validate_time_points(time_points)?;

    debug!(
        dimension = dim,
        points = time_points.len(),
        method = ?settings.method,
        "integrating"
    );

    let mut run = Run {
        system,
        settings,
        state: initial_state.to_vec(),
        t: time_points[0],
        steps: 0,
        rejected: 0,
    };
    let mut states = Vec::with_capacity(time_points.len());
    states.push(run.state.clone());

    let result: EpiResult<()> = match settings.method {
        IntegrationMethod::DormandPrince => {
            let mut solver = DormandPrince::<f64>::new(dim);
            let mut h = run.initial_step(time_points);
            time_points[1..].iter().try_for_each(|&target| {
                h = run.adaptive_to(&mut solver, target, h)?;
                states.push(run.state.clone());
                Ok(())
            })
        }
        IntegrationMethod::Rk4 { step } => {
            let mut solver = RK4::<f64>::new(dim);
            time_points[1..].iter().try_for_each(|&target| {
                run.fixed_to(&mut solver, target, step)?;
                states.push(run.state.clone());
                Ok(())
            })
        }
        IntegrationMethod::Euler { step } => {
            let mut solver = Euler::<f64>::new(dim);
            time_points[1..].iter().try_for_each(|&target| {
                run.fixed_to(&mut solver, target, step)?;
                states.push(run.state.clone());
                Ok(())
            })
        }
    };

    if let Err(err) = result {
        warn!(steps = run.steps, error = %err, "integration failed");
        return Err(err);
    }

    debug!(steps = run.steps, rejected = run.rejected, "integration finished");
    Ok(Trajectory::new(time_points.to_vec(), states))
}

fn validate_time_points(time_points: &[f64]) -> EpiResult<()> {
    if time_points.is_empty() {
        return Err(EpiError::invalid("time_points must not be empty"));
    }
    if time_points.iter().any(|t| !t.is_finite()) {
        return Err(EpiError::invalid("time_points must be finite"));
    }
    if time_points.windows(2).any(|w| w[1] <= w[0]) {
        return Err(EpiError::invalid("time_points must be strictly increasing"));
    }
    Ok(())
}

struct Run<'a, S> {
    system: &'a S,
    settings: &'a IntegrationSettings,
    state: Vec<f64>,
    t: f64,
    steps: usize,
    rejected: usize,
}

impl<S: DynamicalSystem<f64>> Run<'_, S> {
    fn charge_step(&mut self) -> EpiResult<()> {
        if self.steps >= self.settings.max_steps {
            return Err(EpiError::Integration {
                time: self.t,
                reason: format!("step budget of {} exhausted", self.settings.max_steps),
            });
        }
        self.steps += 1;
        Ok(())
    }

    fn check_finite(&self, values: &[f64]) -> EpiResult<()> {
        if values.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(EpiError::Integration {
                time: self.t,
                reason: "vector field produced a non-finite value".to_string(),
            })
        }
    }

    /// Equal sub-steps no longer than `step` covering `[t, target]`.
    fn fixed_to(
        &mut self,
        solver: &mut impl Steppable<f64>,
        target: f64,
        step: f64,
    ) -> EpiResult<()> {
        let span = target - self.t;
        let count = (span / step).ceil().max(1.0) as usize;
        let h = span / count as f64;
        for _ in 0..count {
            self.charge_step()?;
            solver.step(self.system, &mut self.t, &mut self.state, h);
            self.check_finite(&self.state)?;
        }
        self.t = target;
        Ok(())
    }

    /// Adaptive steps until `target`; returns the step size to try next.
    fn adaptive_to(
        &mut self,
        solver: &mut DormandPrince<f64>,
        target: f64,
        mut h: f64,
    ) -> EpiResult<f64> {
        let settings = self.settings;
        let exponent = -1.0 / (DormandPrince::<f64>::ERROR_ORDER + 1) as f64;

        while self.t < target {
            let remaining = target - self.t;
            let clamped = h >= remaining;
            let dt = if clamped { remaining } else { h };

            self.charge_step()?;
            let err = solver.attempt(
                self.system,
                self.t,
                &self.state,
                dt,
                settings.rtol,
                settings.atol,
            );
            self.check_finite(solver.proposal())?;
            if !err.is_finite() {
                return Err(EpiError::Integration {
                    time: self.t,
                    reason: "error estimate is not finite".to_string(),
                });
            }

            let factor = if err == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * err.powf(exponent)).clamp(MIN_FACTOR, MAX_FACTOR)
            };

            if err <= 1.0 {
                self.state.copy_from_slice(solver.proposal());
                self.t = if clamped { target } else { self.t + dt };
                let next = dt * factor;
                h = if clamped { h.max(next) } else { next };
            } else {
                self.rejected += 1;
                trace!(t = self.t, dt, err, "rejected step");
                h = dt * factor.min(1.0);
            }

            h = h.min(settings.max_step);
            if h < settings.min_step {
                return Err(EpiError::Integration {
                    time: self.t,
                    reason: format!(
                        "step size {h:e} fell below min_step {:e}",
                        settings.min_step
                    ),
                });
            }
        }
        Ok(h)
    }

    /// Starting step from the scaled size of the state and its derivative.
    fn initial_step(&self, time_points: &[f64]) -> f64 {
        let settings = self.settings;
        let span = time_points[time_points.len() - 1] - time_points[0];
        let bound = settings.max_step.min(span.max(settings.min_step));
        if settings.initial_step > 0.0 {
            return settings.initial_step.min(bound).max(settings.min_step);
        }

        let mut derivative = vec![0.0; self.state.len()];
        self.system.apply(self.t, &self.state, &mut derivative);
        let rms = |values: &[f64]| {
            if values.is_empty() {
                return 0.0;
            }
            let sum: f64 = values
                .iter()
                .zip(&self.state)
                .map(|(v, y)| {
                    let scaled = v / (settings.atol + settings.rtol * y.abs());
                    scaled * scaled
                })
                .sum();
            (sum / values.len() as f64).sqrt()
        };
        let d0 = rms(&self.state);
        let d1 = rms(&derivative);
        let h0 = if d0 < 1e-5 || d1 < 1e-5 || !d1.is_finite() {
            1e-6
        } else {
            0.01 * d0 / d1
        };
        h0.min(bound).max(settings.min_step)
    }
}
