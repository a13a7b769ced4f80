// Mass-range search: walk the lower and upper mass bounds geometrically until
// nu(M_min) and nu(M_max) both sit inside their target bands.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::HaloError;

/// Closed interval of acceptable `nu` values for one end of the range.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct NuBand {
    pub low: f64,
    pub high: f64,
}

impl NuBand {
    pub fn contains(&self, nu: f64) -> bool {
        nu >= self.low && nu <= self.high
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Up,
    Down,
    Hold,
}

impl NuBand {
    fn step(&self, nu: f64) -> Step {
        if nu > self.high {
            Step::Down
        } else if nu < self.low {
            Step::Up
        } else {
            Step::Hold
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MassRangeFinder {
    pub mass_min_guess: f64,
    pub mass_max_guess: f64,
    pub min_band: NuBand,
    pub max_band: NuBand,
    /// Multiplicative step applied to a bound that is out of its band.
    pub step_factor: f64,
    /// Bound adjustments allowed before giving up.
    pub max_iterations: usize,
}

impl Default for MassRangeFinder {
    fn default() -> Self {
        Self {
            mass_min_guess: 1.0e8,
            mass_max_guess: 1.0e16,
            min_band: NuBand {
                low: 0.095,
                high: 0.105,
            },
            max_band: NuBand {
                low: 47.5,
                high: 52.5,
            },
            step_factor: 1.05,
            max_iterations: 10_000,
        }
    }
}

/// Converged mass limits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MassRange {
    pub mass_min: f64,
    pub mass_max: f64,
    pub iterations: usize,
}

impl MassRange {
    /// `points` evenly spaced values of `ln M` covering
    /// `[ln M_min - d, ln M_max + d]`, `d = (ln M_max - ln M_min) / (points - 1)`.
    pub fn ln_mass_grid(&self, points: usize) -> Result<Array1<f64>, HaloError> {
        if points < 3 {
            return Err(HaloError::InvalidParameter(format!(
                "mass grid needs at least 3 points, got {points}"
            )));
        }
        let ln_min = self.mass_min.ln();
        let ln_max = self.mass_max.ln();
        let d_ln = (ln_max - ln_min) / (points - 1) as f64;
        Ok(Array1::linspace(ln_min - d_ln, ln_max + d_ln, points))
    }
}

impl MassRangeFinder {
    pub fn validate(&self) -> Result<(), HaloError> {
        if !(self.step_factor.is_finite() && self.step_factor > 1.0) {
            return Err(HaloError::InvalidParameter(format!(
                "range step factor must be > 1, got {}",
                self.step_factor
            )));
        }
        if !(self.mass_min_guess > 0.0 && self.mass_max_guess > 0.0)
            || !(self.mass_min_guess.is_finite() && self.mass_max_guess.is_finite())
        {
            return Err(HaloError::InvalidParameter(format!(
                "initial mass guesses must be positive, got {} and {}",
                self.mass_min_guess, self.mass_max_guess
            )));
        }
        for band in [&self.min_band, &self.max_band] {
            if !(band.low.is_finite() && band.high.is_finite() && band.low < band.high) {
                return Err(HaloError::InvalidParameter(format!(
                    "nu band [{}, {}] is empty",
                    band.low, band.high
                )));
            }
        }
        Ok(())
    }

    /// Search for masses whose `nu` lands in the lower and upper bands.
    ///
    /// The lower bound is settled first; the upper bound is only examined once
    /// the lower one is in band, and the search ends when both hold at the
    /// same time. `nu_fn` is assumed increasing in mass.
    pub fn find_range<N>(&self, nu_fn: N) -> Result<MassRange, HaloError>
    where
        N: Fn(f64) -> f64,
    {
        self.validate()?;

        let mut mass_min = self.mass_min_guess;
        let mut mass_max = self.mass_max_guess;
        let mut iterations = 0usize;

        let fail = |iterations, mass_min, mass_max, reason| HaloError::RangeNotFound {
            iterations,
            mass_min,
            mass_max,
            reason,
        };

        loop {
            if iterations >= self.max_iterations {
                return Err(fail(iterations, mass_min, mass_max, "iteration cap reached"));
            }

            let nu_low = nu_fn(mass_min);
            if !nu_low.is_finite() {
                return Err(fail(iterations, mass_min, mass_max, "non-finite nu at lower bound"));
            }
            match self.min_band.step(nu_low) {
                Step::Up => {
                    trace!(mass_min, nu = nu_low, "lower mass limit too low");
                    mass_min *= self.step_factor;
                    iterations += 1;
                    continue;
                }
                Step::Down => {
                    trace!(mass_min, nu = nu_low, "lower mass limit too high");
                    mass_min /= self.step_factor;
                    iterations += 1;
                    continue;
                }
                Step::Hold => {}
            }

            let nu_high = nu_fn(mass_max);
            if !nu_high.is_finite() {
                return Err(fail(iterations, mass_min, mass_max, "non-finite nu at upper bound"));
            }
            match self.max_band.step(nu_high) {
                Step::Up => {
                    trace!(mass_max, nu = nu_high, "upper mass limit too low");
                    mass_max *= self.step_factor;
                    iterations += 1;
                }
                Step::Down => {
                    trace!(mass_max, nu = nu_high, "upper mass limit too high");
                    mass_max /= self.step_factor;
                    iterations += 1;
                }
                Step::Hold => break,
            }
        }

        if mass_min >= mass_max {
            return Err(fail(iterations, mass_min, mass_max, "bounds crossed"));
        }

        debug!(iterations, "mass range converged");
        info!("Mass limits: {:e} - {:e}", mass_min, mass_max);
        Ok(MassRange {
            mass_min,
            mass_max,
            iterations,
        })
    }
}
