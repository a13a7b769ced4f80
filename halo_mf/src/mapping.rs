// Tabulated nu on the log-mass grid and the two splines between them.

use ndarray::Array1;
use rayon::prelude::*;
use tracing::debug;

use crate::cosmology::Cosmology;
use crate::range::MassRange;
use crate::spline::MonotoneCubicSpline;
use crate::HaloError;

// Slack on support checks so grid endpoints survive an exp/ln round trip.
const SUPPORT_SLACK: f64 = 1e-9;

/// Bidirectional mass <-> nu mapping for one cosmology.
#[derive(Clone, Debug)]
pub struct MassNuMapping {
    range: MassRange,
    ln_mass: Array1<f64>,
    nu: Array1<f64>,
    nu_of_ln_mass: MonotoneCubicSpline,
    ln_mass_of_nu: MonotoneCubicSpline,
    nu_min: f64,
    nu_max: f64,
    m_star: f64,
}

impl MassNuMapping {
    /// Sample `nu` on a `points`-long log-mass grid over `range` and build
    /// both splines. Fails with `NonInvertibleRange` unless the samples are
    /// strictly increasing.
    pub fn build(
        cosmology: &dyn Cosmology,
        range: MassRange,
        points: usize,
    ) -> Result<Self, HaloError> {
        let ln_mass = range.ln_mass_grid(points)?;
        let ln_mass_vec = ln_mass.to_vec();
        let nu_vec: Vec<f64> = ln_mass_vec
            .par_iter()
            .map(|&ln_m| cosmology.nu_m(ln_m.exp()))
            .collect();

        check_strictly_increasing(&nu_vec)?;

        let nu_of_ln_mass = MonotoneCubicSpline::new(&ln_mass_vec, &nu_vec)?;
        let ln_mass_of_nu = MonotoneCubicSpline::new(&nu_vec, &ln_mass_vec)?;

        let nu_min = 1.001 * nu_vec[0];
        let nu_max = 0.999 * nu_vec[nu_vec.len() - 1];
        if nu_min >= nu_max {
            return Err(HaloError::NonInvertibleRange {
                index: nu_vec.len() - 1,
                previous: nu_min,
                current: nu_max,
            });
        }
        debug!(nu_min, nu_max, "nu bounds");

        let mut mapping = Self {
            range,
            ln_mass,
            nu: Array1::from_vec(nu_vec),
            nu_of_ln_mass,
            ln_mass_of_nu,
            nu_min,
            nu_max,
            m_star: f64::NAN,
        };
        mapping.m_star = mapping.mass(1.0)?;
        Ok(mapping)
    }

    /// `nu` at `mass`; the mass must lie inside the sampled grid.
    pub fn nu(&self, mass: f64) -> Result<f64, HaloError> {
        if !(mass.is_finite() && mass > 0.0) {
            return Err(HaloError::Domain(format!("mass must be positive, got {mass}")));
        }
        let ln_m = mass.ln();
        if !within(ln_m, self.nu_of_ln_mass.domain()) {
            let (lo, hi) = self.nu_of_ln_mass.domain();
            return Err(HaloError::Domain(format!(
                "mass {mass:e} outside fitted support [{:e}, {:e}]",
                lo.exp(),
                hi.exp()
            )));
        }
        Ok(self.nu_of_ln_mass.eval(ln_m))
    }

    /// `ln M` at `nu`; `nu` must lie inside the sampled range.
    pub fn ln_mass(&self, nu: f64) -> Result<f64, HaloError> {
        self.check_nu_support(nu)?;
        Ok(self.ln_mass_of_nu.eval(nu))
    }

    pub fn mass(&self, nu: f64) -> Result<f64, HaloError> {
        Ok(self.ln_mass(nu)?.exp())
    }

    pub fn contains_nu(&self, nu: f64) -> bool {
        nu.is_finite() && within(nu, self.ln_mass_of_nu.domain())
    }

    pub(crate) fn check_nu_support(&self, nu: f64) -> Result<(), HaloError> {
        if self.contains_nu(nu) {
            Ok(())
        } else {
            let (lo, hi) = self.ln_mass_of_nu.domain();
            Err(HaloError::Domain(format!(
                "nu {nu} outside fitted support [{lo}, {hi}]"
            )))
        }
    }

    pub fn range(&self) -> &MassRange {
        &self.range
    }

    pub fn ln_mass_samples(&self) -> &Array1<f64> {
        &self.ln_mass
    }

    pub fn nu_samples(&self) -> &Array1<f64> {
        &self.nu
    }

    pub fn len(&self) -> usize {
        self.ln_mass.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ln_mass.is_empty()
    }

    /// Lower integration limit, 0.1% above the first sampled nu.
    pub fn nu_min(&self) -> f64 {
        self.nu_min
    }

    /// Upper integration limit, 0.1% below the last sampled nu.
    pub fn nu_max(&self) -> f64 {
        self.nu_max
    }

    /// Mass at which nu == 1.
    pub fn m_star(&self) -> f64 {
        self.m_star
    }
}

fn within(value: f64, (lo, hi): (f64, f64)) -> bool {
    let slack = SUPPORT_SLACK * lo.abs().max(hi.abs()).max(1.0);
    value >= lo - slack && value <= hi + slack
}

fn check_strictly_increasing(nu: &[f64]) -> Result<(), HaloError> {
    for (index, pair) in nu.windows(2).enumerate() {
        let (previous, current) = (pair[0], pair[1]);
        if !(previous.is_finite() && current.is_finite()) || current <= previous {
            return Err(HaloError::NonInvertibleRange {
                index: index + 1,
                previous,
                current,
            });
        }
    }
    Ok(())
}
