// Tinker et al. (2008) abundance. f(nu) is built from sigma(M) and its
// derivative, which are expensive in a real cosmology, so ln f is tabulated
// once over the grid nu values and interpolated afterwards.

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::mass_function::{AbundanceForm, ModelContext};
use crate::params::{HaloCoefficients, TinkerFit, TinkerParams};
use crate::spline::MonotoneCubicSpline;
use crate::HaloError;

#[derive(Debug, Default)]
pub struct Tinker {
    params: TinkerParams,
    ln_f_nu: OnceCell<MonotoneCubicSpline>,
    builds: AtomicUsize,
}

impl Tinker {
    pub fn new(params: TinkerParams) -> Self {
        Self {
            params,
            ln_f_nu: OnceCell::new(),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn params(&self) -> &TinkerParams {
        &self.params
    }

    /// Fitting function of the density variance. The default fit is
    /// `A0^((sigma / b0)^-a0 + 1) exp(-c0 / sigma^2)` with `c0` taken from
    /// the resolved halo coefficients.
    pub fn f_sigma(&self, sigma: f64, coefficients: &HaloCoefficients) -> f64 {
        let TinkerParams {
            amplitude,
            a0,
            b0,
            c,
            fit,
        } = self.params;
        let shape = (sigma / b0).powf(-a0) + 1.0;
        let sigma2 = sigma * sigma;
        match fit {
            TinkerFit::PowerAmplitude => amplitude.powf(shape) * (-coefficients.c0 / sigma2).exp(),
            TinkerFit::Published => amplitude * shape * (-c / sigma2).exp(),
        }
    }

    /// Unnormalized `f(nu)` evaluated straight from the cosmology, bypassing
    /// the cached spline.
    pub fn direct_f_nu(&self, ctx: &ModelContext<'_>, nu: f64) -> Result<f64, HaloError> {
        let mass = ctx.mapping.mass(nu)?;
        self.f_at_mass(ctx, mass)
    }

    /// Whether the log-abundance spline has been built.
    pub fn is_cached(&self) -> bool {
        self.ln_f_nu.get().is_some()
    }

    /// Number of times the cache builder has run.
    pub fn cache_builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn f_at_mass(&self, ctx: &ModelContext<'_>, mass: f64) -> Result<f64, HaloError> {
        let cosmology = ctx.cosmology;
        let sigma = cosmology.sigma_m(mass);
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(HaloError::Domain(format!(
                "sigma({mass:e}) = {sigma} is not a positive number"
            )));
        }
        // Jacobian from sigma space: rho_bar / M * (-1 / sigma) * dsigma/dM.
        Ok(self.f_sigma(sigma, ctx.coefficients) * cosmology.rho_bar() / mass
            * (-1.0 / sigma)
            * cosmology.sigma_m_prime(mass))
    }

    fn cached_spline(&self, ctx: &ModelContext<'_>) -> Result<&MonotoneCubicSpline, HaloError> {
        self.ln_f_nu.get_or_try_init(|| self.build_cache(ctx))
    }

    // Stays serial: concurrent first callers may be rayon workers parked in
    // get_or_try_init.
    fn build_cache(&self, ctx: &ModelContext<'_>) -> Result<MonotoneCubicSpline, HaloError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let ln_f = ctx
            .mapping
            .ln_mass_samples()
            .iter()
            .map(|ln_mass| {
                let mass = ln_mass.exp();
                let f = self.f_at_mass(ctx, mass)?;
                if f.is_finite() && f > 0.0 {
                    Ok(f.ln())
                } else {
                    Err(HaloError::Domain(format!(
                        "Tinker abundance at mass {mass:e} is {f}, cannot take its log"
                    )))
                }
            })
            .collect::<Result<Vec<_>, HaloError>>()?;
        let nu = ctx.mapping.nu_samples().to_vec();
        let spline = MonotoneCubicSpline::new(&nu, &ln_f)?;
        debug!(samples = nu.len(), "Tinker log-abundance spline built");
        Ok(spline)
    }
}

impl AbundanceForm for Tinker {
    fn name(&self) -> &'static str {
        "tinker"
    }

    fn unnormalized_f_nu(&self, ctx: &ModelContext<'_>, nu: f64) -> Result<f64, HaloError> {
        ctx.mapping.check_nu_support(nu)?;
        Ok(self.cached_spline(ctx)?.eval(nu).exp())
    }

    fn breakpoints(&self, ctx: &ModelContext<'_>) -> Vec<f64> {
        ctx.mapping.nu_samples().to_vec()
    }
}
