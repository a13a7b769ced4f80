//! Normalized halo abundance and bias over a cosmology's mass range.
//!
//! Construction is a single pipeline shared by every abundance form: find the
//! mass range, tabulate `nu`, build the mass/nu splines, then normalize the
//! abundance and the bias-weighted abundance by quadrature. The form only
//! supplies the unnormalized `f(nu)` and `b(nu)`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::cosmology::Cosmology;
use crate::mapping::MassNuMapping;
use crate::params::{HaloCoefficients, HaloModelParams, ModelOptions, TinkerParams};
use crate::quadrature::{integrate, QuadratureConfig};
use crate::tinker::Tinker;
use crate::HaloError;

/// Read-only view handed to an [`AbundanceForm`] while it is evaluated.
#[derive(Clone, Copy)]
pub struct ModelContext<'a> {
    pub cosmology: &'a dyn Cosmology,
    pub mapping: &'a MassNuMapping,
    pub coefficients: &'a HaloCoefficients,
    pub delta_c: f64,
}

/// Functional form of the halo abundance (and, optionally, bias).
pub trait AbundanceForm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Unnormalized `f(nu)`. Called only with `nu > 0`.
    fn unnormalized_f_nu(&self, ctx: &ModelContext<'_>, nu: f64) -> Result<f64, HaloError>;

    /// Unnormalized `b(nu)`; Sheth-Tormen peak-background split by default.
    fn unnormalized_bias_nu(&self, ctx: &ModelContext<'_>, nu: f64) -> Result<f64, HaloError> {
        Ok(sheth_tormen_bias(nu, ctx.delta_c, ctx.coefficients))
    }

    /// Points where the integrand is not smooth, used to seed the
    /// normalization quadrature.
    fn breakpoints(&self, _ctx: &ModelContext<'_>) -> Vec<f64> {
        Vec::new()
    }
}

/// Sheth-Tormen `f(nu) = (1 + (a nu)^-p) sqrt(a nu) exp(-a nu / 2) / nu`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShethTormen;

impl AbundanceForm for ShethTormen {
    fn name(&self) -> &'static str {
        "sheth-tormen"
    }

    fn unnormalized_f_nu(&self, ctx: &ModelContext<'_>, nu: f64) -> Result<f64, HaloError> {
        let p = ctx.coefficients.stq;
        let nu_prime = nu * ctx.coefficients.st_little_a;
        Ok((1.0 + nu_prime.powf(-p)) * nu_prime.sqrt() * (-0.5 * nu_prime).exp() / nu)
    }
}

pub(crate) fn sheth_tormen_bias(nu: f64, delta_c: f64, coefficients: &HaloCoefficients) -> f64 {
    let p = coefficients.stq;
    let nu_prime = nu * coefficients.st_little_a;
    1.0 + (nu - 1.0) / delta_c + 2.0 * p / (delta_c * (1.0 + nu_prime.powf(p)))
}

/// One line of the tabulated output.
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
pub struct MassFunctionRow {
    pub mass: f64,
    pub nu: f64,
    pub f_nu: f64,
    pub bias_nu: f64,
}

/// Halo mass function for cosmology `C` with abundance form `F`.
#[derive(Debug)]
pub struct MassFunction<C, F = ShethTormen> {
    cosmology: C,
    form: F,
    mapping: MassNuMapping,
    coefficients: HaloCoefficients,
    redshift: f64,
    delta_c: f64,
    f_norm: f64,
    bias_norm: f64,
}

pub type ShethTormenMassFunction<C> = MassFunction<C, ShethTormen>;
pub type TinkerMassFunction<C> = MassFunction<C, Tinker>;

impl<C: Cosmology> MassFunction<C, ShethTormen> {
    pub fn sheth_tormen(cosmology: C, params: &HaloModelParams) -> Result<Self, HaloError> {
        Self::new(cosmology, ShethTormen, params)
    }
}

impl<C: Cosmology> MassFunction<C, Tinker> {
    pub fn tinker(
        cosmology: C,
        params: &HaloModelParams,
        tinker: TinkerParams,
    ) -> Result<Self, HaloError> {
        Self::new(cosmology, Tinker::new(tinker), params)
    }
}

impl<C: Cosmology, F: AbundanceForm> MassFunction<C, F> {
    pub fn new(cosmology: C, form: F, params: &HaloModelParams) -> Result<Self, HaloError> {
        Self::with_options(cosmology, form, params, &ModelOptions::default())
    }

    pub fn with_options(
        cosmology: C,
        form: F,
        params: &HaloModelParams,
        options: &ModelOptions,
    ) -> Result<Self, HaloError> {
        let coefficients = params.resolve(options.redshift)?;
        let delta_c = cosmology.delta_c();
        if !(delta_c.is_finite() && delta_c > 0.0) {
            return Err(HaloError::InvalidParameter(format!(
                "delta_c must be positive, got {delta_c}"
            )));
        }

        let range = options.range.find_range(|mass| cosmology.nu_m(mass))?;
        let mapping = MassNuMapping::build(&cosmology, range, options.grid_points)?;

        let (f_norm, bias_norm) = {
            let ctx = ModelContext {
                cosmology: &cosmology,
                mapping: &mapping,
                coefficients: &coefficients,
                delta_c,
            };
            normalize(&form, &ctx, &options.quadrature)?
        };

        info!(
            form = form.name(),
            m_star = mapping.m_star(),
            f_norm,
            bias_norm,
            "mass function ready"
        );

        Ok(Self {
            cosmology,
            form,
            mapping,
            coefficients,
            redshift: options.redshift,
            delta_c,
            f_norm,
            bias_norm,
        })
    }

    fn context(&self) -> ModelContext<'_> {
        ModelContext {
            cosmology: &self.cosmology,
            mapping: &self.mapping,
            coefficients: &self.coefficients,
            delta_c: self.delta_c,
        }
    }

    /// Normalized abundance per unit `nu`.
    pub fn f_nu(&self, nu: f64) -> Result<f64, HaloError> {
        check_positive_nu(nu)?;
        Ok(self.f_norm * self.form.unnormalized_f_nu(&self.context(), nu)?)
    }

    pub fn f_m(&self, mass: f64) -> Result<f64, HaloError> {
        self.f_nu(self.nu(mass)?)
    }

    /// Normalized halo bias.
    pub fn bias_nu(&self, nu: f64) -> Result<f64, HaloError> {
        check_positive_nu(nu)?;
        Ok(self.bias_norm * self.form.unnormalized_bias_nu(&self.context(), nu)?)
    }

    pub fn bias_m(&self, mass: f64) -> Result<f64, HaloError> {
        self.bias_nu(self.nu(mass)?)
    }

    pub fn nu(&self, mass: f64) -> Result<f64, HaloError> {
        self.mapping.nu(mass)
    }

    pub fn ln_mass(&self, nu: f64) -> Result<f64, HaloError> {
        self.mapping.ln_mass(nu)
    }

    pub fn mass(&self, nu: f64) -> Result<f64, HaloError> {
        self.mapping.mass(nu)
    }

    pub fn m_star(&self) -> f64 {
        self.mapping.m_star()
    }

    pub fn nu_min(&self) -> f64 {
        self.mapping.nu_min()
    }

    pub fn nu_max(&self) -> f64 {
        self.mapping.nu_max()
    }

    pub fn f_norm(&self) -> f64 {
        self.f_norm
    }

    pub fn bias_norm(&self) -> f64 {
        self.bias_norm
    }

    pub fn delta_c(&self) -> f64 {
        self.delta_c
    }

    pub fn redshift(&self) -> f64 {
        self.redshift
    }

    pub fn coefficients(&self) -> &HaloCoefficients {
        &self.coefficients
    }

    pub fn mapping(&self) -> &MassNuMapping {
        &self.mapping
    }

    pub fn form(&self) -> &F {
        &self.form
    }

    pub fn cosmology(&self) -> &C {
        &self.cosmology
    }

    /// `M* = 10^X M_sun`.
    pub fn summary_line(&self) -> String {
        format!("M* = 10^{:.4} M_sun", self.m_star().log10())
    }

    /// Grid samples in ascending mass with the normalized abundance and bias.
    pub fn rows(&self) -> Result<Vec<MassFunctionRow>, HaloError> {
        self.mapping
            .ln_mass_samples()
            .iter()
            .zip(self.mapping.nu_samples().iter())
            .map(|(&ln_mass, &nu)| {
                Ok(MassFunctionRow {
                    mass: ln_mass.exp(),
                    nu,
                    f_nu: self.f_nu(nu)?,
                    bias_nu: self.bias_nu(nu)?,
                })
            })
            .collect()
    }

    /// Write `mass nu f(nu) bias(nu)` per grid sample, ten decimals, no header.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), HaloError> {
        for row in self.rows()? {
            writeln!(
                writer,
                "{:.10} {:.10} {:.10} {:.10}",
                row.mass, row.nu, row.f_nu, row.bias_nu
            )?;
        }
        Ok(())
    }

    /// Write the table to `path`. The summary line is left to the caller.
    pub fn write(&self, path: &Path) -> Result<(), HaloError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        debug!(
            path = %path.display(),
            rows = self.mapping.len(),
            m_star = self.m_star(),
            "mass function written"
        );
        Ok(())
    }
}

fn check_positive_nu(nu: f64) -> Result<(), HaloError> {
    if nu.is_finite() && nu > 0.0 {
        Ok(())
    } else {
        Err(HaloError::Domain(format!("nu must be positive and finite, got {nu}")))
    }
}

fn normalize<F: AbundanceForm>(
    form: &F,
    ctx: &ModelContext<'_>,
    config: &QuadratureConfig,
) -> Result<(f64, f64), HaloError> {
    let (lo, hi) = (ctx.mapping.nu_min(), ctx.mapping.nu_max());
    let points = form.breakpoints(ctx);

    let f_integral = integrate(
        "abundance normalization",
        |nu| form.unnormalized_f_nu(ctx, nu),
        lo,
        hi,
        &points,
        config,
    )?;
    let f_norm = reciprocal("abundance normalization", f_integral.value)?;
    debug!(
        integral = f_integral.value,
        error = f_integral.abs_error,
        subintervals = f_integral.subintervals,
        "abundance normalized"
    );

    let bias_integral = integrate(
        "bias normalization",
        |nu| Ok(f_norm * form.unnormalized_f_nu(ctx, nu)? * form.unnormalized_bias_nu(ctx, nu)?),
        lo,
        hi,
        &points,
        config,
    )?;
    let bias_norm = reciprocal("bias normalization", bias_integral.value)?;
    debug!(
        integral = bias_integral.value,
        error = bias_integral.abs_error,
        subintervals = bias_integral.subintervals,
        "bias normalized"
    );

    Ok((f_norm, bias_norm))
}

fn reciprocal(what: &str, integral: f64) -> Result<f64, HaloError> {
    if integral.is_finite() && integral > 0.0 {
        Ok(1.0 / integral)
    } else {
        Err(HaloError::IntegrationFailure {
            what: what.to_string(),
            reason: format!("integral {integral} cannot be inverted"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmology::PowerLawCosmology;
    use approx::assert_relative_eq;

    fn model() -> ShethTormenMassFunction<PowerLawCosmology> {
        MassFunction::sheth_tormen(PowerLawCosmology::default(), &HaloModelParams::default())
            .unwrap()
    }

    #[test]
    fn test_abundance_integrates_to_one() {
        let mf = model();
        let integral = integrate(
            "check",
            |nu| mf.f_nu(nu),
            mf.nu_min(),
            mf.nu_max(),
            &[],
            &QuadratureConfig::default(),
        )
        .unwrap();
        assert_relative_eq!(integral.value, 1.0, max_relative = 1e-6);
    }

    #[test]
    fn test_bias_weighted_abundance_integrates_to_one() {
        let mf = model();
        let integral = integrate(
            "check",
            |nu| Ok(mf.f_nu(nu)? * mf.bias_nu(nu)?),
            mf.nu_min(),
            mf.nu_max(),
            &[],
            &QuadratureConfig::default(),
        )
        .unwrap();
        assert_relative_eq!(integral.value, 1.0, max_relative = 1e-6);
    }

    #[test]
    fn test_f_nu_matches_closed_form() {
        let mf = model();
        let (a, p) = (0.707, 0.3);
        for nu in [0.3, 1.0, 7.5] {
            let x: f64 = a * nu;
            let expected = mf.f_norm() * (1.0 + x.powf(-p)) * x.sqrt() * (-0.5 * x).exp() / nu;
            assert_relative_eq!(mf.f_nu(nu).unwrap(), expected, max_relative = 1e-14);
        }
    }

    #[test]
    fn test_bias_matches_closed_form() {
        let mf = model();
        let (a, p, dc) = (0.707, 0.3, 1.686);
        let nu: f64 = 2.0;
        let expected =
            mf.bias_norm() * (1.0 + (nu - 1.0) / dc + 2.0 * p / (dc * (1.0 + (a * nu).powf(p))));
        assert_relative_eq!(mf.bias_nu(nu).unwrap(), expected, max_relative = 1e-14);
    }

    #[test]
    fn test_bias_grows_with_mass() {
        let mf = model();
        let low = mf.bias_m(mf.m_star() / 10.0).unwrap();
        let high = mf.bias_m(mf.m_star() * 10.0).unwrap();
        assert!(high > low);
    }

    #[test]
    fn test_m_star_is_exactly_mass_at_unit_nu() {
        let mf = model();
        assert_eq!(mf.m_star(), mf.mass(1.0).unwrap());
    }

    #[test]
    fn test_non_positive_nu_is_domain_error() {
        let mf = model();
        assert!(matches!(mf.f_nu(0.0), Err(HaloError::Domain(_))));
        assert!(matches!(mf.f_nu(-1.0), Err(HaloError::Domain(_))));
        assert!(matches!(mf.bias_nu(0.0), Err(HaloError::Domain(_))));
        assert!(matches!(mf.f_nu(f64::NAN), Err(HaloError::Domain(_))));
    }

    #[test]
    fn test_mass_queries_outside_support_fail() {
        let mf = model();
        assert!(matches!(mf.f_m(1.0), Err(HaloError::Domain(_))));
        assert!(matches!(mf.bias_m(1.0e30), Err(HaloError::Domain(_))));
        assert!(mf.f_m(mf.m_star()).is_ok());
    }

    #[test]
    fn test_f_m_routes_through_nu() {
        let mf = model();
        let mass = 3.0e12;
        assert_eq!(mf.f_m(mass).unwrap(), mf.f_nu(mf.nu(mass).unwrap()).unwrap());
    }

    #[test]
    fn test_write_format() {
        let mf = model();
        let mut out = Vec::new();
        mf.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 101);
        assert!(text.ends_with('\n'));
        let mut previous_mass = 0.0;
        for line in lines {
            let fields: Vec<&str> = line.split(' ').collect();
            assert_eq!(fields.len(), 4);
            for field in &fields {
                let decimals = field.split('.').nth(1).map(str::len);
                assert_eq!(decimals, Some(10), "field {field}");
            }
            let mass: f64 = fields[0].parse().unwrap();
            assert!(mass > previous_mass);
            previous_mass = mass;
        }
    }

    #[test]
    fn test_summary_line() {
        let mf = model();
        let line = mf.summary_line();
        assert!(line.starts_with("M* = 10^"));
        assert!(line.ends_with(" M_sun"));
    }

    #[test]
    fn test_redshift_is_recorded() {
        let options = ModelOptions {
            redshift: 1.0,
            ..ModelOptions::default()
        };
        let mf = MassFunction::with_options(
            PowerLawCosmology::default(),
            ShethTormen,
            &HaloModelParams::default(),
            &options,
        )
        .unwrap();
        assert_eq!(mf.redshift(), 1.0);
        assert_relative_eq!(mf.coefficients().c0, 4.5, epsilon = 1e-12);
    }

    #[test]
    fn test_model_is_shareable_across_threads() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<ShethTormenMassFunction<PowerLawCosmology>>();
        assert_sync::<TinkerMassFunction<PowerLawCosmology>>();
    }
}
