//! Halo mass function and halo bias for an injected cosmology.
//!
//! A [`MassFunction`] finds a usable mass range for the cosmology, tabulates
//! the peak height `nu = (delta_c / sigma(M))^2` on a log-mass grid, builds
//! monotone splines between mass and `nu`, and normalizes the abundance and
//! bias so that `int f(nu) dnu = 1` and `int f(nu) b(nu) dnu = 1` over the
//! tabulated range. The functional form of the abundance is a pluggable
//! [`AbundanceForm`]: [`ShethTormen`] is closed form, [`Tinker`] is built from
//! `sigma(M)` and cached as a spline over `nu`.

use thiserror::Error;

pub mod cosmology;
pub mod mapping;
pub mod mass_function;
pub mod params;
pub mod quadrature;
pub mod range;
pub mod spline;
pub mod tinker;

pub use cosmology::{Cosmology, PowerLawCosmology};
pub use mapping::MassNuMapping;
pub use mass_function::{
    AbundanceForm, MassFunction, MassFunctionRow, ModelContext, ShethTormen,
    ShethTormenMassFunction, TinkerMassFunction,
};
pub use params::{
    HaloCoefficients, HaloModelParams, ModelConfig, ModelOptions, TinkerFit, TinkerParams,
};
pub use quadrature::{integrate, Integral, QuadratureConfig};
pub use range::{MassRange, MassRangeFinder, NuBand};
pub use spline::MonotoneCubicSpline;
pub use tinker::Tinker;

#[derive(Error, Debug)]
pub enum HaloError {
    #[error(
        "mass range not found after {iterations} adjustments ({reason}); last bounds {mass_min:e} - {mass_max:e}"
    )]
    RangeNotFound {
        iterations: usize,
        mass_min: f64,
        mass_max: f64,
        reason: &'static str,
    },
    #[error("sampled nu is not strictly increasing at grid index {index}: {previous} -> {current}")]
    NonInvertibleRange {
        index: usize,
        previous: f64,
        current: f64,
    },
    #[error("domain error: {0}")]
    Domain(String),
    #[error("{what} failed: {reason}")]
    IntegrationFailure { what: String, reason: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
