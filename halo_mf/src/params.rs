// Fit coefficients and model-construction options, loadable from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cosmology::PowerLawCosmology;
use crate::quadrature::QuadratureConfig;
use crate::range::MassRangeFinder;
use crate::HaloError;

/// Halo-model coefficients as supplied by configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HaloModelParams {
    /// Sheth-Tormen low-mass exponent `p`.
    pub stq: f64,
    /// Sheth-Tormen `a`.
    pub st_little_a: f64,
    /// Concentration normalization at z = 0.
    pub cbarcoef: f64,
    /// Concentration-mass slope.
    pub cbarslope: f64,
    /// Density-profile inner slope.
    pub dpalpha: f64,
}

impl Default for HaloModelParams {
    fn default() -> Self {
        Self {
            stq: 0.3,
            st_little_a: 0.707,
            cbarcoef: 9.0,
            cbarslope: -0.13,
            dpalpha: 1.0,
        }
    }
}

impl HaloModelParams {
    /// Resolve the coefficients at `redshift`; the concentration
    /// normalization scales as `1 / (1 + z)`.
    pub fn resolve(&self, redshift: f64) -> Result<HaloCoefficients, HaloError> {
        if !redshift.is_finite() || redshift <= -1.0 {
            return Err(HaloError::InvalidParameter(format!(
                "redshift must be finite and > -1, got {redshift}"
            )));
        }
        if !(self.st_little_a.is_finite() && self.st_little_a > 0.0) {
            return Err(HaloError::InvalidParameter(format!(
                "st_little_a must be positive, got {}",
                self.st_little_a
            )));
        }
        if !self.stq.is_finite() {
            return Err(HaloError::InvalidParameter(format!(
                "stq must be finite, got {}",
                self.stq
            )));
        }
        Ok(HaloCoefficients {
            stq: self.stq,
            st_little_a: self.st_little_a,
            c0: self.cbarcoef / (1.0 + redshift),
            beta: self.cbarslope,
            alpha: self.dpalpha,
        })
    }
}

/// Coefficients owned by a model, fixed at construction.
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
pub struct HaloCoefficients {
    pub stq: f64,
    pub st_little_a: f64,
    pub c0: f64,
    pub beta: f64,
    pub alpha: f64,
}

/// Which `f(sigma)` expression the Tinker form evaluates.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TinkerFit {
    /// `A0^((sigma / b0)^-a0 + 1) exp(-c0 / sigma^2)`, with the redshift
    /// dependent concentration normalization `c0`.
    #[default]
    PowerAmplitude,
    /// Tinker et al. (2008) as published:
    /// `A0 ((sigma / b0)^-a0 + 1) exp(-c / sigma^2)`.
    Published,
}

/// Tinker et al. (2008) fit constants for `f(sigma)`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TinkerParams {
    #[serde(rename = "A0")]
    pub amplitude: f64,
    pub a0: f64,
    pub b0: f64,
    /// Exponential cutoff; only read by [`TinkerFit::Published`].
    pub c: f64,
    pub fit: TinkerFit,
}

impl Default for TinkerParams {
    fn default() -> Self {
        Self {
            amplitude: 0.26,
            a0: 2.30,
            b0: 1.46,
            c: 1.97,
            fit: TinkerFit::PowerAmplitude,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelOptions {
    pub redshift: f64,
    pub grid_points: usize,
    pub range: MassRangeFinder,
    pub quadrature: QuadratureConfig,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            redshift: 0.0,
            grid_points: 101,
            range: MassRangeFinder::default(),
            quadrature: QuadratureConfig::default(),
        }
    }
}

/// Everything needed to build a model from the power-law cosmology; every
/// field falls back to its default when absent from the JSON.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub halo: HaloModelParams,
    pub tinker: TinkerParams,
    pub cosmology: PowerLawCosmology,
    #[serde(flatten)]
    pub options: ModelOptions,
}

impl ModelConfig {
    pub fn from_json_str(data: &str) -> Result<Self, HaloError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, HaloError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }
}
