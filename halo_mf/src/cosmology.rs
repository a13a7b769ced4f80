// Cosmology contract consumed by the mass function, and a parametric
// power-law model for runs without a full linear-theory engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::HaloError;

/// Quantities a mass function needs from a cosmology at a fixed epoch.
///
/// `nu_m` is expected to increase monotonically with mass, and `sigma_m` to
/// decrease, so `sigma_m_prime` is negative.
pub trait Cosmology: Send + Sync {
    /// Peak height `(delta_c / sigma(M))^2`.
    fn nu_m(&self, mass: f64) -> f64;
    /// Critical linear overdensity for spherical collapse.
    fn delta_c(&self) -> f64;
    /// RMS linear density fluctuation smoothed on mass scale `mass`.
    fn sigma_m(&self, mass: f64) -> f64;
    /// `d sigma / d M`.
    fn sigma_m_prime(&self, mass: f64) -> f64;
    /// Mean comoving matter density, in mass units per unit volume.
    fn rho_bar(&self) -> f64;
}

impl<T: Cosmology + ?Sized> Cosmology for &T {
    fn nu_m(&self, mass: f64) -> f64 {
        (**self).nu_m(mass)
    }

    fn delta_c(&self) -> f64 {
        (**self).delta_c()
    }

    fn sigma_m(&self, mass: f64) -> f64 {
        (**self).sigma_m(mass)
    }

    fn sigma_m_prime(&self, mass: f64) -> f64 {
        (**self).sigma_m_prime(mass)
    }

    fn rho_bar(&self) -> f64 {
        (**self).rho_bar()
    }
}

impl<T: Cosmology + ?Sized> Cosmology for Arc<T> {
    fn nu_m(&self, mass: f64) -> f64 {
        (**self).nu_m(mass)
    }

    fn delta_c(&self) -> f64 {
        (**self).delta_c()
    }

    fn sigma_m(&self, mass: f64) -> f64 {
        (**self).sigma_m(mass)
    }

    fn sigma_m_prime(&self, mass: f64) -> f64 {
        (**self).sigma_m_prime(mass)
    }

    fn rho_bar(&self) -> f64 {
        (**self).rho_bar()
    }
}

/// `sigma(M) = sigma_norm * (M / mass_norm)^(-slope)`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PowerLawCosmology {
    pub delta_c: f64,
    pub sigma_norm: f64,
    pub mass_norm: f64,
    pub slope: f64,
    pub rho_bar: f64,
}

impl Default for PowerLawCosmology {
    fn default() -> Self {
        Self {
            delta_c: 1.686,
            sigma_norm: 1.0,
            mass_norm: 1.0e13,
            slope: 0.25,
            rho_bar: 8.5e10,
        }
    }
}

impl PowerLawCosmology {
    pub fn validate(&self) -> Result<(), HaloError> {
        let checks = [
            ("delta_c", self.delta_c),
            ("sigma_norm", self.sigma_norm),
            ("mass_norm", self.mass_norm),
            ("slope", self.slope),
            ("rho_bar", self.rho_bar),
        ];
        for (name, value) in checks {
            if !(value.is_finite() && value > 0.0) {
                return Err(HaloError::InvalidParameter(format!(
                    "power-law cosmology needs {name} > 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

impl Cosmology for PowerLawCosmology {
    fn nu_m(&self, mass: f64) -> f64 {
        let ratio = self.delta_c / self.sigma_m(mass);
        ratio * ratio
    }

    fn delta_c(&self) -> f64 {
        self.delta_c
    }

    fn sigma_m(&self, mass: f64) -> f64 {
        self.sigma_norm * (mass / self.mass_norm).powf(-self.slope)
    }

    fn sigma_m_prime(&self, mass: f64) -> f64 {
        -self.slope * self.sigma_m(mass) / mass
    }

    fn rho_bar(&self) -> f64 {
        self.rho_bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nu_is_one_where_sigma_equals_delta_c() {
        let cosmo = PowerLawCosmology::default();
        // sigma(M) = delta_c  =>  M = mass_norm * delta_c^(-1/slope)
        let mass = cosmo.mass_norm * cosmo.delta_c.powf(-1.0 / cosmo.slope);
        assert_relative_eq!(cosmo.nu_m(mass), 1.0, max_relative = 1e-12);
    }

    #[test]
    fn test_sigma_prime_matches_finite_difference() {
        let cosmo = PowerLawCosmology::default();
        let mass = 3.0e12;
        let h = mass * 1e-6;
        let numeric = (cosmo.sigma_m(mass + h) - cosmo.sigma_m(mass - h)) / (2.0 * h);
        assert_relative_eq!(cosmo.sigma_m_prime(mass), numeric, max_relative = 1e-6);
        assert!(cosmo.sigma_m_prime(mass) < 0.0);
    }

    #[test]
    fn test_validate_rejects_non_positive_slope() {
        let cosmo = PowerLawCosmology {
            slope: 0.0,
            ..PowerLawCosmology::default()
        };
        assert!(cosmo.validate().is_err());
        assert!(PowerLawCosmology::default().validate().is_ok());
    }

    #[test]
    fn test_shared_handle_delegates() {
        let cosmo = Arc::new(PowerLawCosmology::default());
        assert_eq!(cosmo.nu_m(1.0e12), PowerLawCosmology::default().nu_m(1.0e12));
        let by_ref: &dyn Cosmology = &*cosmo;
        assert_eq!(by_ref.rho_bar(), 8.5e10);
    }
}
