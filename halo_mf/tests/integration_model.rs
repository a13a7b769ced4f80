//! Integration tests: mass function construction and queries through the
//! public API, with a linear nu(M) test double and the power-law cosmology.

use std::sync::Arc;

use approx::assert_relative_eq;
use halo_mf::{
    integrate, Cosmology, HaloError, HaloModelParams, MassFunction, MassRangeFinder,
    ModelOptions, PowerLawCosmology, QuadratureConfig, ShethTormen, Tinker, TinkerParams,
};

/// nu(M) = M / 1e12.
struct LinearNu;

impl Cosmology for LinearNu {
    fn nu_m(&self, mass: f64) -> f64 {
        mass / 1.0e12
    }

    fn delta_c(&self) -> f64 {
        1.686
    }

    fn sigma_m(&self, mass: f64) -> f64 {
        self.delta_c() / self.nu_m(mass).sqrt()
    }

    fn sigma_m_prime(&self, mass: f64) -> f64 {
        -0.5 * self.sigma_m(mass) / mass
    }

    fn rho_bar(&self) -> f64 {
        8.5e10
    }
}

/// nu stuck at a value no band accepts.
#[derive(Debug)]
struct FlatNu;

impl Cosmology for FlatNu {
    fn nu_m(&self, _mass: f64) -> f64 {
        3.0
    }

    fn delta_c(&self) -> f64 {
        1.686
    }

    fn sigma_m(&self, _mass: f64) -> f64 {
        1.0
    }

    fn sigma_m_prime(&self, _mass: f64) -> f64 {
        0.0
    }

    fn rho_bar(&self) -> f64 {
        1.0
    }
}

#[test]
fn linear_nu_scenario_range_and_grid() {
    let mf = MassFunction::sheth_tormen(LinearNu, &HaloModelParams::default()).unwrap();
    let range = *mf.mapping().range();
    assert_relative_eq!(range.mass_min, 1.0e11, max_relative = 0.05);
    assert_relative_eq!(range.mass_max, 5.0e13, max_relative = 0.05);

    let ln_mass = mf.mapping().ln_mass_samples();
    assert_eq!(ln_mass.len(), 101);
    let step = (range.mass_max.ln() - range.mass_min.ln()) / 100.0;
    assert_relative_eq!(ln_mass[0], range.mass_min.ln() - step, epsilon = 1e-10);
    assert_relative_eq!(ln_mass[100], range.mass_max.ln() + step, epsilon = 1e-10);

    // m_star where M / 1e12 == 1
    assert_relative_eq!(mf.m_star(), 1.0e12, max_relative = 1e-3);
    assert_eq!(mf.m_star(), mf.mass(1.0).unwrap());
}

#[test]
fn linear_nu_round_trips() {
    let mf = MassFunction::sheth_tormen(LinearNu, &HaloModelParams::default()).unwrap();
    for nu in [0.15, 0.8, 2.0, 9.0, 45.0] {
        assert_relative_eq!(mf.nu(mf.mass(nu).unwrap()).unwrap(), nu, max_relative = 1e-3);
    }
    for mass in [2.0e11, 1.0e12, 7.5e12, 3.0e13] {
        assert_relative_eq!(mf.mass(mf.nu(mass).unwrap()).unwrap(), mass, max_relative = 1e-3);
    }
}

#[test]
fn normalization_holds_for_both_forms() {
    let params = HaloModelParams::default();
    let st = MassFunction::sheth_tormen(PowerLawCosmology::default(), &params).unwrap();
    let tinker =
        MassFunction::tinker(PowerLawCosmology::default(), &params, TinkerParams::default())
            .unwrap();
    let config = QuadratureConfig::default();

    let st_f = integrate("st f", |nu| st.f_nu(nu), st.nu_min(), st.nu_max(), &[], &config)
        .unwrap();
    assert_relative_eq!(st_f.value, 1.0, max_relative = 1e-6);

    let knots = tinker.mapping().nu_samples().to_vec();
    let tk_f = integrate(
        "tinker f",
        |nu| tinker.f_nu(nu),
        tinker.nu_min(),
        tinker.nu_max(),
        &knots,
        &config,
    )
    .unwrap();
    assert_relative_eq!(tk_f.value, 1.0, max_relative = 1e-6);

    let tk_fb = integrate(
        "tinker f b",
        |nu| Ok(tinker.f_nu(nu)? * tinker.bias_nu(nu)?),
        tinker.nu_min(),
        tinker.nu_max(),
        &knots,
        &config,
    )
    .unwrap();
    assert_relative_eq!(tk_fb.value, 1.0, max_relative = 1e-6);
}

#[test]
fn tinker_cache_is_built_once_during_construction() {
    let mf = MassFunction::tinker(
        PowerLawCosmology::default(),
        &HaloModelParams::default(),
        TinkerParams::default(),
    )
    .unwrap();
    assert!(mf.form().is_cached());
    assert_eq!(mf.form().cache_builds(), 1);

    let mf = Arc::new(mf);
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let mf = Arc::clone(&mf);
            std::thread::spawn(move || {
                let mass = mf.m_star() * (1.0 + i as f64);
                mf.f_m(mass).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap() > 0.0);
    }
    assert_eq!(mf.form().cache_builds(), 1);
}

#[test]
fn tinker_differs_from_sheth_tormen() {
    let params = HaloModelParams::default();
    let st = MassFunction::new(PowerLawCosmology::default(), ShethTormen, &params).unwrap();
    let tinker = MassFunction::new(
        PowerLawCosmology::default(),
        Tinker::new(TinkerParams::default()),
        &params,
    )
    .unwrap();
    assert_eq!(st.m_star(), tinker.m_star());
    let nu = 2.0;
    assert!((st.f_nu(nu).unwrap() - tinker.f_nu(nu).unwrap()).abs() > 1e-6);
}

#[test]
fn unreachable_band_fails_construction() {
    let options = ModelOptions {
        range: MassRangeFinder {
            max_iterations: 1_000,
            ..MassRangeFinder::default()
        },
        ..ModelOptions::default()
    };
    let err = MassFunction::with_options(FlatNu, ShethTormen, &HaloModelParams::default(), &options)
        .unwrap_err();
    assert!(matches!(err, HaloError::RangeNotFound { .. }));
}

#[test]
fn tinker_builds_on_a_dense_grid() {
    let options = ModelOptions {
        grid_points: 251,
        ..ModelOptions::default()
    };
    let params = HaloModelParams::default();
    let tinker = MassFunction::with_options(
        PowerLawCosmology::default(),
        Tinker::new(TinkerParams::default()),
        &params,
        &options,
    )
    .unwrap();
    let st =
        MassFunction::with_options(PowerLawCosmology::default(), ShethTormen, &params, &options)
            .unwrap();
    assert_eq!(tinker.mapping().len(), 251);
    assert_eq!(st.mapping().len(), 251);
    assert!(tinker.f_nu(1.0).unwrap() > 0.0);
}

#[test]
fn tinker_shape_depends_on_redshift() {
    let build = |redshift: f64| {
        let options = ModelOptions {
            redshift,
            ..ModelOptions::default()
        };
        MassFunction::with_options(
            PowerLawCosmology::default(),
            Tinker::new(TinkerParams::default()),
            &HaloModelParams::default(),
            &options,
        )
        .unwrap()
    };
    let (now, earlier) = (build(0.0), build(1.0));
    let ratio = |mf: &MassFunction<PowerLawCosmology, Tinker>| {
        mf.f_nu(0.5).unwrap() / mf.f_nu(2.0).unwrap()
    };
    // exp(-c0 nu / delta_c^2) flattens as c0 = 9 / (1 + z) drops
    assert!(ratio(&earlier) < ratio(&now));
}

#[test]
fn starved_quadrature_fails_construction() {
    let options = ModelOptions {
        quadrature: QuadratureConfig {
            max_subintervals: 1,
            ..QuadratureConfig::default()
        },
        ..ModelOptions::default()
    };
    let err = MassFunction::with_options(
        PowerLawCosmology::default(),
        ShethTormen,
        &HaloModelParams::default(),
        &options,
    )
    .unwrap_err();
    assert!(matches!(err, HaloError::IntegrationFailure { .. }));
}

#[test]
fn domain_errors_for_bad_queries() {
    let mf = MassFunction::sheth_tormen(LinearNu, &HaloModelParams::default()).unwrap();
    assert!(matches!(mf.f_nu(0.0), Err(HaloError::Domain(_))));
    assert!(matches!(mf.f_nu(-2.0), Err(HaloError::Domain(_))));
    assert!(matches!(mf.bias_nu(-2.0), Err(HaloError::Domain(_))));
    assert!(matches!(mf.nu(1.0e20), Err(HaloError::Domain(_))));
    assert!(matches!(mf.mass(1.0e4), Err(HaloError::Domain(_))));
}

#[test]
fn write_produces_table_file() {
    let mf = MassFunction::sheth_tormen(PowerLawCosmology::default(), &HaloModelParams::default())
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mass_function.txt");
    mf.write(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let rows = mf.rows().unwrap();
    assert_eq!(text.lines().count(), rows.len());
    let first: Vec<f64> = text
        .lines()
        .next()
        .unwrap()
        .split_whitespace()
        .map(|v| v.parse().unwrap())
        .collect();
    assert_eq!(first.len(), 4);
    assert_relative_eq!(first[0], rows[0].mass, max_relative = 1e-9);
    assert_relative_eq!(first[1], rows[0].nu, epsilon = 1e-9);
}
