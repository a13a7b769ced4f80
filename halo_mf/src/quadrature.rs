// Adaptive Gauss-Kronrod quadrature used for the normalization integrals.
// The segment with the largest error estimate is bisected until the summed
// estimate meets the tolerance or the subinterval budget runs out.

use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::HaloError;

// 15-point Kronrod nodes (non-negative half) and weights; every odd node is
// shared with the embedded 7-point Gauss rule.
const XGK: [f64; 8] = [
    0.991_455_371_120_812_6,
    0.949_107_912_342_758_5,
    0.864_864_423_359_769_1,
    0.741_531_185_599_394_4,
    0.586_087_235_467_691_1,
    0.405_845_151_377_397_2,
    0.207_784_955_007_898_5,
    0.0,
];
const WGK: [f64; 8] = [
    0.022_935_322_010_529_22,
    0.063_092_092_629_978_55,
    0.104_790_010_322_250_2,
    0.140_653_259_715_525_9,
    0.169_004_726_639_267_9,
    0.190_350_578_064_785_4,
    0.204_432_940_075_298_9,
    0.209_482_141_084_727_8,
];
const WG: [f64; 4] = [
    0.129_484_966_168_869_7,
    0.279_705_391_489_276_7,
    0.381_830_050_505_118_9,
    0.417_959_183_673_469_4,
];

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuadratureConfig {
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub max_subintervals: usize,
}

impl Default for QuadratureConfig {
    fn default() -> Self {
        Self {
            abs_tol: 0.0,
            rel_tol: 1.49e-8,
            max_subintervals: 200,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Integral {
    pub value: f64,
    pub abs_error: f64,
    pub subintervals: usize,
    pub evaluations: usize,
}

#[derive(Clone, Copy, Debug)]
struct Segment {
    a: f64,
    b: f64,
    value: f64,
    error: f64,
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        OrderedFloat(self.error) == OrderedFloat(other.error)
    }
}

impl Eq for Segment {}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        OrderedFloat(self.error).cmp(&OrderedFloat(other.error))
    }
}

/// Integrate `f` over `[a, b]`.
///
/// `breakpoints` strictly inside `(a, b)` seed the initial partition, which is
/// how integrands with known kinks (spline knots) are handed in. The
/// subinterval budget is `max_subintervals` or twice the seeded segment
/// count, whichever is larger. `what` names the integral in error messages.
pub fn integrate<F>(
    what: &str,
    mut f: F,
    a: f64,
    b: f64,
    breakpoints: &[f64],
    config: &QuadratureConfig,
) -> Result<Integral, HaloError>
where
    F: FnMut(f64) -> Result<f64, HaloError>,
{
    let failure = |reason: String| HaloError::IntegrationFailure {
        what: what.to_string(),
        reason,
    };

    if !(a.is_finite() && b.is_finite()) || b <= a {
        return Err(failure(format!("invalid interval [{a}, {b}]")));
    }
    if config.max_subintervals == 0 {
        return Err(failure("subinterval budget is zero".into()));
    }

    let mut edges = Vec::with_capacity(breakpoints.len() + 2);
    edges.push(a);
    let mut inner: Vec<f64> = breakpoints
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p > a && *p < b)
        .collect();
    inner.sort_by(|x, y| x.total_cmp(y));
    inner.dedup();
    edges.extend(inner);
    edges.push(b);

    // Each seeded segment keeps room for one bisection of its own.
    let budget = config.max_subintervals.max(2 * (edges.len() - 1));

    let mut heap = BinaryHeap::with_capacity(budget);
    let mut evaluations = 0usize;
    for w in edges.windows(2) {
        heap.push(kronrod15(&mut f, w[0], w[1])?);
        evaluations += 15;
    }

    loop {
        let (value, error) = heap
            .iter()
            .fold((0.0, 0.0), |(v, e), s| (v + s.value, e + s.error));
        if !value.is_finite() || !error.is_finite() {
            return Err(failure(format!("integrand produced a non-finite estimate ({value})")));
        }
        let tolerance = config.abs_tol.max(config.rel_tol * value.abs());
        if error <= tolerance {
            return Ok(Integral {
                value,
                abs_error: error,
                subintervals: heap.len(),
                evaluations,
            });
        }
        if heap.len() >= budget {
            return Err(failure(format!(
                "budget of {budget} subintervals exhausted (error estimate {error:e} > tolerance {tolerance:e})"
            )));
        }
        let Some(worst) = heap.pop() else {
            return Err(failure("no segments left to refine".into()));
        };
        let mid = 0.5 * (worst.a + worst.b);
        if mid <= worst.a || mid >= worst.b {
            return Err(failure(format!(
                "segment [{}, {}] cannot be bisected further",
                worst.a, worst.b
            )));
        }
        heap.push(kronrod15(&mut f, worst.a, mid)?);
        heap.push(kronrod15(&mut f, mid, worst.b)?);
        evaluations += 30;
    }
}

fn kronrod15<F>(f: &mut F, a: f64, b: f64) -> Result<Segment, HaloError>
where
    F: FnMut(f64) -> Result<f64, HaloError>,
{
    let center = 0.5 * (a + b);
    let half = 0.5 * (b - a);

    let f_center = f(center)?;
    let mut kronrod = WGK[7] * f_center;
    let mut gauss = WG[3] * f_center;
    for j in 0..7 {
        let dx = half * XGK[j];
        let pair = f(center - dx)? + f(center + dx)?;
        kronrod += WGK[j] * pair;
        if j % 2 == 1 {
            gauss += WG[j / 2] * pair;
        }
    }

    Ok(Segment {
        a,
        b,
        value: kronrod * half,
        error: ((kronrod - gauss) * half).abs(),
    })
}
