//! Monotone cubic Hermite interpolation (Fritsch-Carlson slopes, PCHIP edges).
//!
//! The interpolant passes through every knot and never overshoots the data:
//! between two knots it is monotone whenever the two knot values are ordered
//! the same way as their neighbours. That property is what makes it safe to
//! tabulate `nu(ln M)` and its inverse `ln M(nu)` from the same samples.

use ndarray::Array1;

use crate::HaloError;

#[derive(Clone, Debug)]
pub struct MonotoneCubicSpline {
    x: Array1<f64>,
    y: Array1<f64>,
    slopes: Array1<f64>,
}

impl MonotoneCubicSpline {
    /// Build the interpolant from strictly increasing abscissae `x` and
    /// matching ordinates `y`.
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self, HaloError> {
        if x.len() != y.len() {
            return Err(HaloError::InvalidParameter(format!(
                "spline needs matching sample lengths, got {} and {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(HaloError::InvalidParameter(
                "spline needs at least two samples".into(),
            ));
        }
        if let Some(bad) = x.iter().chain(y.iter()).find(|v| !v.is_finite()) {
            return Err(HaloError::InvalidParameter(format!(
                "spline samples must be finite, got {bad}"
            )));
        }
        if let Some(i) = x.windows(2).position(|w| w[1] <= w[0]) {
            return Err(HaloError::InvalidParameter(format!(
                "spline abscissae must be strictly increasing ({} then {})",
                x[i],
                x[i + 1]
            )));
        }

        let slopes = fritsch_carlson_slopes(x, y);
        Ok(Self {
            x: Array1::from_vec(x.to_vec()),
            y: Array1::from_vec(y.to_vec()),
            slopes: Array1::from_vec(slopes),
        })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// First and last knot.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    pub fn knots(&self) -> &Array1<f64> {
        &self.x
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.y
    }

    /// Evaluate the interpolant. Outside the knots the end cubic is continued,
    /// callers that need a strict support check it themselves.
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.x.len();
        let upper = self
            .x
            .as_slice()
            .map(|xs| xs.partition_point(|&v| v <= t))
            .unwrap_or_else(|| self.x.iter().take_while(|&&v| v <= t).count());
        let i = upper.saturating_sub(1).min(n - 2);

        let (x0, x1) = (self.x[i], self.x[i + 1]);
        let h = x1 - x0;
        let s = (t - x0) / h;
        let s2 = s * s;
        let s3 = s2 * s;

        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;

        h00 * self.y[i] + h * h10 * self.slopes[i] + h01 * self.y[i + 1] + h * h11 * self.slopes[i + 1]
    }
}

fn fritsch_carlson_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();

    let mut m = vec![0.0; n];
    if n == 2 {
        m[0] = delta[0];
        m[1] = delta[0];
        return m;
    }

    for k in 1..n - 1 {
        // Weighted harmonic mean; flat where the data changes direction.
        if delta[k - 1] * delta[k] > 0.0 {
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            m[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
        }
    }
    m[0] = edge_slope(h[0], h[1], delta[0], delta[1]);
    m[n - 1] = edge_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
    m
}

fn edge_slope(h0: f64, h1: f64, d0: f64, d1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * d0 - h0 * d1) / (h0 + h1);
    if d.signum() != d0.signum() || d0 == 0.0 {
        0.0
    } else if d0.signum() != d1.signum() && d.abs() > 3.0 * d0.abs() {
        3.0 * d0
    } else {
        d
    }
}
