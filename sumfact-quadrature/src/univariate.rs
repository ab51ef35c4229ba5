//! Quadrature rules for the one-dimensional domain `[-1, 1]`.

use crate::{Error, Rule};
use std::f64::consts::PI;

/// Recurrence relation for Legendre polynomials.
///
/// Note: we use a formula for which derivatives are *not* defined at |x| == 1, so it is only
/// suitable for evaluation in the open interval (-1, 1).
#[derive(Debug, Default)]
struct LegendreRecurrence {
    n: usize,
    x: f64,
    // The current value, i.e. p_n(x)
    p1: f64,
    // The previous value in the recurrence, i.e. p_{n - 1}(x)
    p2: f64,
}

impl LegendreRecurrence {
    pub fn evaluate(n: usize, x: f64) -> Self {
        // Use recurrence relation
        //  m P_m(x) = (2m - 1) * x P_{m - 1}(x) - (m - 1) P_{m - 2}(x)
        let mut p1 = 1.0;
        let mut p2 = 0.0;
        let mut p3;
        for m in 1..=n {
            let m = m as f64;
            p3 = p2;
            p2 = p1;
            p1 = ((2.0 * m - 1.0) * x * p2 - (m - 1.0) * p3) / m;
        }

        Self { n, x, p1, p2 }
    }

    fn value(&self) -> f64 {
        self.p1
    }

    fn previous_value(&self) -> f64 {
        self.p2
    }

    fn derivative(&self) -> f64 {
        let Self { n, x, p1, p2 } = &self;
        let n = *n as f64;
        // dp_n/dx (x) = n * (x * p_n(x) - p_{n - 1}(x)) / (x^2 - 1)
        n * (x * p1 - p2) / (x * x - 1.0)
    }

    fn value_and_derivative(&self) -> (f64, f64) {
        (self.value(), self.derivative())
    }
}

const MAX_NEWTON_ITERATIONS: usize = 100;

/// Gauss quadrature for the reference interval [-1, 1].
///
/// Returns the [Gauss quadrature rule] with the given number of points, with points in
/// ascending order. Given `n` points, the rule integrates polynomials of order up to `2 n - 1`
/// exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
///
/// [Gauss quadrature rule]: https://en.wikipedia.org/wiki/Gaussian_quadrature
pub fn gauss(num_points: usize) -> Rule<1> {
    let n = num_points;
    assert!(n > 0, "number of points must be positive");

    // Loosely based on the procedure used in
    // Numerical Recipes, The art of Scientific Computing, Third Edition (2007)
    let m = (n + 1) / 2;

    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    // Only find the first m roots (the negative ones). The remaining roots follow by symmetry
    for i in 0..m {
        let mut x = -(PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let (mut p, mut dp) = LegendreRecurrence::evaluate(n, x).value_and_derivative();

        for _ in 0..MAX_NEWTON_ITERATIONS {
            let dx = -p / dp;
            x += dx;
            let (p_new, dp_new) = LegendreRecurrence::evaluate(n, x).value_and_derivative();
            p = p_new;
            dp = dp_new;
            if dx.abs() <= 1e-15 {
                break;
            }
        }

        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        points.push([x]);
        weights.push(w);
    }

    for i in m..n {
        let mirror_idx = n - i - 1;
        points.push([-points[mirror_idx][0]]);
        weights.push(weights[mirror_idx]);
    }

    assert_eq!(points.len(), n, "Internal error: incorrect number of points produced");

    (weights, points)
}

/// Gauss-Lobatto quadrature for the reference interval [-1, 1].
///
/// The rule contains both endpoints, and its points are given in ascending order. Given `n`
/// points, the rule integrates polynomials of order up to `2 n - 3` exactly.
///
/// Returns `None` if fewer than two points are requested.
pub fn try_gauss_lobatto(num_points: usize) -> Option<Rule<1>> {
    let n = num_points;
    if n < 2 {
        return None;
    }

    // The interior points are the roots of P'_{n - 1}. We iterate on all points with the
    // Chebyshev-Gauss-Lobatto points as initial guess, using the update
    //  x <- x - (x P_{n-1}(x) - P_{n-2}(x)) / (n P_{n-1}(x)),
    // which leaves the endpoints fixed.
    let degree = n - 1;
    let m = (n + 1) / 2;
    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    for i in 0..m {
        let mut x = -(PI * i as f64 / degree as f64).cos();
        let mut recurrence = LegendreRecurrence::evaluate(degree, x);
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let dx = (x * recurrence.value() - recurrence.previous_value()) / (n as f64 * recurrence.value());
            x -= dx;
            recurrence = LegendreRecurrence::evaluate(degree, x);
            if dx.abs() <= 1e-15 {
                break;
            }
        }

        let p = recurrence.value();
        let w = 2.0 / ((degree * n) as f64 * p * p);
        points.push([x]);
        weights.push(w);
    }

    for i in m..n {
        let mirror_idx = n - i - 1;
        points.push([-points[mirror_idx][0]]);
        weights.push(weights[mirror_idx]);
    }

    Some((weights, points))
}

/// Gauss-Lobatto quadrature for the reference interval [-1, 1].
///
/// Same as [`try_gauss_lobatto`], but reports unavailable rules as an error.
pub fn gauss_lobatto(num_points: usize) -> Result<Rule<1>, Error> {
    try_gauss_lobatto(num_points).ok_or(Error::NoRuleAvailable)
}
