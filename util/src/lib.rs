use nalgebra::DVector;

/// Poor man's approx assertion for slices of floating-point numbers.
///
/// Compares entry by entry with a combined absolute/relative tolerance,
/// i.e. `|x - y| <= tol * max(1, |x|, |y|)`.
#[macro_export]
macro_rules! assert_approx_slice_eq {
    ($x:expr, $y:expr, tol = $tol:expr) => {{
        let x: &[f64] = &$x;
        let y: &[f64] = &$y;
        assert_eq!(x.len(), y.len(), "slices have different lengths");

        for (i, (a, b)) in x.iter().zip(y.iter()).enumerate() {
            let scale = 1.0f64.max(a.abs()).max(b.abs());
            let diff = (a - b).abs();
            if diff > $tol * scale {
                println!("tol: {:e}", $tol);
                println!("left: {:?}", x);
                println!("right: {:?}", y);
                panic!("entry {} differs: left = {:e}, right = {:e}, diff = {:e}", i, a, b, diff);
            }
        }
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Deterministic, non-trivial test data of the given length.
///
/// The entries lie in `[-1, 1]` and differ for different seeds.
pub fn sample_values(len: usize, seed: u64) -> Vec<f64> {
    (0..len)
        .map(|i| {
            let t = (i as f64 + 1.0) * (0.7548776662466927 + seed as f64 * 0.5698402909980532);
            (t * 12.9898).sin()
        })
        .collect()
}

/// Euclidean inner product of two equally long slices.
pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    assert_eq!(x.len(), y.len(), "dot product requires equal lengths");
    DVector::from_column_slice(x).dot(&DVector::from_column_slice(y))
}

/// Evaluate the monomial `x^a y^b z^c` at a point of dimension 1, 2 or 3.
///
/// Missing coordinates are treated as zero powers.
pub fn monomial(point: &[f64], powers: &[i32]) -> f64 {
    point.iter().zip(powers).map(|(x, &p)| x.powi(p)).product()
}
