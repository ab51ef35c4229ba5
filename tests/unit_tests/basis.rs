use super::{all_backends, unbatched_backends};
use matrixcompare::assert_scalar_eq;
use sumfact::EvalMode::{Curl, Div, Grad, Interp, Weight};
use sumfact::TransposeMode::{NoTranspose, Transpose};
use sumfact::{Backend, Basis, DeviceConfig, DeviceVariant, Error, EvalMode, MemSpace, QuadMode, TensorBasis, Vector};
use util::{assert_approx_slice_eq, dot, monomial, sample_values};

/// Number of elements to use with a backend, respecting the batch sizes of vectorized kernels.
fn nelem_for(backend: &Backend, preferred: usize) -> usize {
    match backend {
        Backend::VectorizedHost => 8,
        _ => preferred,
    }
}

/// Coordinates of the tensor-product points with 1D coordinates `points1d`, axis 0 fastest.
fn tensor_points(dim: usize, points1d: &[f64]) -> Vec<Vec<f64>> {
    let n = points1d.len();
    let total = n.pow(dim as u32);
    (0..total)
        .map(|idx| (0..dim).map(|d| points1d[(idx / n.pow(d as u32)) % n]).collect())
        .collect()
}

fn apply(basis: &Basis<f64>, nelem: usize, tmode: sumfact::TransposeMode, emode: EvalMode, u: &[f64]) -> Vec<f64> {
    let mut v = vec![0.0; basis.tensor_basis().output_len(nelem, tmode, emode)];
    basis.apply_slices(nelem, tmode, emode, u, &mut v).unwrap();
    v
}

#[test]
fn collocated_interpolation_roundtrip_is_exact() {
    for backend in all_backends() {
        for dim in 1..=3 {
            let basis = Basis::<f64>::create_tensor_lagrange(backend, dim, 1, 4, 4, QuadMode::GaussLobatto).unwrap();
            let nelem = nelem_for(&backend, 3);
            let u = sample_values(basis.tensor_basis().nodal_len(nelem), dim as u64);

            let uq = apply(&basis, nelem, NoTranspose, Interp, &u);
            assert_eq!(uq, u, "forward interpolation, backend {}, dim {}", backend, dim);
            let u2 = apply(&basis, nelem, Transpose, Interp, &uq);
            assert_eq!(u2, u, "transpose interpolation, backend {}, dim {}", backend, dim);
        }
    }
}

fn poly_1d(x: f64) -> f64 {
    (0..6).map(|i| (i + 1) as f64 * x.powi(i)).sum()
}

#[test]
fn quintic_is_recovered_through_lobatto_and_gauss_bases() {
    for backend in unbatched_backends() {
        let create = |p1d, q1d, qmode| Basis::<f64>::create_tensor_lagrange(backend, 1, 1, p1d, q1d, qmode).unwrap();
        let bxl = create(2, 6, QuadMode::GaussLobatto);
        let bul = create(6, 6, QuadMode::GaussLobatto);
        let bxg = create(2, 6, QuadMode::Gauss);
        let bug = create(6, 6, QuadMode::Gauss);

        let x = [-1.0, 1.0];
        let xq = apply(&bxl, 1, NoTranspose, Interp, &x);
        let uq: Vec<f64> = xq.iter().copied().map(poly_1d).collect();

        // Transposed collocated interpolation is the identity, so these are nodal values
        let u = apply(&bul, 1, Transpose, Interp, &uq);

        let xq = apply(&bxg, 1, NoTranspose, Interp, &x);
        let uq = apply(&bug, 1, NoTranspose, Interp, &u);
        let expected: Vec<f64> = xq.iter().copied().map(poly_1d).collect();
        assert_approx_slice_eq!(uq, expected, tol = 1e-12);
    }
}

#[test]
fn quintic_is_recovered_in_two_dimensions() {
    let f = |x: f64, y: f64| 1.0 + 2.0 * x - y * y + 0.5 * x.powi(5) * y.powi(3) - x.powi(2) * y.powi(5);

    for backend in unbatched_backends() {
        let create =
            |ncomp, p1d, q1d, qmode| Basis::<f64>::create_tensor_lagrange(backend, 2, ncomp, p1d, q1d, qmode).unwrap();
        let bxl = create(2, 2, 6, QuadMode::GaussLobatto);
        let bul = create(1, 6, 6, QuadMode::GaussLobatto);
        let bxg = create(2, 2, 6, QuadMode::Gauss);
        let bug = create(1, 6, 6, QuadMode::Gauss);

        // Corner coordinates, one component per coordinate direction
        let x = [-1.0, 1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
        let xq = apply(&bxl, 1, NoTranspose, Interp, &x);
        let uq: Vec<f64> = (0..36).map(|i| f(xq[i], xq[36 + i])).collect();
        let u = apply(&bul, 1, Transpose, Interp, &uq);

        let xq = apply(&bxg, 1, NoTranspose, Interp, &x);
        let uq = apply(&bug, 1, NoTranspose, Interp, &u);
        let expected: Vec<f64> = (0..36).map(|i| f(xq[i], xq[36 + i])).collect();
        assert_approx_slice_eq!(uq, expected, tol = 1e-12);
    }
}

#[test]
fn quadrature_weights_integrate_constants() {
    for backend in all_backends() {
        for dim in 1..=3 {
            let basis = Basis::<f64>::create_tensor_lagrange(backend, dim, 1, 4, 4, QuadMode::Gauss).unwrap();
            let nelem = nelem_for(&backend, 2);
            let w = apply(&basis, nelem, NoTranspose, Weight, &[]);
            assert_eq!(w.len(), nelem * 4usize.pow(dim as u32));

            for w_e in w.chunks(basis.tensor_basis().num_qpts()) {
                let sum: f64 = w_e.iter().sum();
                assert_scalar_eq!(sum, 2f64.powi(dim as i32), comp = abs, tol = 1e-13);
            }
        }
    }
}

#[test]
fn weight_mode_does_not_read_input_vector() {
    let basis = Basis::<f64>::create_tensor_lagrange(Backend::Reference, 2, 1, 3, 3, QuadMode::Gauss).unwrap();
    let u = Vector::zeros(0);
    let mut v = Vector::zeros(18);
    basis.apply(2, NoTranspose, Weight, &u, &mut v).unwrap();
    assert_eq!(&v.to_vec()[..9], &basis.tensor_basis().tensor_weights()[..]);
    assert_eq!(&v.to_vec()[9..], &basis.tensor_basis().tensor_weights()[..]);
}

#[test]
fn interpolation_reproduces_polynomials_at_quadrature_points() {
    let powers = [[2, 0, 0], [1, 3, 0], [0, 2, 3], [3, 3, 3]];
    for backend in all_backends() {
        for dim in 1..=3 {
            let basis = Basis::<f64>::create_tensor_lagrange(backend, dim, 1, 4, 8, QuadMode::Gauss).unwrap();
            let nodes1d = TensorBasis::<f64>::lagrange(1, 1, 4, 4, QuadMode::GaussLobatto)
                .unwrap()
                .qref1d()
                .to_vec();
            let nodes = tensor_points(dim, &nodes1d);
            let qpts = tensor_points(dim, basis.tensor_basis().qref1d());
            let nelem = nelem_for(&backend, powers.len());

            // Element e carries the monomial powers[e % 4]
            let u: Vec<f64> = (0..nelem)
                .flat_map(|e| nodes.iter().map(move |x| monomial(x, &powers[e % 4][..dim])))
                .collect();
            let expected: Vec<f64> = (0..nelem)
                .flat_map(|e| qpts.iter().map(move |x| monomial(x, &powers[e % 4][..dim])))
                .collect();

            let uq = apply(&basis, nelem, NoTranspose, Interp, &u);
            assert_approx_slice_eq!(uq, expected, tol = 1e-12);
        }
    }
}

#[test]
fn gradient_of_linear_function_is_constant() {
    // Q >= P takes the collocated derivative path, Q < P the direct one
    for (p1d, q1d) in [(4, 4), (4, 8), (8, 4)] {
        for backend in all_backends() {
            let basis = Basis::<f64>::create_tensor_lagrange(backend, 2, 2, p1d, q1d, QuadMode::Gauss).unwrap();
            let nodes1d = TensorBasis::<f64>::lagrange(1, 1, p1d, p1d, QuadMode::GaussLobatto)
                .unwrap()
                .qref1d()
                .to_vec();
            let nodes = tensor_points(2, &nodes1d);
            let nelem = nelem_for(&backend, 1);

            // Component 0 is 1 + 2x - 3y, component 1 is -x + 0.5y
            let u: Vec<f64> = (0..nelem)
                .flat_map(|_| {
                    let comp0 = nodes.iter().map(|x| 1.0 + 2.0 * x[0] - 3.0 * x[1]);
                    let comp1 = nodes.iter().map(|x| -x[0] + 0.5 * x[1]);
                    comp0.chain(comp1).collect::<Vec<_>>()
                })
                .collect();

            let nqpt = q1d * q1d;
            let expected: Vec<f64> = (0..nelem)
                .flat_map(|_| {
                    [2.0, -1.0, -3.0, 0.5]
                        .into_iter()
                        .flat_map(move |slope| std::iter::repeat(slope).take(nqpt))
                })
                .collect();

            let du = apply(&basis, nelem, NoTranspose, Grad, &u);
            assert_eq!(du.len(), nelem * 2 * 2 * nqpt);
            assert_approx_slice_eq!(du, expected, tol = 1e-11);
        }
    }
}

#[test]
fn transpose_is_adjoint_of_forward() {
    for backend in all_backends() {
        for dim in 1..=3 {
            for emode in [Interp, Grad] {
                let basis = Basis::<f64>::create_tensor_lagrange(backend, dim, 2, 4, 8, QuadMode::Gauss).unwrap();
                let data = basis.tensor_basis();
                let nelem = nelem_for(&backend, 3);
                let u = sample_values(data.nodal_len(nelem), 1);
                let w = sample_values(data.qpt_len(nelem, emode), 2);

                let bu = apply(&basis, nelem, NoTranspose, emode, &u);
                let btw = apply(&basis, nelem, Transpose, emode, &w);
                let lhs = dot(&bu, &w);
                let rhs = dot(&u, &btw);
                let tol = 1e-11 * (1.0 + lhs.abs());
                assert_scalar_eq!(lhs, rhs, comp = abs, tol = tol);
            }
        }
    }
}

#[test]
fn transpose_overwrites_output() {
    for backend in all_backends() {
        let basis = Basis::<f64>::create_tensor_lagrange(backend, 2, 1, 4, 4, QuadMode::Gauss).unwrap();
        let nelem = nelem_for(&backend, 2);
        let data = basis.tensor_basis();
        for emode in [Interp, Grad] {
            let w = sample_values(data.qpt_len(nelem, emode), 5);
            let expected = apply(&basis, nelem, Transpose, emode, &w);

            let mut v = vec![42.0; data.nodal_len(nelem)];
            basis.apply_slices(nelem, Transpose, emode, &w, &mut v).unwrap();
            assert_eq!(v, expected);
        }
    }
}

#[test]
fn unsupported_eval_modes_are_rejected() {
    for backend in all_backends() {
        let basis = Basis::<f64>::create_tensor_lagrange(backend, 2, 1, 4, 4, QuadMode::Gauss).unwrap();
        let data = basis.tensor_basis();
        let u = vec![0.0; data.nodal_len(8)];
        let mut v = vec![0.0; data.qpt_len(8, Grad)];
        for emode in [EvalMode::None, Div, Curl] {
            let result = basis.apply_slices(8, NoTranspose, emode, &u, &mut v);
            assert!(matches!(result, Err(Error::UnsupportedEvalMode { .. })), "{:?}", result);
        }
    }
}

#[test]
fn transposed_weights_are_rejected() {
    for backend in all_backends() {
        let basis = Basis::<f64>::create_tensor_lagrange(backend, 1, 1, 4, 4, QuadMode::Gauss).unwrap();
        let mut v = vec![0.0; 32];
        let result = basis.apply_slices(8, Transpose, Weight, &[], &mut v);
        assert_eq!(result, Err(Error::IncompatibleTranspose { emode: Weight }));
    }
}

#[test]
fn mismatched_buffer_lengths_are_rejected() {
    let basis = Basis::<f64>::create_tensor_lagrange(Backend::Reference, 2, 1, 3, 4, QuadMode::Gauss).unwrap();
    let u = vec![0.0; 9];
    let mut v = vec![0.0; 15];
    let result = basis.apply_slices(1, NoTranspose, Interp, &u, &mut v);
    assert!(matches!(
        result,
        Err(Error::DimensionMismatch {
            expected: 16,
            actual: 15,
            ..
        })
    ));

    let mut v = vec![0.0; 16];
    let result = basis.apply_slices(2, NoTranspose, Interp, &u, &mut v);
    assert!(matches!(
        result,
        Err(Error::DimensionMismatch {
            expected: 18,
            actual: 9,
            ..
        })
    ));
}

#[test]
fn vectorized_basis_rejects_unsupported_batches() {
    let basis = Basis::<f64>::create_tensor_lagrange(Backend::VectorizedHost, 2, 1, 4, 4, QuadMode::Gauss).unwrap();
    let data = basis.tensor_basis();
    for nelem in [2, 3, 9, 16] {
        let u = vec![1.0; data.nodal_len(nelem)];
        let mut v = vec![0.0; data.qpt_len(nelem, Interp)];
        let result = basis.apply_slices(nelem, NoTranspose, Interp, &u, &mut v);
        assert!(matches!(result, Err(Error::UnsupportedBatch { nelem: n, .. }) if n == nelem));
    }
}

#[test]
fn vectorized_basis_rejects_untileable_shapes() {
    let basis = Basis::<f64>::create_tensor_lagrange(Backend::VectorizedHost, 1, 1, 2, 6, QuadMode::Gauss).unwrap();
    let u = [1.0, 2.0];
    let mut v = [7.0; 6];
    let result = basis.apply_slices(1, NoTranspose, Interp, &u, &mut v);
    assert!(matches!(result, Err(Error::TileMismatch { j: 6, .. })), "{:?}", result);
    assert_eq!(v, [7.0; 6]);
}

#[test]
fn register_variant_rejects_large_bases() {
    let backend = Backend::DeviceParallel(DeviceConfig::default().with_variant(DeviceVariant::RegisterBlocked));
    let result = Basis::<f64>::create_tensor_lagrange(backend, 3, 1, 9, 9, QuadMode::Gauss);
    assert!(matches!(result, Err(Error::UnsupportedConfig(_))));
    assert!(Basis::<f64>::create_tensor_lagrange(backend, 3, 1, 8, 8, QuadMode::Gauss).is_ok());
}

#[test]
fn invalid_launch_configurations_are_rejected() {
    let zero_block = Backend::DeviceParallel(DeviceConfig::default().with_block_size(0));
    let zero_grid = Backend::DeviceParallel(DeviceConfig::default().with_grid_size(0));
    for backend in [zero_block, zero_grid] {
        let result = Basis::<f64>::create_tensor_lagrange(backend, 1, 1, 2, 2, QuadMode::Gauss);
        assert!(matches!(result, Err(Error::UnsupportedConfig(_))));
    }
}

#[test]
fn device_basis_leaves_results_in_device_memory() {
    let backend = Backend::DeviceParallel(DeviceConfig::default());
    let basis = Basis::<f64>::create_tensor_lagrange(backend, 2, 1, 3, 4, QuadMode::Gauss).unwrap();
    let reference = Basis::<f64>::create_tensor_lagrange(Backend::Reference, 2, 1, 3, 4, QuadMode::Gauss).unwrap();

    let u = Vector::from_vec(sample_values(18, 3));
    let mut v = Vector::zeros(32);
    basis.apply(2, NoTranspose, Interp, &u, &mut v).unwrap();
    assert!(v.is_valid(MemSpace::Device));
    assert!(!v.is_valid(MemSpace::Host));

    let mut expected = Vector::zeros(32);
    reference.apply(2, NoTranspose, Interp, &u, &mut expected).unwrap();
    assert_approx_slice_eq!(v.to_vec(), expected.to_vec(), tol = 1e-12);
}

#[test]
fn explicit_basis_data_is_used_as_given() {
    // Linear nodal basis on [-1, 1] with the midpoint rule
    let interp1d = [0.5, 0.5];
    let grad1d = [-0.5, 0.5];
    let basis =
        Basis::<f64>::create_tensor(Backend::Reference, 2, 1, 2, 1, &interp1d, &grad1d, &[0.0], &[2.0]).unwrap();
    let u = [1.0, 3.0, 5.0, 11.0];

    assert_eq!(apply(&basis, 1, NoTranspose, Interp, &u), vec![5.0]);
    assert_eq!(apply(&basis, 1, NoTranspose, Grad, &u), vec![2.0, 3.0]);
    assert_eq!(apply(&basis, 1, NoTranspose, Weight, &[]), vec![4.0]);
}
