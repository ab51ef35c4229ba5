use super::all_backends;
use sumfact::EvalMode::{Grad, Interp, Weight};
use sumfact::TransposeMode::{NoTranspose, Transpose};
use sumfact::{Backend, Basis, DeviceConfig, DeviceVariant, EvalMode, QuadMode, TransposeMode};
use util::{assert_approx_slice_eq, sample_values};

/// Basis configurations that every backend can evaluate.
///
/// The 1D sizes are multiples of the SIMD tile, and `(8, 4)` has no colocated gradient.
const CONFIGS: [(usize, usize, usize, usize); 6] = [
    // (dim, ncomp, p1d, q1d)
    (1, 1, 4, 4),
    (1, 3, 8, 4),
    (2, 1, 4, 8),
    (2, 2, 8, 4),
    (3, 1, 4, 4),
    (3, 2, 4, 8),
];

fn apply(basis: &Basis<f64>, nelem: usize, tmode: TransposeMode, emode: EvalMode, u: &[f64]) -> Vec<f64> {
    let mut v = vec![0.0; basis.tensor_basis().output_len(nelem, tmode, emode)];
    basis.apply_slices(nelem, tmode, emode, u, &mut v).unwrap();
    v
}

fn assert_backend_matches_reference(backend: Backend, nelem: usize) {
    for (dim, ncomp, p1d, q1d) in CONFIGS {
        let reference =
            Basis::create_tensor_lagrange(Backend::Reference, dim, ncomp, p1d, q1d, QuadMode::Gauss).unwrap();
        let basis = Basis::create_tensor_lagrange(backend, dim, ncomp, p1d, q1d, QuadMode::Gauss).unwrap();
        let data = reference.tensor_basis();

        for (tmode, emode) in [
            (NoTranspose, Interp),
            (Transpose, Interp),
            (NoTranspose, Grad),
            (Transpose, Grad),
            (NoTranspose, Weight),
        ] {
            let u = sample_values(data.input_len(nelem, tmode, emode), (dim + p1d) as u64);
            let expected = apply(&reference, nelem, tmode, emode, &u);
            let result = apply(&basis, nelem, tmode, emode, &u);
            println!("backend {}, dim {}, p1d {}, q1d {}, {:?} {:?}", backend, dim, p1d, q1d, tmode, emode);
            assert_approx_slice_eq!(result, expected, tol = 1e-12);
        }
    }
}

#[test]
fn shared_memory_device_matches_reference() {
    let configs = [
        DeviceConfig::default(),
        DeviceConfig::default().with_block_size(1),
        DeviceConfig::default().with_block_size(5).with_grid_size(2),
        DeviceConfig::default().with_block_size(256).with_grid_size(64),
    ];
    for config in configs {
        for nelem in [1, 8, 33] {
            assert_backend_matches_reference(Backend::DeviceParallel(config), nelem);
        }
    }
}

#[test]
fn register_device_matches_reference() {
    let backend = Backend::DeviceParallel(DeviceConfig::default().with_variant(DeviceVariant::RegisterBlocked));
    // Partial warps, a full warp and more than one warp
    for nelem in [1, 8, 32, 33] {
        assert_backend_matches_reference(backend, nelem);
    }
}

#[test]
fn vectorized_host_matches_reference() {
    for nelem in [1, 8] {
        assert_backend_matches_reference(Backend::VectorizedHost, nelem);
    }
}

#[test]
fn vectorized_single_element_matches_batch_entry() {
    let basis = Basis::create_tensor_lagrange(Backend::VectorizedHost, 2, 1, 4, 8, QuadMode::Gauss).unwrap();
    let data = basis.tensor_basis();
    let stride = data.nodal_len(1);
    let u = sample_values(data.nodal_len(8), 11);
    let batch = apply(&basis, 8, NoTranspose, Grad, &u);

    let out_stride = data.qpt_len(1, Grad);
    for e in [0, 3, 7] {
        let single = apply(&basis, 1, NoTranspose, Grad, &u[e * stride..(e + 1) * stride]);
        assert_eq!(single, &batch[e * out_stride..(e + 1) * out_stride]);
    }
}

#[test]
fn single_precision_backends_agree() {
    for backend in all_backends() {
        let reference = Basis::<f32>::create_tensor_lagrange(Backend::Reference, 2, 1, 4, 4, QuadMode::Gauss).unwrap();
        let basis = Basis::<f32>::create_tensor_lagrange(backend, 2, 1, 4, 4, QuadMode::Gauss).unwrap();
        let u: Vec<f32> = sample_values(8 * 16, 2).into_iter().map(|x| x as f32).collect();

        let mut expected = vec![0.0f32; 8 * 32];
        let mut result = vec![0.0f32; 8 * 32];
        reference.apply_slices(8, NoTranspose, Grad, &u, &mut expected).unwrap();
        basis.apply_slices(8, NoTranspose, Grad, &u, &mut result).unwrap();
        for (a, b) in result.iter().zip(&expected) {
            assert!((a - b).abs() <= 1e-4 * (1.0 + b.abs()), "{} vs {} for {}", a, b, backend);
        }
    }
}
