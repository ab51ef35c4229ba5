//! Operator pipelines built from a restriction and a basis, as used for matrix-free
//! finite element operators.
use super::all_backends;
use sumfact::EvalMode::{Grad, Interp, Weight};
use sumfact::TransposeMode::{NoTranspose, Transpose};
use sumfact::{Backend, Basis, ElemRestriction, IndexArray, MemSpace, QuadMode, RestrictionLayout, Vector};
use util::{assert_approx_slice_eq, sample_values};

const P1D: usize = 4;
const Q1D: usize = 4;
const NX: usize = 4;
const NY: usize = 2;

/// Connectivity of a structured `NX x NY` grid of quadrilaterals with `P1D x P1D` nodes each.
fn grid_indices() -> (RestrictionLayout, Vec<usize>) {
    let n = NX * (P1D - 1) + 1;
    let m = NY * (P1D - 1) + 1;
    let mut indices = Vec::new();
    for ey in 0..NY {
        for ex in 0..NX {
            for j in 0..P1D {
                for i in 0..P1D {
                    indices.push(ex * (P1D - 1) + i + n * (ey * (P1D - 1) + j));
                }
            }
        }
    }
    (RestrictionLayout::new(NX * NY, P1D * P1D, 1, n * m), indices)
}

/// Apply `Rᵀ Bᵀ W B R` with `B` interpolation or gradient, on the reference geometry.
fn apply_operator(backend: Backend, gradient: bool, u: &Vector<f64>) -> Vector<f64> {
    let (layout, indices) = grid_indices();
    let nelem = layout.nelem;
    let restriction = ElemRestriction::create(backend, layout, MemSpace::Host, IndexArray::Own(indices)).unwrap();
    let basis = Basis::create_tensor_lagrange(backend, 2, 1, P1D, Q1D, QuadMode::Gauss).unwrap();
    let data = basis.tensor_basis();
    let emode = if gradient { Grad } else { Interp };

    let mut local = Vector::zeros(layout.local_len());
    restriction
        .apply(NoTranspose, NoTranspose, u, &mut local, None)
        .unwrap();

    let mut qdata = Vector::zeros(data.qpt_len(nelem, emode));
    basis
        .apply(nelem, NoTranspose, emode, &local, &mut qdata)
        .unwrap();

    let mut weights = Vector::zeros(data.qpt_len(nelem, Weight));
    basis
        .apply(nelem, NoTranspose, Weight, &Vector::zeros(0), &mut weights)
        .unwrap();
    {
        let nqpt = data.num_qpts();
        let weights = weights.read(MemSpace::Host);
        let mut qdata = qdata.write(MemSpace::Host);
        let per_element = qdata.len() / nelem;
        for (e, q_e) in qdata.chunks_mut(per_element).enumerate() {
            for (k, value) in q_e.iter_mut().enumerate() {
                *value *= weights[e * nqpt + k % nqpt];
            }
        }
    }

    basis
        .apply(nelem, Transpose, emode, &qdata, &mut local)
        .unwrap();
    let mut v = Vector::zeros(layout.global_len());
    restriction
        .apply(Transpose, NoTranspose, &local, &mut v, None)
        .unwrap();
    v
}

#[test]
fn mass_operator_integrates_constants() {
    let (layout, _) = grid_indices();
    let ones = Vector::from_vec(vec![1.0; layout.global_len()]);
    for backend in all_backends() {
        let v = apply_operator(backend, false, &ones).to_vec();
        let total: f64 = v.iter().sum();
        // Every element is the reference square with area 4
        assert!((total - 4.0 * (NX * NY) as f64).abs() < 1e-12, "total {} for {}", total, backend);
    }
}

#[test]
fn stiffness_operator_annihilates_constants() {
    let (layout, _) = grid_indices();
    let ones = Vector::from_vec(vec![1.0; layout.global_len()]);
    for backend in all_backends() {
        let v = apply_operator(backend, true, &ones).to_vec();
        let max = v.iter().fold(0.0f64, |max, x| max.max(x.abs()));
        assert!(max < 1e-12, "max |K 1| = {} for {}", max, backend);
    }
}

#[test]
fn operators_agree_across_backends() {
    let (layout, _) = grid_indices();
    let u = Vector::from_vec(sample_values(layout.global_len(), 9));
    for gradient in [false, true] {
        let expected = apply_operator(Backend::Reference, gradient, &u).to_vec();
        for backend in all_backends() {
            let v = apply_operator(backend, gradient, &u).to_vec();
            assert_approx_slice_eq!(v, expected, tol = 1e-11);
        }
    }
}
