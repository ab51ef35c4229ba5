//! Apply a matrix-free mass operator `Rᵀ Bᵀ W B R` on a structured quadrilateral grid.
//!
//! Usage: `cargo run --release --example pipeline -- [resource] [p1d] [q1d]`, where `resource` is
//! one of `/cpu/self/ref`, `/cpu/self/opt`, `/gpu/cuda/ref` or `/gpu/cuda/reg`.
use eyre::eyre;
use std::time::Instant;
use sumfact::EvalMode::{Interp, Weight};
use sumfact::TransposeMode::{NoTranspose, Transpose};
use sumfact::{Backend, Basis, ElemRestriction, IndexArray, MemSpace, QuadMode, RestrictionLayout, Vector};

/// Elements per batch accepted by every backend.
const NELEM: usize = 8;

fn parse_arg<T: std::str::FromStr>(args: &[String], idx: usize, default: T) -> eyre::Result<T> {
    match args.get(idx) {
        Some(arg) => arg
            .parse()
            .map_err(|_| eyre!("failed to parse argument {}: '{}'", idx, arg)),
        None => Ok(default),
    }
}

fn main() -> eyre::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let backend: Backend = parse_arg(&args, 1, Backend::Reference)?;
    let p1d = parse_arg(&args, 2, 4)?;
    let q1d = parse_arg(&args, 3, p1d)?;

    // A 4 x 2 grid of quadrilaterals, sharing nodes along element edges
    let (nx, ny) = (4, 2);
    let n = nx * (p1d - 1) + 1;
    let m = ny * (p1d - 1) + 1;
    let mut indices = Vec::with_capacity(NELEM * p1d * p1d);
    for ey in 0..ny {
        for ex in 0..nx {
            for j in 0..p1d {
                for i in 0..p1d {
                    indices.push(ex * (p1d - 1) + i + n * (ey * (p1d - 1) + j));
                }
            }
        }
    }
    let layout = RestrictionLayout::new(NELEM, p1d * p1d, 1, n * m);

    let restriction = ElemRestriction::create(backend, layout, MemSpace::Host, IndexArray::Own(indices))?;
    let basis = Basis::<f64>::create_tensor_lagrange(backend, 2, 1, p1d, q1d, QuadMode::Gauss)?;
    let data = basis.tensor_basis();
    println!("Backend: {} ({:?})", backend, backend);
    println!("{} elements, {} nodes, p1d = {}, q1d = {}", NELEM, n * m, p1d, q1d);

    let mut weights = Vector::zeros(data.qpt_len(NELEM, Weight));
    basis.apply(NELEM, NoTranspose, Weight, &Vector::zeros(0), &mut weights)?;

    let u = Vector::from_vec(vec![1.0; layout.global_len()]);
    let mut local = Vector::zeros(layout.local_len());
    let mut qdata = Vector::zeros(data.qpt_len(NELEM, Interp));
    let mut v = Vector::zeros(layout.global_len());

    let start = Instant::now();
    restriction.apply(NoTranspose, NoTranspose, &u, &mut local, None)?;
    basis.apply(NELEM, NoTranspose, Interp, &local, &mut qdata)?;
    {
        let weights = weights.read(MemSpace::Host);
        let mut qdata = qdata.write(MemSpace::Host);
        for (value, w) in qdata.iter_mut().zip(weights.iter()) {
            *value *= w;
        }
    }
    basis.apply(NELEM, Transpose, Interp, &qdata, &mut local)?;
    restriction.apply(Transpose, NoTranspose, &local, &mut v, None)?;
    let elapsed = start.elapsed();

    let total: f64 = v.to_vec().iter().sum();
    println!("Sum of M * 1: {:.15} (expected {})", total, 4 * NELEM);
    println!("Operator applied in {:?}", elapsed);
    Ok(())
}
