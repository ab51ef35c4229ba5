//! Strategies for property-based testing of restrictions and bases.
use crate::restriction::RestrictionLayout;
use ::proptest::collection::vec;
use ::proptest::prelude::*;

impl Arbitrary for RestrictionLayout {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (0..6usize, 1..5usize, 1..4usize, 1..20usize)
            .prop_map(|(nelem, elemsize, ncomp, ndof)| RestrictionLayout::new(nelem, elemsize, ncomp, ndof))
            .boxed()
    }
}

/// A layout together with valid element indices, with arbitrary sharing of nodes
/// between elements.
pub fn layout_with_indices() -> impl Strategy<Value = (RestrictionLayout, Vec<usize>)> {
    any::<RestrictionLayout>().prop_flat_map(|layout| {
        let indices = vec(0..layout.ndof, layout.nelem * layout.elemsize);
        (Just(layout), indices)
    })
}

/// A layout whose elements fit into the global vector without indices.
pub fn strided_layout() -> impl Strategy<Value = RestrictionLayout> {
    (0..6usize, 1..5usize, 1..4usize, 0..5usize).prop_map(|(nelem, elemsize, ncomp, extra)| {
        RestrictionLayout::new(nelem, elemsize, ncomp, nelem * elemsize + extra)
    })
}

/// Values in a moderate range, so that inner products do not lose all precision.
pub fn values(len: usize) -> impl Strategy<Value = Vec<f64>> {
    vec(-10.0..10.0f64, len)
}
