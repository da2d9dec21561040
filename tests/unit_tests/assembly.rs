use fenris_dirac::assembly::{GlobalSystem, TagId, TagSelection};
use fenris_dirac::nalgebra::{DMatrix, DVector};
use matrixcompare::assert_matrix_eq;
use rayon::prelude::*;
use std::collections::BTreeSet;

#[test]
fn tag_selection_classification() {
    let available = BTreeSet::from([TagId(0), TagId(1), TagId(2)]);
    assert_eq!(TagSelection::from_requested(&available, &available), TagSelection::All);
    assert_eq!(
        TagSelection::from_requested(&BTreeSet::from([TagId(1)]), &available),
        TagSelection::One(TagId(1))
    );
    let two = BTreeSet::from([TagId(0), TagId(2)]);
    assert_eq!(TagSelection::from_requested(&two, &available), TagSelection::Many(two.clone()));

    // A single available tag requested in full is "all"
    let system_only = BTreeSet::from([TagId::SYSTEM]);
    assert_eq!(TagSelection::from_requested(&system_only, &system_only), TagSelection::All);
}

#[test]
fn tag_selection_selects_and_filters() {
    let contributor = BTreeSet::from([TagId(0), TagId(2)]);
    let other = BTreeSet::from([TagId(1)]);

    let all = TagSelection::All;
    assert!(all.selects(&contributor));
    assert!(!all.selects(&BTreeSet::new()));
    assert_eq!(all.filter(&contributor).collect::<Vec<_>>(), vec![TagId(0), TagId(2)]);

    let one = TagSelection::One(TagId(2));
    assert!(one.selects(&contributor));
    assert!(!one.selects(&other));
    assert_eq!(one.filter(&contributor).collect::<Vec<_>>(), vec![TagId(2)]);

    let many = TagSelection::Many(BTreeSet::from([TagId(1), TagId(2)]));
    assert!(many.selects(&contributor));
    assert!(many.selects(&other));
    assert_eq!(many.filter(&contributor).collect::<Vec<_>>(), vec![TagId(2)]);
}

#[test]
fn global_system_accumulates_tagged_contributions() {
    let extra = TagId(3);
    let system = GlobalSystem::with_tags(4, [TagId::SYSTEM, extra], [TagId::SYSTEM]);
    assert_eq!(system.num_dofs(), 4);

    let local = DVector::from_vec(vec![1.0, 2.0]);
    system.add_residual([TagId::SYSTEM], &[0, 2], &local);
    system.add_residual([TagId::SYSTEM, extra], &[2, 3], &local);
    // Unknown tags are ignored
    system.add_residual([TagId(7)], &[0, 1], &local);

    assert_matrix_eq!(
        system.residual(TagId::SYSTEM).unwrap(),
        DVector::from_vec(vec![1.0, 0.0, 3.0, 2.0])
    );
    assert_matrix_eq!(system.residual(extra).unwrap(), DVector::from_vec(vec![0.0, 0.0, 1.0, 2.0]));
    assert!(system.residual(TagId(7)).is_none());

    let block = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    system.add_jacobian([TagId::SYSTEM], &[0, 1], &[1, 3], &block);
    system.add_jacobian([TagId::SYSTEM, extra], &[0, 1], &[1, 3], &block);
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(4, 4, &[
        0.0, 2.0, 0.0, 4.0,
        0.0, 6.0, 0.0, 8.0,
        0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
    ]);
    assert_matrix_eq!(system.dense_jacobian(TagId::SYSTEM).unwrap(), expected);
    assert!(system.jacobian(extra).is_none());
    assert_eq!(system.jacobian(TagId::SYSTEM).unwrap().nnz(), 4);

    system.zero();
    assert_matrix_eq!(system.residual(TagId::SYSTEM).unwrap(), DVector::zeros(4));
    assert_matrix_eq!(system.dense_jacobian(TagId::SYSTEM).unwrap(), DMatrix::zeros(4, 4));
}

#[test]
#[should_panic]
fn mismatched_local_residual_panics() {
    let system = GlobalSystem::new(3);
    system.add_residual([TagId::SYSTEM], &[0, 1], &DVector::zeros(3));
}

#[test]
fn concurrent_accumulation_is_consistent() {
    let n = 16;
    let system = GlobalSystem::new(n);
    (0..1000usize).into_par_iter().for_each(|i| {
        let dofs = [i % n, (i + 1) % n];
        system.add_residual([TagId::SYSTEM], &dofs, &DVector::from_vec(vec![1.0, 1.0]));
        system.add_jacobian([TagId::SYSTEM], &dofs, &dofs, &DMatrix::repeat(2, 2, 1.0));
    });

    let residual = system.residual(TagId::SYSTEM).unwrap();
    assert_eq!(residual.sum(), 2000.0);
    let jacobian = system.dense_jacobian(TagId::SYSTEM).unwrap();
    assert_eq!(jacobian.sum(), 4000.0);
}
