use std::sync::Arc;

use ndarray::arr2;

use crate::error::GraphError;
use crate::kernels::quantize::{quantize_matrix_q4_0, quantize_matrix_q8};
use crate::tensor::{DType, Dim, ExternalId, ValueRole, ValueTable, WeightData};

fn table() -> ValueTable {
    ValueTable::new()
}

#[test]
fn define_assigns_dense_ids() {
    let mut t = table();
    let a = t
        .define(
            vec![Dim::Batch, Dim::Fixed(3)],
            DType::F32,
            ValueRole::ExternalInput,
            Some(ExternalId(0)),
            None,
        )
        .unwrap();
    let b = t
        .define(
            vec![Dim::Fixed(1), Dim::Fixed(4)],
            DType::F32,
            ValueRole::Internal,
            None,
            None,
        )
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(t.len(), 2);
    assert_eq!(t.get(a).role, ValueRole::ExternalInput);
    assert_eq!(t.get(b).shape, vec![Dim::Fixed(1), Dim::Fixed(4)]);
}

#[test]
fn zero_dimension_is_rejected() {
    let mut t = table();
    let err = t
        .define(
            vec![Dim::Fixed(0), Dim::Fixed(4)],
            DType::F32,
            ValueRole::Internal,
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidShape { .. }));
}

#[test]
fn batch_placeholder_only_on_externals() {
    let mut t = table();
    let err = t
        .define(
            vec![Dim::Batch, Dim::Fixed(4)],
            DType::F32,
            ValueRole::Internal,
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidShape { .. }));
}

#[test]
fn static_weight_requires_data() {
    let mut t = table();
    let err = t
        .define(
            vec![Dim::Fixed(2), Dim::Fixed(2)],
            DType::F32,
            ValueRole::StaticWeight,
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::RoleConflict(_)));
}

#[test]
fn data_on_internal_is_a_role_conflict() {
    let mut t = table();
    let data = WeightData::F32(Arc::new(arr2(&[[1.0f32, 2.0], [3.0, 4.0]])));
    let err = t
        .define(
            vec![Dim::Fixed(2), Dim::Fixed(2)],
            DType::F32,
            ValueRole::Internal,
            None,
            Some(data),
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::RoleConflict(_)));
}

#[test]
fn quantized_dtype_confined_to_weights() {
    let mut t = table();
    let err = t
        .define(
            vec![Dim::Fixed(1), Dim::Fixed(4)],
            DType::Q8,
            ValueRole::Internal,
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::RoleConflict(_)));
}

#[test]
fn external_role_requires_external_id() {
    let mut t = table();
    let err = t
        .define(
            vec![Dim::Batch, Dim::Fixed(3)],
            DType::F32,
            ValueRole::ExternalInput,
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::RoleConflict(_)));
}

#[test]
fn buffer_sizes_per_dtype() {
    assert_eq!(DType::F32.buffer_size_for_shape(&[2, 3]), 24);
    // Q8: one i8 per element plus an f32 scale per row.
    assert_eq!(DType::Q8.buffer_size_for_shape(&[4, 3]), 12 + 16);
    // Q4: [4, 64] is two full blocks per row, 18 bytes each.
    assert_eq!(DType::Q4.buffer_size_for_shape(&[4, 64]), 4 * 2 * 18);
    // Q4 with a padded final block.
    assert_eq!(DType::Q4.buffer_size_for_shape(&[4, 3]), 4 * 18);
}

#[test]
fn weight_data_reports_logical_shape() {
    let w = arr2(&[[1.0f32, -2.0, 0.5], [0.25, 4.0, -1.0]]);
    let f32_data = WeightData::F32(Arc::new(w.clone()));
    assert_eq!(f32_data.shape(), [2, 3]);
    assert_eq!(f32_data.dtype(), DType::F32);

    let q8 = WeightData::Q8(Arc::new(quantize_matrix_q8(&w)));
    assert_eq!(q8.shape(), [2, 3]);
    assert_eq!(q8.dtype(), DType::Q8);

    let q4 = WeightData::Q4(Arc::new(quantize_matrix_q4_0(&w)));
    assert_eq!(q4.shape(), [2, 3]);
    assert_eq!(q4.dtype(), DType::Q4);
}
