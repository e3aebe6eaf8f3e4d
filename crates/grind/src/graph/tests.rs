use std::sync::Arc;

use ndarray::arr2;

use crate::block::{build_gated_block, BlockWeights, GatedBlockConfig};
use crate::error::GraphError;
use crate::graph::{BinaryKind, Clamp, OpKind, SubgraphBuilder, UnaryKind};
use crate::precision::Precision;
use crate::tensor::{DType, Dim, ExternalId, WeightData};

fn weight_2x2() -> WeightData {
    WeightData::F32(Arc::new(arr2(&[[1.0f32, 2.0], [3.0, 4.0]])))
}

#[test]
fn clamp_rejects_inverted_bounds() {
    assert!(Clamp::new(1.0, -1.0).validate().is_err());
    assert!(Clamp::new(f32::NAN, 1.0).validate().is_err());
    assert!(Clamp::default().validate().is_ok());
    assert!(Clamp::new(-6.0, 6.0).validate().is_ok());
}

#[test]
fn fully_connected_contraction_mismatch() {
    let mut b = SubgraphBuilder::new(2);
    let input = b
        .define_external_input(vec![Dim::Batch, Dim::Fixed(3)], DType::F32, ExternalId(0))
        .unwrap();
    let output = b
        .define_external_output(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(1))
        .unwrap();
    // Filter expects K=2, input provides K=3.
    let filter = b.define_static_weight(weight_2x2()).unwrap();
    let err = b
        .fully_connected(input, filter, None, output, Clamp::default())
        .unwrap_err();
    assert!(matches!(err, GraphError::ShapeMismatch { .. }));
}

#[test]
fn single_producer_is_enforced() {
    let mut b = SubgraphBuilder::new(2);
    let input = b
        .define_external_input(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(0))
        .unwrap();
    let output = b
        .define_external_output(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(1))
        .unwrap();
    let filter = b.define_static_weight(weight_2x2()).unwrap();
    b.fully_connected(input, filter, None, output, Clamp::default())
        .unwrap();
    let err = b
        .fully_connected(input, filter, None, output, Clamp::default())
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidParams(_)));
}

#[test]
fn operator_cannot_produce_an_input() {
    let mut b = SubgraphBuilder::new(2);
    let input = b
        .define_external_input(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(0))
        .unwrap();
    b.define_external_output(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(1))
        .unwrap();
    let err = b.unary(UnaryKind::Sigmoid, input, input).unwrap_err();
    assert!(matches!(err, GraphError::InvalidParams(_)));
}

#[test]
fn cycle_is_detected() {
    // Two unary ops feeding each other; legal at definition time, caught
    // by the topological walk in finish().
    let mut b = SubgraphBuilder::new(0);
    let a = b
        .define_internal(vec![Dim::Fixed(1), Dim::Fixed(2)], DType::F32)
        .unwrap();
    let c = b
        .define_internal(vec![Dim::Fixed(1), Dim::Fixed(2)], DType::F32)
        .unwrap();
    b.unary(UnaryKind::Sigmoid, a, c).unwrap();
    b.unary(UnaryKind::Sigmoid, c, a).unwrap();
    let err = b.finish().unwrap_err();
    assert!(matches!(err, GraphError::CycleDetected(_)));
}

#[test]
fn dangling_internal_is_rejected() {
    let mut b = SubgraphBuilder::new(2);
    let input = b
        .define_external_input(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(0))
        .unwrap();
    let output = b
        .define_external_output(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(1))
        .unwrap();
    let filter = b.define_static_weight(weight_2x2()).unwrap();
    b.fully_connected(input, filter, None, output, Clamp::default())
        .unwrap();
    // Produced by nothing, consumed by nothing.
    b.define_internal(vec![Dim::Fixed(1), Dim::Fixed(2)], DType::F32)
        .unwrap();
    let err = b.finish().unwrap_err();
    assert!(matches!(err, GraphError::InvalidParams(_)));
}

#[test]
fn missing_external_definition_is_an_identifier_mismatch() {
    let mut b = SubgraphBuilder::new(2);
    let input = b
        .define_external_input(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(0))
        .unwrap();
    let out = b
        .define_internal(vec![Dim::Fixed(1), Dim::Fixed(2)], DType::F32)
        .unwrap();
    b.unary(UnaryKind::Sigmoid, input, out).unwrap();
    // External id 1 was declared but never defined.
    let err = b.finish().unwrap_err();
    assert!(matches!(
        err,
        GraphError::IdentifierMismatch {
            declared: 2,
            found: 1
        }
    ));
}

#[test]
fn duplicate_external_id_is_rejected() {
    let mut b = SubgraphBuilder::new(2);
    b.define_external_input(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(0))
        .unwrap();
    let err = b
        .define_external_input(vec![Dim::Batch, Dim::Fixed(2)], DType::F32, ExternalId(0))
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidParams(_)));
}

#[test]
fn quantized_value_only_usable_as_filter() {
    let mut b = SubgraphBuilder::new(0);
    let w = b
        .define_static_weight(WeightData::Q8(Arc::new(
            crate::kernels::quantize::quantize_matrix_q8(&arr2(&[[1.0f32, 2.0], [3.0, 4.0]])),
        )))
        .unwrap();
    let out = b
        .define_internal(vec![Dim::Fixed(2), Dim::Fixed(2)], DType::F32)
        .unwrap();
    let err = b.unary(UnaryKind::Sigmoid, w, out).unwrap_err();
    assert!(matches!(err, GraphError::InvalidParams(_)));
}

#[test]
fn gated_block_topology() {
    let config = GatedBlockConfig {
        input_dim: 3,
        inter_dim: 4,
        output_dim: 2,
        precision: Precision::FullPrecision,
    };
    let sg = build_gated_block(&config, &BlockWeights::ramp(3, 4, 2)).unwrap();

    assert_eq!(sg.external_count(), 2);
    let kinds: Vec<OpKind> = sg.ops().iter().map(|op| op.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            OpKind::FullyConnected,
            OpKind::FullyConnected,
            OpKind::Unary,
            OpKind::Binary,
            OpKind::Binary,
            OpKind::FullyConnected,
        ]
    );

    // A topological order exists and respects all producer edges.
    let order: Vec<usize> = sg.ops_in_order().map(|(i, _)| i).collect();
    assert_eq!(order.len(), sg.ops().len());
    let mut position = vec![0usize; order.len()];
    for (pos, &op_idx) in order.iter().enumerate() {
        position[op_idx] = pos;
    }
    for (op_idx, op) in sg.ops().iter().enumerate() {
        for input in op.inputs() {
            if let Some((producer_idx, _)) = sg
                .ops()
                .iter()
                .enumerate()
                .find(|(_, candidate)| candidate.output() == input)
            {
                assert!(position[producer_idx] < position[op_idx]);
            }
        }
    }
}

#[test]
fn gated_block_rejects_zero_dims() {
    let config = GatedBlockConfig {
        input_dim: 0,
        inter_dim: 4,
        output_dim: 2,
        precision: Precision::FullPrecision,
    };
    let err = build_gated_block(&config, &BlockWeights::ramp(1, 4, 2)).unwrap_err();
    assert!(matches!(err, GraphError::InvalidShape { .. }));
}

#[test]
fn gated_block_checks_weight_dims() {
    let config = GatedBlockConfig {
        input_dim: 3,
        inter_dim: 4,
        output_dim: 2,
        precision: Precision::FullPrecision,
    };
    // Weights shaped for K=5 instead of K=3.
    let err = build_gated_block(&config, &BlockWeights::ramp(5, 4, 2)).unwrap_err();
    assert!(matches!(err, GraphError::ShapeMismatch { .. }));
}

#[test]
fn topology_is_invariant_across_precisions() {
    let weights = BlockWeights::ramp(3, 4, 2);
    let build = |precision| {
        let config = GatedBlockConfig {
            input_dim: 3,
            inter_dim: 4,
            output_dim: 2,
            precision,
        };
        build_gated_block(&config, &weights).unwrap()
    };
    let full = build(Precision::FullPrecision);
    let q8 = build(Precision::Quantized8Bit);
    let q4 = build(Precision::Quantized4Bit);

    let kinds =
        |sg: &crate::graph::Subgraph| sg.ops().iter().map(|op| op.kind()).collect::<Vec<_>>();
    assert_eq!(kinds(&full), kinds(&q8));
    assert_eq!(kinds(&full), kinds(&q4));

    // Only the weight dtype metadata differs.
    let weight_dtypes = |sg: &crate::graph::Subgraph| {
        sg.values()
            .iter()
            .filter(|v| v.static_data().is_some())
            .map(|v| v.dtype)
            .collect::<Vec<_>>()
    };
    assert!(weight_dtypes(&full).iter().all(|d| *d == DType::F32));
    assert!(weight_dtypes(&q8).iter().all(|d| *d == DType::Q8));
    assert!(weight_dtypes(&q4).iter().all(|d| *d == DType::Q4));
}

#[test]
fn shared_gate_up_storage_stays_two_values() {
    let config = GatedBlockConfig {
        input_dim: 3,
        inter_dim: 4,
        output_dim: 2,
        precision: Precision::FullPrecision,
    };
    let weights = BlockWeights::ramp(3, 4, 2);
    assert!(Arc::ptr_eq(&weights.gate, &weights.up));
    let sg = build_gated_block(&config, &weights).unwrap();
    let weight_count = sg
        .values()
        .iter()
        .filter(|v| v.static_data().is_some())
        .count();
    assert_eq!(weight_count, 3);
}

#[test]
fn subgraph_release_without_references() {
    let config = GatedBlockConfig {
        input_dim: 2,
        inter_dim: 2,
        output_dim: 2,
        precision: Precision::FullPrecision,
    };
    let sg = build_gated_block(&config, &BlockWeights::ramp(2, 2, 2)).unwrap();
    assert!(crate::graph::Subgraph::release(sg).is_ok());
}
