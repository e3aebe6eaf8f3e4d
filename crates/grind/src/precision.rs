//! Precision variants: maps a requested numeric precision onto concrete
//! weight dtypes and quantization metadata.
//!
//! Topology is identical across all variants; only the storage of static
//! weights differs. The selector is a build-time configuration value, so
//! an unrecognized name fails while assembling the block, never at
//! runtime.

use std::str::FromStr;
use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::kernels::quantize::{quantize_matrix_q4_0, quantize_matrix_q8};
use crate::tensor::{DType, WeightData};

/// Supported numeric precisions for block weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Precision {
    /// 32-bit float weights.
    #[serde(alias = "fp32", alias = "f32")]
    FullPrecision,
    /// 8-bit weights with per-channel scales.
    #[serde(alias = "int8", alias = "q8")]
    Quantized8Bit,
    /// 4-bit weights with block-wise scales.
    #[serde(alias = "int4", alias = "q4")]
    Quantized4Bit,
}

impl FromStr for Precision {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full-precision" | "fp32" | "f32" => Ok(Precision::FullPrecision),
            "quantized-8bit" | "int8" | "q8" => Ok(Precision::Quantized8Bit),
            "quantized-4bit" | "int4" | "q4" => Ok(Precision::Quantized4Bit),
            _ => Err(GraphError::UnsupportedPrecision(s.to_string())),
        }
    }
}

impl Precision {
    /// Storage dtype for static weights under this precision.
    pub fn weight_dtype(&self) -> DType {
        match self {
            Precision::FullPrecision => DType::F32,
            Precision::Quantized8Bit => DType::Q8,
            Precision::Quantized4Bit => DType::Q4,
        }
    }

    /// Encodes one weight matrix for this precision, attaching the
    /// quantization metadata (per-channel or per-block scales) that the
    /// kernel engine's quantization-aware matmul variants consume.
    pub fn encode_weight(&self, weights: &Arc<Array2<f32>>) -> WeightData {
        match self {
            Precision::FullPrecision => WeightData::F32(Arc::clone(weights)),
            Precision::Quantized8Bit => WeightData::Q8(Arc::new(quantize_matrix_q8(weights))),
            Precision::Quantized4Bit => WeightData::Q4(Arc::new(quantize_matrix_q4_0(weights))),
        }
    }
}
