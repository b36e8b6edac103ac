// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::rate::QP2LAMBDA;
use crate::serialize::{Deserialize, Serialize};

/// Contains the quantizer limits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizerSettings {
  /// Minimum quantizer, in QP units.
  pub qmin: i32,
  /// Maximum quantizer, in QP units.
  pub qmax: i32,
  /// Minimum picture lambda.
  pub lmin: i32,
  /// Maximum picture lambda.
  pub lmax: i32,
  /// Maximum quantizer difference between consecutive pictures of the same
  /// type, in QP units.
  pub max_qdiff: i32,

  /// Quantizer factor between P and I pictures.
  ///
  /// A negative value makes I quantizers derive from the rate equation
  /// instead of from the last P quantizer.
  pub i_quant_factor: f32,
  /// Quantizer offset between P and I pictures.
  pub i_quant_offset: f32,
  /// Quantizer factor between P and B pictures.
  ///
  /// A negative value makes B quantizers derive from the rate equation
  /// instead of from the last non-B quantizer.
  pub b_quant_factor: f32,
  /// Quantizer offset between P and B pictures.
  pub b_quant_offset: f32,
}

impl Default for QuantizerSettings {
  fn default() -> Self {
    QuantizerSettings::from_qp_range(2, 31)
  }
}

impl QuantizerSettings {
  /// Settings with the given QP range and the lambda range matching it.
  pub const fn from_qp_range(qmin: i32, qmax: i32) -> Self {
    QuantizerSettings {
      qmin,
      qmax,
      lmin: qmin * QP2LAMBDA,
      lmax: qmax * QP2LAMBDA,
      max_qdiff: 3,
      i_quant_factor: -0.8,
      i_quant_offset: 0.0,
      b_quant_factor: 1.25,
      b_quant_offset: 1.25,
    }
  }

  /// Quantizer factor and offset applying to `pict_type` relative to P.
  pub(crate) fn factor_offset(
    &self, pict_type: crate::api::PictureType,
  ) -> Option<(f32, f32)> {
    use crate::api::PictureType::*;
    match pict_type {
      I => Some((self.i_quant_factor, self.i_quant_offset)),
      B => Some((self.b_quant_factor, self.b_quant_offset)),
      _ => None,
    }
  }
}

/// Contains the per-macroblock adaptive quantization settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveQuantSettings {
  /// Quantizer increase for bright macroblocks.
  pub lumi_masking: f32,
  /// Quantizer increase for dark macroblocks.
  pub dark_masking: f32,
  /// Quantizer increase for macroblocks with high temporal complexity.
  pub temporal_cplx_masking: f32,
  /// Quantizer increase for macroblocks with high spatial complexity.
  pub spatial_cplx_masking: f32,
  /// Quantizer increase for intra macroblocks in predicted pictures.
  pub p_masking: f32,
  /// Quantizer increase towards the picture borders.
  pub border_masking: f32,
  /// Renormalize so the clipped macroblocks do not shift the picture
  /// average.
  pub naq: bool,
  /// Minimum macroblock lambda.
  pub mb_lmin: i32,
  /// Maximum macroblock lambda.
  pub mb_lmax: i32,
}

impl Default for AdaptiveQuantSettings {
  fn default() -> Self {
    AdaptiveQuantSettings {
      lumi_masking: 0.0,
      dark_masking: 0.0,
      temporal_cplx_masking: 0.0,
      spatial_cplx_masking: 0.0,
      p_masking: 0.0,
      border_masking: 0.0,
      naq: false,
      mb_lmin: 2 * QP2LAMBDA,
      mb_lmax: 31 * QP2LAMBDA,
    }
  }
}
