// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use itertools::izip;

use crate::api::AdaptiveQuantSettings;

// Floor of the masking factor of a macroblock.
const MIN_FACTOR: f32 = 0.000_01;
// Floor of the variance square roots.
const MIN_CPLX: f32 = 4.0;

/// Per-macroblock statistics of a picture, in raster order.
#[derive(Clone, Copy, Debug)]
pub struct MacroblockStats<'a> {
  /// Width of the picture in macroblocks.
  pub mb_width: usize,
  /// Height of the picture in macroblocks.
  pub mb_height: usize,
  /// Intra (spatial) variance of each macroblock.
  pub mb_var: &'a [u32],
  /// Motion-compensated (temporal) variance of each macroblock.
  pub mc_mb_var: &'a [u32],
  /// Mean luma of each macroblock.
  pub mb_mean: &'a [u8],
  /// Whether each macroblock is an intra candidate.
  pub intra: &'a [bool],
}

impl MacroblockStats<'_> {
  /// Number of macroblocks described.
  pub fn len(&self) -> usize {
    self.mb_var
      .len()
      .min(self.mc_mb_var.len())
      .min(self.mb_mean.len())
      .min(self.intra.len())
  }

  /// Whether no macroblock is described.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

// Distance into the outer fifth of an axis, from 0 at its inner edge to 1
//  at the picture edge.
fn border_distance(pos: usize, len: usize) -> f32 {
  let margin = len / 5;
  if margin == 0 {
    0.0
  } else if pos < margin {
    (margin - pos) as f32 / margin as f32
  } else if pos > 4 * len / 5 {
    (pos - 4 * len / 5) as f32 / margin as f32
  } else {
    0.0
  }
}

/// Spreads the picture lambda `q` over the macroblocks.
///
/// Each macroblock is assigned a share of bits from its complexity and the
/// masking settings; its lambda is `q` scaled by complexity over bits and
/// clamped to `[mb_lmin, mb_lmax]`. With `naq`, the macroblocks that end up
/// clamped are taken out of the normalization so the others keep the
/// picture average.
pub fn adaptive_quantization(
  aq: &AdaptiveQuantSettings, mbs: &MacroblockStats<'_>, q: f32,
) -> Vec<i32> {
  let lumi_masking = aq.lumi_masking / (128.0 * 128.0);
  let dark_masking = aq.dark_masking / (128.0 * 128.0);
  let (qmin, qmax) = (aq.mb_lmin, aq.mb_lmax);
  let mb_width = mbs.mb_width.max(1);

  let mut cplx_tab = Vec::with_capacity(mbs.len());
  let mut bits_tab = Vec::with_capacity(mbs.len());
  let mut cplx_sum = 0.0f32;
  let mut bits_sum = 0.0f32;

  for (i, (&var, &mc_var, &mean, &intra)) in
    izip!(mbs.mb_var, mbs.mc_mb_var, mbs.mb_mean, mbs.intra).enumerate()
  {
    let spat_cplx = (var as f32).sqrt().max(MIN_CPLX);
    let temp_cplx = (mc_var as f32).sqrt().max(MIN_CPLX);

    let (cplx, mut factor) = if intra {
      (spat_cplx, 1.0 + aq.p_masking)
    } else {
      (temp_cplx, temp_cplx.powf(-aq.temporal_cplx_masking))
    };
    factor *= spat_cplx.powf(-aq.spatial_cplx_masking);

    let lumi = mean as i32 - 128;
    let masking = if mean > 127 { lumi_masking } else { dark_masking };
    factor *= 1.0 - (lumi * lumi) as f32 * masking;

    let mb_factor = border_distance(i % mb_width, mbs.mb_width)
      .max(border_distance(i / mb_width, mbs.mb_height));
    factor *= 1.0 - aq.border_masking * mb_factor;

    if factor < MIN_FACTOR {
      factor = MIN_FACTOR;
    }

    let bits = cplx * factor;
    cplx_sum += cplx;
    bits_sum += bits;
    cplx_tab.push(cplx);
    bits_tab.push(bits);
  }

  if aq.naq {
    let factor = bits_sum / cplx_sum;
    for (&cplx, &bits) in cplx_tab.iter().zip(bits_tab.iter()) {
      let newq = q * cplx / bits * factor;
      if newq > qmax as f32 {
        bits_sum -= bits;
        cplx_sum -= cplx * q / qmax as f32;
      } else if newq < qmin as f32 {
        bits_sum -= bits;
        cplx_sum -= cplx * q / qmin as f32;
      }
    }
    bits_sum = bits_sum.max(0.001);
    cplx_sum = cplx_sum.max(0.001);
  }

  cplx_tab
    .iter()
    .zip(bits_tab.iter())
    .map(|(&cplx, &bits)| {
      let mut newq = q * cplx / bits;
      if aq.naq {
        newq *= bits_sum / cplx_sum;
      }
      ((newq + 0.5) as i32).max(qmin).min(qmax)
    })
    .collect()
}
