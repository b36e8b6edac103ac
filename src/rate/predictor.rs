// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::rate::QP2LAMBDA;

// Below this much signal the coded size says nothing about the coefficient.
const MIN_SQRT_VAR: f64 = 10.0;

/// Frame size model: `bits = coeff * sqrt(var) / q`.
///
/// The coefficient is an exponentially decayed average over the coded
/// pictures, so that recent pictures weigh the most.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Predictor {
  /// Decayed sum of the observed coefficients.
  pub coeff: f64,
  /// Decayed number of observations.
  pub count: f64,
  /// Weight of the history at each update.
  pub decay: f64,
}

impl Default for Predictor {
  fn default() -> Self {
    Predictor { coeff: 7.0 * QP2LAMBDA as f64, count: 1.0, decay: 0.4 }
  }
}

impl Predictor {
  /// Predicted size in bits of a picture of complexity `sqrt_var` coded at
  /// quantizer `q`.
  #[inline]
  pub fn predict(&self, q: f64, sqrt_var: f64) -> f64 {
    self.coeff * sqrt_var / (q * self.count)
  }

  /// Feeds back the actual `size` of a picture coded at quantizer `q`.
  pub fn update(&mut self, q: f64, sqrt_var: f64, size: f64) {
    if sqrt_var < MIN_SQRT_VAR {
      return;
    }
    let new_coeff = size * q / (sqrt_var + 1.0);
    self.count *= self.decay;
    self.coeff *= self.decay;
    self.count += 1.0;
    self.coeff += new_coeff;
  }
}
