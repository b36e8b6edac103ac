// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::{PictureType, PICTURE_TYPES};
use crate::rate::QP2LAMBDA;

use std::fmt;
use std::ops::{Index, IndexMut};

/// One value per picture type.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerType<T>(pub [T; PICTURE_TYPES]);

impl<T: Copy> PerType<T> {
  pub const fn splat(value: T) -> Self {
    PerType([value; PICTURE_TYPES])
  }
}

impl<T> Index<PictureType> for PerType<T> {
  type Output = T;

  #[inline]
  fn index(&self, pict_type: PictureType) -> &T {
    &self.0[pict_type as usize]
  }
}

impl<T> IndexMut<PictureType> for PerType<T> {
  #[inline]
  fn index_mut(&mut self, pict_type: PictureType) -> &mut T {
    &mut self.0[pict_type as usize]
  }
}

/// First-pass statistics of a single picture, and its second-pass plan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatEntry {
  /// Picture type.
  pub pict_type: PictureType,
  /// Quantizer scale the picture was coded with, in lambda units.
  pub qscale: f32,
  /// Bits spent on motion vectors.
  pub mv_bits: i32,
  /// Bits spent on intra texture.
  pub i_tex_bits: i32,
  /// Bits spent on inter texture.
  pub p_tex_bits: i32,
  /// Bits spent on everything else.
  pub misc_bits: i32,
  /// Bits spent on the picture header.
  pub header_bits: i32,
  /// Sum of the motion-compensated macroblock variances.
  pub mc_mb_var_sum: i64,
  /// Sum of the intra macroblock variances.
  pub mb_var_sum: i64,
  /// Number of intra macroblocks.
  pub i_count: i32,
  /// Number of skipped macroblocks.
  pub skip_count: i32,
  /// Forward motion vector code size.
  pub f_code: i32,
  /// Backward motion vector code size.
  pub b_code: i32,
  /// Planned quantizer scale for the second pass.
  pub new_qscale: f32,
  /// Planned size of all the pictures before this one, in bits.
  pub expected_bits: u64,
}

impl Default for StatEntry {
  fn default() -> Self {
    StatEntry {
      pict_type: PictureType::P,
      qscale: 0.0,
      mv_bits: 0,
      i_tex_bits: 0,
      p_tex_bits: 0,
      misc_bits: 0,
      header_bits: 0,
      mc_mb_var_sum: 0,
      mb_var_sum: 0,
      i_count: 0,
      skip_count: 0,
      f_code: 0,
      b_code: 0,
      new_qscale: 0.0,
      expected_bits: 0,
    }
  }
}

impl StatEntry {
  /// The placeholder for a picture the first pass did not log: a fully
  /// skipped P picture.
  pub fn skipped(mb_num: usize) -> Self {
    StatEntry {
      pict_type: PictureType::P,
      qscale: (2 * QP2LAMBDA) as f32,
      new_qscale: (2 * QP2LAMBDA) as f32,
      misc_bits: (mb_num + 10) as i32,
      mb_var_sum: mb_num as i64 * 100,
      ..Default::default()
    }
  }

  #[inline]
  fn tex_qscale(&self) -> f64 {
    self.qscale as f64 * (self.i_tex_bits as f64 + self.p_tex_bits as f64 + 1.0)
  }

  /// Size in bits the texture of this picture would take at quantizer `qp`.
  pub fn qp2bits(&self, qp: f64) -> f64 {
    if qp <= 0.0 {
      error!("qp<=0.0");
    }
    self.tex_qscale() / qp
  }

  /// Quantizer at which the texture of this picture would take `bits`.
  pub fn bits2qp(&self, bits: f64) -> f64 {
    if bits < 0.9 {
      error!("bits<0.9");
    }
    self.tex_qscale() / bits
  }

  /// Formats this entry as a statistics log line.
  ///
  /// `input` is the coding-order index read back by the second pass,
  /// `output` the display-order index.
  pub const fn stats_line(&self, input: usize, output: usize) -> StatsLine<'_> {
    StatsLine { input, output, entry: self }
  }
}

/// A [`StatEntry`] formatted as a statistics log line, `;` included.
pub struct StatsLine<'a> {
  input: usize,
  output: usize,
  entry: &'a StatEntry,
}

impl fmt::Display for StatsLine<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let e = self.entry;
    write!(
      f,
      "in:{} out:{} type:{} q:{} itex:{} ptex:{} mv:{} misc:{} fcode:{} bcode:{} mc-var:{} var:{} icount:{} skipcount:{} hbits:{};",
      self.input,
      self.output,
      e.pict_type.code(),
      e.qscale,
      e.i_tex_bits,
      e.p_tex_bits,
      e.mv_bits,
      e.misc_bits,
      e.f_code,
      e.b_code,
      e.mc_mb_var_sum,
      e.mb_var_sum,
      e.i_count,
      e.skip_count,
      e.header_bits
    )
  }
}
