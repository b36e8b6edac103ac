// Copyright (c) 2018-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

/// Rate control configuration
pub mod config;


pub use config::*;

pub use crate::rate::aq::MacroblockStats;

use crate::rate::{RCState, StatEntry};

use std::fmt;

/// A rational number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Rational {
  /// Numerator.
  pub num: u64,
  /// Denominator.
  pub den: u64,
}

impl Rational {
  /// Creates a rational number from the given numerator and denominator.
  pub const fn new(num: u64, den: u64) -> Self {
    Rational { num, den }
  }

  /// Returns a rational number that is the reciprocal of the given one.
  pub const fn from_reciprocal(reciprocal: Self) -> Self {
    Rational { num: reciprocal.den, den: reciprocal.num }
  }

  /// Returns the rational number as a floating-point number.
  pub fn as_f64(self) -> f64 {
    self.num as f64 / self.den as f64
  }
}

#[cfg(feature = "serialize")]
impl serde::Serialize for Rational {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    (self.num, self.den).serialize(serializer)
  }
}

#[cfg(feature = "serialize")]
impl<'a> serde::Deserialize<'a> for Rational {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'a>,
  {
    let (num, den) = serde::Deserialize::deserialize(deserializer)?;

    Ok(Rational::new(num, den))
  }
}

/// The number of picture types for which distinct statistics are tracked.
pub const PICTURE_TYPES: usize = 5;

/// Possible types of a coded picture.
///
/// The numeric codes used in statistics logs are 1-based: `I` is 1, `P` is 2,
/// `B` is 3, `S` is 4 and the switching variants share 5.
#[derive(Debug, Default, Eq, PartialEq, Clone, Copy, Hash)]
#[repr(usize)]
pub enum PictureType {
  /// Intra-only picture.
  I = 0,
  /// Forward-predicted picture.
  #[default]
  P = 1,
  /// Bi-directionally predicted picture.
  B = 2,
  /// Global-motion-compensated (sprite) picture.
  S = 3,
  /// Switching intra or switching predicted picture.
  SI = 4,
}

impl PictureType {
  /// All picture types, in statistics-slot order.
  pub const ALL: [PictureType; PICTURE_TYPES] = [
    PictureType::I,
    PictureType::P,
    PictureType::B,
    PictureType::S,
    PictureType::SI,
  ];

  /// Maps a statistics-log type code to a picture type.
  pub const fn from_code(code: i64) -> Option<Self> {
    use self::PictureType::*;
    match code {
      1 => Some(I),
      2 => Some(P),
      3 => Some(B),
      4 => Some(S),
      5 | 6 => Some(SI),
      _ => None,
    }
  }

  /// The statistics-log type code of this picture type.
  pub const fn code(self) -> i64 {
    self as i64 + 1
  }

  /// Single character used in rate control traces.
  pub const fn as_char(self) -> char {
    use self::PictureType::*;
    match self {
      I => 'I',
      P => 'P',
      B => 'B',
      S => 'S',
      SI => 'i',
    }
  }
}

impl fmt::Display for PictureType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use self::PictureType::*;
    match self {
      I => write!(f, "Intra picture"),
      P => write!(f, "Predicted picture"),
      B => write!(f, "Bi-predicted picture"),
      S => write!(f, "Sprite picture"),
      SI => write!(f, "Switching picture"),
    }
  }
}

/// Per-picture statistics the encoder supplies to [`Context::estimate_qscale`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameInput<'a> {
  /// Coding-order index of the picture.
  pub picture_number: usize,
  /// Type the encoder decided for this picture.
  pub pict_type: PictureType,
  /// Type of the previously coded picture.
  pub last_pict_type: PictureType,
  /// Sum of the intra macroblock variances.
  pub mb_var_sum: i64,
  /// Sum of the motion-compensated macroblock variances.
  pub mc_mb_var_sum: i64,
  /// Forward motion vector code size.
  pub f_code: i32,
  /// Backward motion vector code size.
  pub b_code: i32,
  /// Presentation timestamp of the picture in decoding order, in time base
  /// units, when known.
  pub pts: Option<i64>,
  /// Size in bits of the previously coded picture.
  pub last_frame_bits: i64,
  /// Total number of bits written so far.
  pub total_bits: i64,
  /// Per-macroblock statistics, required for adaptive quantization.
  pub macroblocks: Option<MacroblockStats<'a>>,
}

/// The quantizer chosen for a picture.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizerDecision {
  /// Picture quantizer scale, in lambda units.
  ///
  /// Rounded to an integer unless adaptive quantization is in effect.
  pub qscale: f32,
  /// One lambda per macroblock, in raster order, when adaptive quantization
  /// is in effect.
  pub lambda_table: Option<Vec<i32>>,
}

/// The rate control context.
///
/// Contains the rate control state of one encoding session.
pub struct Context {
  pub(crate) inner: RCState,
  pub(crate) config: EncoderConfig,
}

impl Context {
  /// Chooses the quantizer scale for the next picture.
  ///
  /// When `dry_run` is set the running state is left exactly as it was, so
  /// that trial encodes can query the rate control.
  ///
  /// # Errors
  ///
  /// Returns [`RateControlError::EquationNaN`] if the rate equation does not
  /// evaluate to a number for this picture, in which case the encode must be
  /// aborted.
  ///
  /// Returns [`RateControlError::FrameOutOfRange`] in two-pass mode if
  /// `picture_number` lies outside the statistics log provided at
  /// initialization.
  ///
  /// # Examples
  ///
  /// ```
  /// use ratectl::prelude::*;
  ///
  /// # fn main() -> Result<(), RateControlError> {
  /// let mut ctx = Config::default().new_context()?;
  /// let frame = FrameInput {
  ///   pict_type: PictureType::I,
  ///   mb_var_sum: 396 * 300,
  ///   ..Default::default()
  /// };
  /// let trial = ctx.estimate_qscale(&frame, true)?;
  /// let real = ctx.estimate_qscale(&frame, false)?;
  /// assert_eq!(trial, real);
  /// # Ok(())
  /// # }
  /// ```
  #[inline]
  pub fn estimate_qscale(
    &mut self, frame: &FrameInput<'_>, dry_run: bool,
  ) -> Result<QuantizerDecision, RateControlError> {
    self.inner.estimate_qscale(frame, dry_run)
  }

  /// Accounts a coded picture of `frame_size` bits against the VBV model.
  ///
  /// Returns the number of stuffing bytes the encoder must append to keep the
  /// buffer from overflowing, or 0 if the buffer model is disabled.
  #[inline]
  pub fn vbv_update(&mut self, frame_size: i64) -> i32 {
    self.inner.vbv_update(frame_size)
  }

  /// Returns the forward and backward motion vector code sizes recorded for
  /// `entry` by the first pass, or `None` outside of a two-pass encode.
  #[inline]
  pub fn get_2pass_fcode(&self, entry: usize) -> Option<(i32, i32)> {
    self.inner.get_2pass_fcode(entry)
  }

  /// Current occupancy of the simulated decoder buffer, in bits.
  #[inline]
  pub fn buffer_index(&self) -> f64 {
    self.inner.buffer_index()
  }

  /// Whether the context was built from a first-pass statistics log.
  #[inline]
  pub fn is_second_pass(&self) -> bool {
    self.inner.is_second_pass()
  }

  /// The planned second-pass curve, one entry per picture.
  ///
  /// Empty in single-pass mode.
  #[inline]
  pub fn entries(&self) -> &[StatEntry] {
    self.inner.entries()
  }

  /// The configuration this context was created with.
  #[inline]
  pub fn config(&self) -> &EncoderConfig {
    &self.config
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("second_pass", &self.is_second_pass())
      .field("entries", &self.entries().len())
      .field("buffer_index", &self.buffer_index())
      .finish()
  }
}
