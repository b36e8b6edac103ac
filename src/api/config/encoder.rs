// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::config::{AdaptiveQuantSettings, QuantizerSettings};
use crate::api::Rational;
use crate::serialize::{Deserialize, Serialize};

use std::fmt;

/// The rate equation used when none is configured.
pub const DEFAULT_RC_EQ: &str = "tex^qComp";

/// Encoder settings which impact the chosen quantizers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
  // stream layout
  /// Video time base.
  pub time_base: Rational,
  /// Width of the pictures in macroblocks.
  pub mb_width: usize,
  /// Height of the pictures in macroblocks.
  pub mb_height: usize,
  /// Distance between two intra pictures.
  pub gop_size: u32,
  /// Maximum number of consecutive B pictures.
  pub max_b_frames: u32,
  /// Every picture is intra coded.
  pub intra_only: bool,

  // bitrate policy
  /// The target bitrate, in bits per second.
  pub bitrate: i64,
  /// How far, in bits, the output may drift from the ideal trajectory before
  /// the single-pass compensation saturates.
  pub bitrate_tolerance: i32,

  // decoder buffer model
  /// Size of the simulated decoder buffer in bits (0 to disable).
  pub buffer_size: i32,
  /// Initial buffer fullness in bits (0 means 3/4 of the buffer).
  pub initial_buffer_occupancy: i32,
  /// Minimum channel rate, in bits per second.
  pub min_rate: i64,
  /// Maximum channel rate, in bits per second.
  pub max_rate: i64,
  /// How strongly the quantizer reacts to buffer fullness.
  pub buffer_aggressivity: f32,
  /// Share of the buffer overflow that the min-rate limit may consume.
  pub min_vbv_overflow_use: f32,
  /// Share of the buffer content that the max-rate limit may consume.
  pub max_available_vbv_use: f32,
  /// Minimum number of stuffing bytes once stuffing is needed.
  ///
  /// Some legacy bitstreams cannot carry fewer than 4.
  pub min_stuffing_bytes: i32,

  // quantizer curve
  /// Quantizer curve compression (0.0 constant bitrate, 1.0 constant
  /// quantizer).
  pub qcompress: f32,
  /// Temporal quantizer blur.
  pub qblur: f32,
  /// Soft clipping of the quantizer into its range (0.0 hard clip).
  pub qsquish: f32,
  /// Amplitude of the periodic P picture quantizer modulation.
  pub qmod_amp: f32,
  /// Period of the P picture quantizer modulation (0 to disable).
  pub qmod_freq: u32,
  /// Initial complexity used to warm up the single-pass rate control.
  pub initial_cplx: f32,
  /// The rate equation; `tex^qComp` when unset.
  pub rc_eq: Option<String>,
  /// Frame range overrides, as `start,end,q/start,end,q/...`.
  pub rc_overrides: Option<String>,

  /// Quantizer limits and picture type offsets.
  pub quantizer: QuantizerSettings,
  /// Per-macroblock adaptive quantization, when enabled.
  pub adaptive_quant: Option<AdaptiveQuantSettings>,
}

impl Default for EncoderConfig {
  fn default() -> Self {
    EncoderConfig {
      time_base: Rational { num: 1, den: 25 },
      mb_width: 22,
      mb_height: 18,
      gop_size: 12,
      max_b_frames: 0,
      intra_only: false,

      bitrate: 200_000,
      bitrate_tolerance: 200_000 * 20,

      buffer_size: 0,
      initial_buffer_occupancy: 0,
      min_rate: 0,
      max_rate: 0,
      buffer_aggressivity: 1.0,
      min_vbv_overflow_use: 3.0,
      max_available_vbv_use: 1.0,
      min_stuffing_bytes: 0,

      qcompress: 0.5,
      qblur: 0.5,
      qsquish: 0.0,
      qmod_amp: 0.0,
      qmod_freq: 0,
      initial_cplx: 0.0,
      rc_eq: None,
      rc_overrides: None,

      quantizer: QuantizerSettings::default(),
      adaptive_quant: None,
    }
  }
}

impl EncoderConfig {
  /// Returns the video frame rate computed from [`time_base`].
  ///
  /// [`time_base`]: #structfield.time_base
  pub fn frame_rate(&self) -> f64 {
    Rational::from_reciprocal(self.time_base).as_f64()
  }

  /// Number of macroblocks in a picture.
  pub const fn mb_num(&self) -> usize {
    self.mb_width * self.mb_height
  }

  /// The rate equation in effect.
  pub fn rate_equation(&self) -> &str {
    self.rc_eq.as_deref().unwrap_or(DEFAULT_RC_EQ)
  }

  /// Target size of a single picture, in bits.
  pub fn bits_per_frame(&self) -> f64 {
    self.bitrate as f64 / self.frame_rate()
  }
}

impl fmt::Display for EncoderConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let pairs = [
      ("bitrate", self.bitrate.to_string()),
      ("fps", format!("{:.3}", self.frame_rate())),
      ("rc_eq", self.rate_equation().to_string()),
      ("qcompress", self.qcompress.to_string()),
      ("qblur", self.qblur.to_string()),
      ("qmin", self.quantizer.qmin.to_string()),
      ("qmax", self.quantizer.qmax.to_string()),
      ("buffer_size", self.buffer_size.to_string()),
      ("min_rate", self.min_rate.to_string()),
      ("max_rate", self.max_rate.to_string()),
      ("adaptive_quant", self.adaptive_quant.is_some().to_string()),
    ];
    write!(
      f,
      "{}",
      pairs
        .iter()
        .map(|pair| format!("{}={}", pair.0, pair.1))
        .collect::<Vec<_>>()
        .join(" ")
    )
  }
}
