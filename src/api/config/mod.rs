// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use thiserror::Error;

use crate::api::Context;
use crate::rate::{RCState, LAMBDA_MAX};

mod encoder;
pub use encoder::*;

mod quantizer;
pub use quantizer::*;

mod rate;
pub use rate::Error as RateControlError;
pub use rate::RateControlConfig;

/// Enumeration of possible invalid configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidConfig {
  /// Framerate numerator is invalid.
  #[error("invalid framerate numerator {actual} (expected > 0, <= {max})")]
  InvalidFrameRateNum {
    /// The actual value.
    actual: u64,
    /// The maximal supported value.
    max: u64,
  },
  /// Framerate denominator is invalid.
  #[error("invalid framerate denominator {actual} (expected > 0, <= {max})")]
  InvalidFrameRateDen {
    /// The actual value.
    actual: u64,
    /// The maximal supported value.
    max: u64,
  },
  /// The target bitrate is invalid.
  #[error("invalid bitrate {0} (expected > 0)")]
  InvalidBitrate(i64),
  /// The bitrate tolerance is invalid.
  #[error("invalid bitrate tolerance {0} (expected > 0)")]
  InvalidBitrateTolerance(i32),
  /// The macroblock grid is empty.
  #[error("invalid macroblock grid {width}x{height} (expected non-empty)")]
  InvalidMacroblockGrid {
    /// Width in macroblocks.
    width: usize,
    /// Height in macroblocks.
    height: usize,
  },
  /// The quantizer range is invalid.
  #[error("invalid quantizer range {min}..={max} (expected 1 <= min <= max)")]
  InvalidQuantizerRange {
    /// The configured minimum.
    min: i32,
    /// The configured maximum.
    max: i32,
  },
  /// The lambda range is invalid.
  #[error(
    "invalid lambda range {min}..={max} (expected 1 <= min <= max <= {limit})"
  )]
  InvalidLambdaRange {
    /// The configured minimum.
    min: i32,
    /// The configured maximum.
    max: i32,
    /// The maximal supported value.
    limit: i32,
  },
  /// The maximal quantizer difference is invalid.
  #[error("invalid max qdiff {0} (expected >= 0)")]
  InvalidMaxQdiff(i32),
  /// The quantizer blur is too large for single-pass smoothing.
  #[error("qblur too large: {0} (expected <= 1.0)")]
  QblurTooLarge(f32),
  /// The quantizer blur is negative or not finite.
  #[error("invalid qblur {0} (expected a finite value >= 0.0)")]
  InvalidQblur(f32),
  /// The quantizer compression is not finite.
  #[error("invalid qcompress {0} (expected a finite value)")]
  InvalidQcompress(f32),
  /// The buffer size is invalid.
  #[error("invalid rc buffer size {0} (expected >= 0)")]
  InvalidBufferSize(i32),
  /// The initial buffer occupancy does not fit in the buffer.
  #[error("invalid initial buffer occupancy {actual} (expected <= {max})")]
  InvalidInitialOccupancy {
    /// The actual value.
    actual: i32,
    /// The maximal supported value.
    max: i32,
  },
  /// The VBV rate bounds are inconsistent.
  #[error("invalid vbv rates: min {min} exceeds max {max}")]
  InvalidVbvRates {
    /// The minimal rate.
    min: i64,
    /// The maximal rate.
    max: i64,
  },
  /// The buffer aggressivity is invalid.
  #[error("invalid buffer aggressivity {0} (expected finite > 0.0)")]
  InvalidBufferAggressivity(f32),
  /// The GOP size is invalid.
  #[error("invalid gop size {0} (expected > 0)")]
  InvalidGopSize(u32),
}

/// Contains the rate control configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
  /// Settings which impact the chosen quantizers.
  pub(crate) enc: EncoderConfig,
  /// Pass configuration
  pub(crate) rate_control: RateControlConfig,
}

impl Config {
  /// Create a default configuration
  ///
  /// same as `Default::default()`
  pub fn new() -> Self {
    Config::default()
  }

  /// Set the encoder configuration
  ///
  /// `EncoderConfig` contains the bitrate policy, the buffer model and the
  /// quantizer limits.
  pub fn with_encoder_config(mut self, enc: EncoderConfig) -> Self {
    self.enc = enc;
    self
  }

  /// Set the rate control configuration
  ///
  /// The default configuration is single pass
  pub fn with_rate_control(mut self, rate_control: RateControlConfig) -> Self {
    self.rate_control = rate_control;
    self
  }

  /// Creates a [`Context`] with this configuration.
  ///
  /// In two-pass mode this plans the quantizer curve for the whole sequence,
  /// which is where infeasible bitrates are detected.
  ///
  /// # Errors
  ///
  /// Returns `RateControlError::InvalidConfig` if the config is invalid, or
  /// the error that stopped the rate control initialization.
  ///
  /// # Examples
  ///
  /// ```
  /// use ratectl::prelude::*;
  ///
  /// # fn main() -> Result<(), RateControlError> {
  /// let cfg = Config::default();
  /// let ctx = cfg.new_context()?;
  /// assert!(!ctx.is_second_pass());
  /// # Ok(())
  /// # }
  /// ```
  pub fn new_context(&self) -> Result<Context, RateControlError> {
    self.validate()?;

    let inner = RCState::new(&self.enc, self.rate_control.stats.as_ref())?;

    Ok(Context { inner, config: self.enc.clone() })
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` describing the first offending setting.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    let config = &self.enc;

    if config.time_base.num == 0 || config.time_base.num > u32::MAX as u64 {
      return Err(InvalidFrameRateNum {
        actual: config.time_base.num,
        max: u32::MAX as u64,
      });
    }
    if config.time_base.den == 0 || config.time_base.den > u32::MAX as u64 {
      return Err(InvalidFrameRateDen {
        actual: config.time_base.den,
        max: u32::MAX as u64,
      });
    }

    if config.bitrate <= 0 {
      return Err(InvalidBitrate(config.bitrate));
    }
    if config.bitrate_tolerance <= 0 {
      return Err(InvalidBitrateTolerance(config.bitrate_tolerance));
    }

    if config.mb_width == 0 || config.mb_height == 0 {
      return Err(InvalidMacroblockGrid {
        width: config.mb_width,
        height: config.mb_height,
      });
    }
    if config.gop_size == 0 {
      return Err(InvalidGopSize(config.gop_size));
    }

    let q = &config.quantizer;
    if q.qmin < 1 || q.qmax < q.qmin {
      return Err(InvalidQuantizerRange { min: q.qmin, max: q.qmax });
    }
    if q.lmin < 1 || q.lmax < q.lmin || q.lmax > LAMBDA_MAX {
      return Err(InvalidLambdaRange {
        min: q.lmin,
        max: q.lmax,
        limit: LAMBDA_MAX,
      });
    }
    if q.max_qdiff < 0 {
      return Err(InvalidMaxQdiff(q.max_qdiff));
    }

    if let Some(aq) = config.adaptive_quant {
      if aq.mb_lmin < 1 || aq.mb_lmax < aq.mb_lmin || aq.mb_lmax > LAMBDA_MAX {
        return Err(InvalidLambdaRange {
          min: aq.mb_lmin,
          max: aq.mb_lmax,
          limit: LAMBDA_MAX,
        });
      }
    }

    if !config.qcompress.is_finite() {
      return Err(InvalidQcompress(config.qcompress));
    }
    if !config.qblur.is_finite() || config.qblur < 0.0 {
      return Err(InvalidQblur(config.qblur));
    }
    // The windowed blur of the second pass accepts any width, the leaky
    // integrator of the single pass does not.
    if self.rate_control.stats.is_none() && config.qblur > 1.0 {
      return Err(QblurTooLarge(config.qblur));
    }

    if config.buffer_size < 0 {
      return Err(InvalidBufferSize(config.buffer_size));
    }
    if config.initial_buffer_occupancy > config.buffer_size {
      return Err(InvalidInitialOccupancy {
        actual: config.initial_buffer_occupancy,
        max: config.buffer_size,
      });
    }
    if config.min_rate < 0
      || config.max_rate < 0
      || config.min_rate > config.max_rate
    {
      return Err(InvalidVbvRates { min: config.min_rate, max: config.max_rate });
    }
    if !config.buffer_aggressivity.is_finite()
      || config.buffer_aggressivity <= 0.0
    {
      return Err(InvalidBufferAggressivity(config.buffer_aggressivity));
    }

    Ok(())
  }
}
