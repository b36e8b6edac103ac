// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use thiserror::Error;

use crate::api::config::InvalidConfig;
use crate::rate::StatsLog;

/// Rate control errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
  /// The configuration was rejected before any state was built
  #[error(transparent)]
  InvalidConfig(#[from] InvalidConfig),
  /// The rate equation could not be parsed
  #[error("Error parsing rc_eq \"{eq}\": {reason}")]
  InvalidRateEquation {
    /// The offending equation.
    eq: String,
    /// What went wrong.
    reason: String,
  },
  /// The rate equation did not evaluate to a number
  #[error("Error evaluating rc_eq \"{0}\"")]
  EquationNaN(String),
  /// The override string could not be parsed
  #[error("Error parsing rc_override \"{overrides}\": {reason}")]
  InvalidOverride {
    /// The offending override string.
    overrides: String,
    /// What went wrong.
    reason: String,
  },
  /// The statistics log is possibly corrupted
  #[error("The stats content is invalid at line {line}: {reason}")]
  CorruptedStats {
    /// Zero-based index of the offending line.
    line: usize,
    /// What went wrong.
    reason: String,
  },
  /// A statistics line addresses a picture outside the log
  #[error("Stats entry {frame} out of range (log holds {entries} entries)")]
  FrameOutOfRange {
    /// The picture index of the line.
    frame: usize,
    /// The number of entries in the log.
    entries: usize,
  },
  /// The statistics log holds no picture
  #[error("The stats content is empty")]
  EmptyStats,
  /// The bitrate cannot even carry the headers and motion vectors
  #[error(
    "Requested bitrate too low: {available} bits available, {required} bits needed for headers and motion vectors"
  )]
  BitrateTooLow {
    /// Bits available for the whole sequence.
    available: f64,
    /// Bits needed before any texture is coded.
    required: f64,
  },
  /// The rate factor search never found a fitting curve
  #[error("Two-pass rate control did not converge, the bitrate is infeasible")]
  ConvergenceFailure,
  /// The planned size misses the requested size by more than 1%
  #[error(
    "Error: 2pass curve failed to converge: expected {expected} bits, available {available} bits"
  )]
  ToleranceExceeded {
    /// Planned size of the sequence, in bits.
    expected: f64,
    /// Requested size of the sequence, in bits.
    available: f64,
  },
}

/// Rate control configuration
#[derive(Clone, Debug, Default)]
pub struct RateControlConfig {
  pub(crate) stats: Option<StatsLog>,
}

impl RateControlConfig {
  /// Create a rate control configuration from a first-pass statistics log
  ///
  /// # Errors
  ///
  /// Returns an error if the log is invalid.
  pub fn from_stats_str(stats: &str) -> Result<Self, Error> {
    Ok(Self { stats: Some(stats.parse()?) })
  }

  /// Create a default rate control configuration
  ///
  /// By default the encoder is in single pass mode.
  pub fn new() -> Self {
    Default::default()
  }

  /// Set a first-pass statistics log
  ///
  /// Enable the second pass encoding mode
  pub fn with_stats(mut self, stats: StatsLog) -> Self {
    self.stats = Some(stats);
    self
  }

  /// The statistics log driving the second pass, if any.
  pub fn stats(&self) -> Option<&StatsLog> {
    self.stats.as_ref()
  }
}
