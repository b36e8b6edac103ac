// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::EncoderConfig;

/// Simulated decoder input buffer.
///
/// The channel fills the buffer between `min_rate` and `max_rate` bits per
/// picture and every coded picture drains it by its size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vbv {
  // Buffer size in bits, 0 when the model is disabled.
  buffer_size: i32,
  // Channel rates, in bits per picture.
  min_rate: f64,
  max_rate: f64,
  min_stuffing_bytes: i32,
  // Current fullness in bits.
  pub buffer_index: f64,
}

impl Vbv {
  pub fn new(enc: &EncoderConfig) -> Self {
    let fps = enc.frame_rate();
    let initial = if enc.initial_buffer_occupancy != 0 {
      enc.initial_buffer_occupancy
    } else {
      (enc.buffer_size as i64 * 3 / 4) as i32
    };
    Vbv {
      buffer_size: enc.buffer_size,
      min_rate: enc.min_rate as f64 / fps,
      max_rate: enc.max_rate as f64 / fps,
      min_stuffing_bytes: enc.min_stuffing_bytes,
      buffer_index: initial as f64,
    }
  }

  #[inline]
  pub const fn is_enabled(&self) -> bool {
    self.buffer_size != 0
  }

  #[inline]
  pub fn buffer_size(&self) -> f64 {
    self.buffer_size as f64
  }

  #[inline]
  pub fn min_rate(&self) -> f64 {
    self.min_rate
  }

  #[inline]
  pub fn max_rate(&self) -> f64 {
    self.max_rate
  }

  /// Drains a picture of `frame_size` bits and refills from the channel.
  ///
  /// Returns the number of stuffing bytes needed to keep the buffer from
  /// overflowing.
  pub fn update(&mut self, frame_size: i64) -> i32 {
    if !self.is_enabled() {
      return 0;
    }
    let buffer_size = self.buffer_size();

    self.buffer_index -= frame_size as f64;
    if self.buffer_index < 0.0 {
      warn!("rc buffer underflow");
      self.buffer_index = 0.0;
    }

    let left = (buffer_size - self.buffer_index - 1.0) as i64;
    let (min_rate, max_rate) = (self.min_rate as i64, self.max_rate as i64);
    let refill = if left < min_rate {
      min_rate
    } else if left > max_rate {
      max_rate
    } else {
      left
    };
    self.buffer_index += refill as f64;

    if self.buffer_index > buffer_size {
      let mut stuffing = ((self.buffer_index - buffer_size) / 8.0).ceil() as i32;
      if stuffing < self.min_stuffing_bytes {
        stuffing = self.min_stuffing_bytes;
      }
      self.buffer_index = (self.buffer_index - 8.0 * stuffing as f64).max(0.0);

      debug!("stuffing {} bytes", stuffing);

      return stuffing;
    }

    0
  }
}
