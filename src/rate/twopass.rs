// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Second-pass planning.
//!
//! The whole quantizer curve is solved once, when the context is created:
//! a single rate factor scales the rate equation of every picture and is
//! searched with a halving step until the planned size matches the
//! requested size.

use crate::api::RateControlError;
use crate::rate::entry::PerType;
use crate::rate::{RCState, StatEntry, QP2LAMBDA};

// Initial search step of the rate factor.
const INITIAL_STEP: f64 = 256.0 * 256.0;
// The search stops once the step falls below this.
const MIN_STEP: f64 = 0.000_000_1;
// Number of search iterations, all of which overshoot when the bitrate is
//  infeasible.
const SEARCH_STEPS: usize = 40;
// Relative error tolerated between the planned and the requested size.
const TOLERANCE: f64 = 0.01;

/// Temporal blur of a quantizer curve.
///
/// Each picture takes the Gaussian-weighted average of the pictures of its
/// own type within `filter_size / 2` positions. A `qblur` of 0 weights
/// every neighbor equally.
pub(crate) fn blur(
  qscale: &[f64], entries: &[StatEntry], qblur: f64, filter_size: usize,
) -> Vec<f64> {
  let half = (filter_size / 2) as isize;
  let len = entries.len() as isize;

  (0..len)
    .map(|i| {
      let pict_type = entries[i as usize].pict_type;
      let (mut q, mut sum) = (0.0, 0.0);
      for index in (i - half)..=(i + half) {
        if index < 0 || index >= len {
          continue;
        }
        if entries[index as usize].pict_type != pict_type {
          continue;
        }
        let d = (index - i) as f64;
        let coeff =
          if qblur == 0.0 { 1.0 } else { (-d * d / (qblur * qblur)).exp() };
        q += qscale[index as usize] * coeff;
        sum += coeff;
      }
      q / sum
    })
    .collect()
}

impl RCState {
  /// Plans `new_qscale` and `expected_bits` for every entry.
  pub(crate) fn init_pass2(&mut self) -> Result<(), RateControlError> {
    use crate::api::PictureType::*;

    let model = &self.model;
    let run = &mut self.run;
    let entries = &mut self.entries;
    let enc = &model.enc;
    let num_entries = entries.len();

    let mut complexity = PerType::splat(0.0);
    let mut const_bits = PerType::splat(0u64);
    for rce in entries.iter() {
      run.account(rce);
      complexity[rce.pict_type] +=
        (rce.i_tex_bits as f64 + rce.p_tex_bits as f64) * rce.qscale as f64;
      const_bits[rce.pict_type] +=
        rce.mv_bits.max(0) as u64 + rce.misc_bits.max(0) as u64;
    }
    debug!(
      "complexity I:{:.0} P:{:.0} B:{:.0}",
      complexity[I], complexity[P], complexity[B]
    );

    let all_const_bits = const_bits[I] + const_bits[P] + const_bits[B];
    let all_available_bits =
      (enc.bitrate as f64 * num_entries as f64 / model.fps) as u64;

    if all_available_bits < all_const_bits {
      error!("requested bitrate is too low");
      return Err(RateControlError::BitrateTooLow {
        available: all_available_bits as f64,
        required: all_const_bits as f64,
      });
    }

    let qblur = enc.qblur as f64;
    let filter_size = (enc.qblur * 4.0) as usize | 1;
    let initial_vbv = run.vbv;

    let mut rate_factor = 0.0;
    let mut expected_bits = 0.0;
    let mut toobig = 0;
    let mut qscale = vec![0.0; num_entries];
    let mut step = INITIAL_STEP;
    while step > MIN_STEP {
      let mut planned_bits = 0.0;
      rate_factor += step;

      run.vbv.buffer_index = (enc.buffer_size / 2) as f64;

      for (i, rce) in entries.iter().enumerate() {
        qscale[i] = model.get_qscale(run, rce, rate_factor, i)?;
        run.last_qscale_for[rce.pict_type] = qscale[i];
      }

      // Later pictures constrain earlier ones: walk the curve backwards.
      for (q, rce) in qscale.iter_mut().zip(entries.iter()).rev() {
        *q = model.get_diff_limited_q(run, rce.pict_type, *q);
      }

      let blurred = blur(&qscale, entries, qblur, filter_size);

      for (i, (rce, &q)) in entries.iter_mut().zip(blurred.iter()).enumerate()
      {
        rce.new_qscale = model.modify_qscale(run, rce, q, i) as f32;

        let mut bits = rce.qp2bits(rce.new_qscale as f64)
          + rce.mv_bits as f64
          + rce.misc_bits as f64;
        bits += 8.0 * run.vbv.update(bits as i64) as f64;

        rce.expected_bits = planned_bits as u64;
        planned_bits += bits;
      }
      expected_bits = planned_bits;

      trace!(
        "expected_bits: {} all_available_bits: {} rate_factor: {}",
        expected_bits,
        all_available_bits,
        rate_factor
      );
      if expected_bits > all_available_bits as f64 {
        rate_factor -= step;
        toobig += 1;
      }

      step *= 0.5;
    }

    run.vbv = initial_vbv;

    let (qmin, qmax) = (enc.quantizer.qmin as f64, enc.quantizer.qmax as f64);
    let qp_sum: f64 = entries
      .iter()
      .map(|rce| {
        (rce.new_qscale as f64 / QP2LAMBDA as f64).max(qmin).min(qmax)
      })
      .sum();
    debug!(
      "requested bitrate: {} bps expected bitrate: {} bps",
      enc.bitrate,
      (expected_bits / (all_available_bits as f64 / enc.bitrate as f64)) as i64
    );
    debug!("estimated target average qp: {:.3}", qp_sum / num_entries as f64);

    let available = all_available_bits as f64;
    if toobig == 0 {
      info!(
        "Using all of requested bitrate is not necessary for this video with these parameters."
      );
    } else if toobig == SEARCH_STEPS {
      error!("Error: bitrate too low for this video with these parameters.");
      return Err(RateControlError::ConvergenceFailure);
    } else if (expected_bits / available - 1.0).abs() > TOLERANCE {
      error!("Error: 2pass curve failed to converge");
      return Err(RateControlError::ToleranceExceeded {
        expected: expected_bits,
        available,
      });
    }

    Ok(())
  }
}
