// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

pub(crate) mod aq;
mod entry;
pub(crate) mod expr;
mod overrides;
mod predictor;
mod qscale;
mod stats;
mod twopass;
mod vbv;

pub use self::entry::{StatEntry, StatsLine};
pub use self::overrides::{OverrideAction, RcOverride};
pub use self::predictor::Predictor;
pub use self::stats::StatsLog;

use self::aq::adaptive_quantization;
use self::entry::PerType;
use self::expr::RateEquation;
use self::overrides::parse_overrides;
use self::vbv::Vbv;

use crate::api::{
  EncoderConfig, FrameInput, PictureType, QuantizerDecision, RateControlError,
};

/// Fixed-point shift of the lambda scale.
pub const LAMBDA_SHIFT: i32 = 7;
/// One quantizer step in lambda units, as a power of two.
pub const LAMBDA_SCALE: i32 = 1 << LAMBDA_SHIFT;
/// Lambda of quantizer 1.
pub const QP2LAMBDA: i32 = 118;
/// Largest representable lambda.
pub const LAMBDA_MAX: i32 = 256 * 128 - 1;

// Number of synthetic pictures fed to the single pass when an initial
//  complexity is given (one minute at 30 fps).
const WARMUP_FRAMES: usize = 60 * 30;

// The quantizer history starts at QP 5 for every picture type.
const INITIAL_LAST_QSCALE: f64 = (5 * QP2LAMBDA) as f64;

// Everything the estimator mutates while coding a sequence.
// A dry run restores a copy of it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Running {
  pred: PerType<Predictor>,
  // Complexity sums, in bits times qscale.
  i_cplx_sum: PerType<f64>,
  p_cplx_sum: PerType<f64>,
  mv_bits_sum: PerType<f64>,
  qscale_sum: PerType<f64>,
  // Start at 1 so that the averages never divide by zero.
  frame_count: PerType<i64>,
  last_qscale_for: PerType<f64>,
  // None until the first I or P picture.
  last_non_b_pict_type: Option<PictureType>,
  vbv: Vbv,
  // Leaky average of the P picture quantizers of the single pass.
  short_term_qsum: f64,
  short_term_qcount: f64,
  // Output of the rate equation so far, against the bits we wanted.
  pass1_rc_eq_output_sum: f64,
  pass1_wanted_bits: f64,
  // Previous picture, for the predictor update.
  last_qscale: f64,
  last_mc_mb_var_sum: i64,
  last_mb_var_sum: i64,
}

impl Running {
  fn new(enc: &EncoderConfig) -> Self {
    Running {
      pred: PerType::splat(Predictor::default()),
      i_cplx_sum: PerType::splat(1.0),
      p_cplx_sum: PerType::splat(1.0),
      mv_bits_sum: PerType::splat(1.0),
      qscale_sum: PerType::splat(1.0),
      frame_count: PerType::splat(1),
      last_qscale_for: PerType::splat(INITIAL_LAST_QSCALE),
      last_non_b_pict_type: None,
      vbv: Vbv::new(enc),
      short_term_qsum: 0.0,
      short_term_qcount: 0.0,
      pass1_rc_eq_output_sum: 0.0,
      pass1_wanted_bits: 0.0,
      last_qscale: 0.0,
      last_mc_mb_var_sum: 0,
      last_mb_var_sum: 0,
    }
  }

  // Adds a picture to the per-type sums.
  fn account(&mut self, rce: &StatEntry) {
    let pict_type = rce.pict_type;
    let qscale = rce.qscale as f64;
    self.i_cplx_sum[pict_type] += rce.i_tex_bits as f64 * qscale;
    self.p_cplx_sum[pict_type] += rce.p_tex_bits as f64 * qscale;
    self.mv_bits_sum[pict_type] += rce.mv_bits as f64;
    self.qscale_sum[pict_type] += qscale;
    self.frame_count[pict_type] += 1;
  }
}

// The immutable part of the rate control: settings and parsed user input.
#[derive(Debug)]
pub(crate) struct RateModel {
  enc: EncoderConfig,
  fps: f64,
  mb_num: f64,
  bits_per_frame: f64,
  eq: RateEquation,
  overrides: Vec<RcOverride>,
}

impl RateModel {
  fn new(enc: &EncoderConfig) -> Result<Self, RateControlError> {
    let eq = RateEquation::parse(enc.rate_equation()).map_err(|e| {
      error!("{}", e);
      e
    })?;
    let overrides = match enc.rc_overrides.as_deref() {
      Some(overrides) => parse_overrides(overrides).map_err(|e| {
        error!("{}", e);
        e
      })?,
      None => Vec::new(),
    };

    Ok(RateModel {
      enc: enc.clone(),
      fps: enc.frame_rate(),
      mb_num: enc.mb_num() as f64,
      bits_per_frame: enc.bits_per_frame(),
      eq,
      overrides,
    })
  }
}

pub(crate) struct RCState {
  model: RateModel,
  run: Running,
  // The second-pass plan, empty in single pass.
  entries: Vec<StatEntry>,
}

impl RCState {
  pub fn new(
    enc: &EncoderConfig, stats: Option<&StatsLog>,
  ) -> Result<RCState, RateControlError> {
    let mut rc = RCState {
      model: RateModel::new(enc)?,
      run: Running::new(enc),
      entries: Vec::new(),
    };

    match stats {
      Some(log) => {
        rc.entries =
          log.entry_table(enc.max_b_frames as usize, enc.mb_num())?;
        rc.init_pass2()?;
      }
      None => rc.init_pass1()?,
    }

    Ok(rc)
  }

  // Primes the single pass, with a synthetic sequence of the user-supplied
  //  complexity if there is one.
  fn init_pass1(&mut self) -> Result<(), RateControlError> {
    let model = &self.model;
    let run = &mut self.run;

    run.short_term_qsum = 0.001;
    run.short_term_qcount = 0.001;
    run.pass1_rc_eq_output_sum = 0.001;
    run.pass1_wanted_bits = 0.001;

    let enc = &model.enc;
    if enc.initial_cplx == 0.0 {
      return Ok(());
    }

    let intra_period = ((enc.gop_size as usize + 3) / 4).max(1);
    let b_period = enc.max_b_frames as usize + 1;
    for i in 0..WARMUP_FRAMES {
      let bits =
        enc.initial_cplx as f64 * (i as f64 / 10000.0 + 1.0) * model.mb_num;
      let pict_type = if i % intra_period == 0 {
        PictureType::I
      } else if i % b_period != 0 {
        PictureType::B
      } else {
        PictureType::P
      };

      let mut rce = StatEntry {
        pict_type,
        mc_mb_var_sum: (bits * model.mb_num / 100_000.0) as i64,
        mb_var_sum: model.mb_num as i64,
        qscale: (2 * QP2LAMBDA) as f32,
        f_code: 2,
        b_code: 1,
        misc_bits: 1,
        ..Default::default()
      };
      if pict_type == PictureType::I {
        rce.i_count = model.mb_num as i32;
        rce.i_tex_bits = bits as i32;
      } else {
        rce.p_tex_bits = (bits * 0.9) as i32;
        rce.mv_bits = (bits * 0.1) as i32;
      }
      run.account(&rce);

      let rate_factor = run.pass1_wanted_bits / run.pass1_rc_eq_output_sum;
      model.get_qscale(run, &rce, rate_factor, i)?;

      run.pass1_wanted_bits += model.bits_per_frame;
    }

    Ok(())
  }

  pub fn estimate_qscale(
    &mut self, frame: &FrameInput<'_>, dry_run: bool,
  ) -> Result<QuantizerDecision, RateControlError> {
    let saved = self.run;
    let decision = self.estimate(frame);
    if dry_run {
      self.run = saved;
    }
    decision
  }

  fn estimate(
    &mut self, frame: &FrameInput<'_>,
  ) -> Result<QuantizerDecision, RateControlError> {
    let model = &self.model;
    let run = &mut self.run;
    let enc = &model.enc;
    let pict_type = frame.pict_type;
    let picture_number = frame.picture_number;
    let second_pass = !self.entries.is_empty();

    let (qmin, qmax) = model.get_qminmax(pict_type);

    // The size of picture N-1 is only known once N-2 has been accounted.
    if picture_number > 2 && !second_pass {
      let last_var = if frame.last_pict_type == PictureType::I {
        run.last_mb_var_sum
      } else {
        run.last_mc_mb_var_sum
      };
      run.pred[frame.last_pict_type].update(
        run.last_qscale,
        (last_var as f64).sqrt(),
        frame.last_frame_bits as f64,
      );
    }

    let planned = if second_pass {
      let entries = self.entries.len();
      Some(self.entries.get(picture_number).ok_or_else(|| {
        error!("picture {} is not in the stats log", picture_number);
        RateControlError::FrameOutOfRange { frame: picture_number, entries }
      })?)
    } else {
      None
    };

    let wanted_bits = match planned {
      Some(rce) => rce.expected_bits as i64,
      None => {
        let elapsed = frame.pts.unwrap_or(picture_number as i64);
        (enc.bitrate as f64 * elapsed as f64 / model.fps) as i64
      }
    };

    let diff = (frame.total_bits - wanted_bits) as f64;
    let tolerance = enc.bitrate_tolerance as f64;
    let mut br_compensation = (tolerance - diff) / tolerance;
    if br_compensation <= 0.0 {
      br_compensation = 0.001;
    }

    let var = if pict_type == PictureType::I {
      frame.mb_var_sum
    } else {
      frame.mc_mb_var_sum
    };

    let mut short_term_q = 0.0;
    let q = match planned {
      Some(rce) => {
        if pict_type != PictureType::I && pict_type != rce.pict_type {
          warn!(
            "picture {} coded as {} but planned as {}",
            picture_number,
            pict_type.as_char(),
            rce.pict_type.as_char()
          );
        }
        rce.new_qscale as f64 / br_compensation
      }
      None => {
        let mut rce = StatEntry {
          pict_type,
          mc_mb_var_sum: frame.mc_mb_var_sum,
          mb_var_sum: frame.mb_var_sum,
          qscale: (2 * QP2LAMBDA) as f32,
          f_code: frame.f_code,
          b_code: frame.b_code,
          misc_bits: 1,
          ..Default::default()
        };
        let bits = run.pred[pict_type]
          .predict(rce.qscale as f64, (var as f64).sqrt());
        if pict_type == PictureType::I {
          rce.i_count = model.mb_num as i32;
          rce.i_tex_bits = bits as i32;
        } else {
          rce.p_tex_bits = (bits * 0.9) as i32;
          rce.mv_bits = (bits * 0.1) as i32;
        }
        run.account(&rce);

        let rate_factor = run.pass1_wanted_bits / run.pass1_rc_eq_output_sum
          * br_compensation;

        let mut q =
          model.get_qscale(run, &rce, rate_factor, picture_number)?;
        q = model.get_diff_limited_q(run, pict_type, q);

        if pict_type == PictureType::P || enc.intra_only {
          let qblur = enc.qblur as f64;
          run.short_term_qsum *= qblur;
          run.short_term_qcount *= qblur;
          run.short_term_qsum += q;
          run.short_term_qcount += 1.0;
          short_term_q = run.short_term_qsum / run.short_term_qcount;
          q = short_term_q;
        }

        q = model.modify_qscale(run, &rce, q, picture_number);
        run.pass1_wanted_bits += model.bits_per_frame;
        q
      }
    };

    debug!(
      "{} qp:{}<{:2.1}<{} {} want:{} total:{} comp:{} st_q:{:2.2} size:{} var:{}/{} br:{} fps:{}",
      pict_type.as_char(),
      qmin,
      q,
      qmax,
      picture_number,
      wanted_bits / 1000,
      frame.total_bits / 1000,
      br_compensation,
      short_term_q,
      frame.last_frame_bits,
      frame.mb_var_sum,
      frame.mc_mb_var_sum,
      enc.bitrate / 1000,
      model.fps as i32
    );

    let mut q = q as f32;
    if q < qmin as f32 {
      q = qmin as f32;
    } else if q > qmax as f32 {
      q = qmax as f32;
    }

    let lambda_table = match (enc.adaptive_quant, frame.macroblocks) {
      (Some(aq), Some(mbs)) => Some(adaptive_quantization(&aq, &mbs, q)),
      (aq, _) => {
        if aq.is_some() {
          warn!(
            "no macroblock statistics for picture {}, adaptive quantization skipped",
            picture_number
          );
        }
        q = (q + 0.5).floor();
        None
      }
    };

    run.last_qscale = q as f64;
    run.last_mc_mb_var_sum = frame.mc_mb_var_sum;
    run.last_mb_var_sum = frame.mb_var_sum;

    Ok(QuantizerDecision { qscale: q, lambda_table })
  }

  pub fn vbv_update(&mut self, frame_size: i64) -> i32 {
    self.run.vbv.update(frame_size)
  }

  pub fn get_2pass_fcode(&self, entry: usize) -> Option<(i32, i32)> {
    self.entries.get(entry).map(|rce| (rce.f_code, rce.b_code))
  }

  pub fn buffer_index(&self) -> f64 {
    self.run.vbv.buffer_index
  }

  pub fn is_second_pass(&self) -> bool {
    !self.entries.is_empty()
  }

  pub fn entries(&self) -> &[StatEntry] {
    &self.entries
  }
}
