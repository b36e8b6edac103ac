// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::{PictureType, QuantizerSettings, RateControlError};
use crate::rate::expr::CONSTANT_COUNT;
use crate::rate::{
  OverrideAction, RateModel, Running, StatEntry, INITIAL_LAST_QSCALE,
  LAMBDA_MAX, QP2LAMBDA,
};

use std::f64::consts::{E, PI};

/// Lambda range of `pict_type`: the base range scaled by the I or B
/// quantizer factor and offset.
pub(crate) fn qminmax(
  qs: &QuantizerSettings, pict_type: PictureType,
) -> (i32, i32) {
  let (mut qmin, mut qmax) = (qs.lmin, qs.lmax);

  if let Some((factor, offset)) = qs.factor_offset(pict_type) {
    let scale = |l: i32| {
      (l as f64 * factor.abs() as f64 + offset as f64 + 0.5) as i32
    };
    qmin = scale(qmin);
    qmax = scale(qmax);
  }

  qmin = qmin.max(1).min(LAMBDA_MAX);
  qmax = qmax.max(1).min(LAMBDA_MAX);

  if qmax < qmin {
    qmax = qmin;
  }

  (qmin, qmax)
}

impl RateModel {
  #[inline]
  pub(crate) fn get_qminmax(&self, pict_type: PictureType) -> (i32, i32) {
    qminmax(&self.enc.quantizer, pict_type)
  }

  fn equation_constants(
    &self, run: &Running, rce: &StatEntry,
  ) -> [f64; CONSTANT_COUNT] {
    use crate::api::PictureType::*;

    let pict_type = rce.pict_type;
    let qscale = rce.qscale as f64;
    let mb_num = self.mb_num;
    let count = |t: PictureType| run.frame_count[t] as f64;
    let flag = |t: PictureType| if pict_type == t { 1.0 } else { 0.0 };

    [
      PI,
      E,
      rce.i_tex_bits as f64 * qscale,
      rce.p_tex_bits as f64 * qscale,
      (rce.i_tex_bits as f64 + rce.p_tex_bits as f64) * qscale,
      rce.mv_bits as f64 / mb_num,
      if pict_type == B {
        (rce.f_code as f64 + rce.b_code as f64) * 0.5
      } else {
        rce.f_code as f64
      },
      rce.i_count as f64 / mb_num,
      rce.mc_mb_var_sum as f64 / mb_num,
      rce.mb_var_sum as f64 / mb_num,
      flag(I),
      flag(P),
      flag(B),
      run.qscale_sum[pict_type] / count(pict_type),
      self.enc.qcompress as f64,
      run.i_cplx_sum[I] / count(I),
      run.i_cplx_sum[P] / count(P),
      run.p_cplx_sum[P] / count(P),
      run.p_cplx_sum[B] / count(B),
      (run.i_cplx_sum[pict_type] + run.p_cplx_sum[pict_type])
        / count(pict_type),
    ]
  }

  /// Quantizer the rate equation grants `rce` at `rate_factor`, after the
  /// user overrides and the independent I/B offsets.
  pub(crate) fn get_qscale(
    &self, run: &mut Running, rce: &StatEntry, rate_factor: f64,
    frame_num: usize,
  ) -> Result<f64, RateControlError> {
    let pict_type = rce.pict_type;
    let consts = self.equation_constants(run, rce);

    let mut bits = self.eq.eval(&consts, rce);
    if bits.is_nan() {
      error!("Error evaluating rc_eq \"{}\"", self.eq.source());
      return Err(RateControlError::EquationNaN(self.eq.source().to_string()));
    }

    run.pass1_rc_eq_output_sum += bits;
    bits *= rate_factor;
    if bits < 0.0 {
      bits = 0.0;
    }
    bits += 1.0;

    for rco in self.overrides.iter().filter(|rco| rco.contains(frame_num)) {
      match rco.action {
        OverrideAction::Qscale(q) => bits = rce.qp2bits(q as f64),
        OverrideAction::QualityFactor(factor) => bits *= factor as f64,
      }
    }

    let mut q = rce.bits2qp(bits);

    let qs = &self.enc.quantizer;
    if pict_type == PictureType::I && qs.i_quant_factor < 0.0 {
      q = -q * qs.i_quant_factor as f64 + qs.i_quant_offset as f64;
    } else if pict_type == PictureType::B && qs.b_quant_factor < 0.0 {
      q = -q * qs.b_quant_factor as f64 + qs.b_quant_offset as f64;
    }
    if q < 1.0 {
      q = 1.0;
    }

    Ok(q)
  }

  /// Chains I and B quantizers to the P quantizers and bounds the change
  /// from the previous picture of the same type.
  pub(crate) fn get_diff_limited_q(
    &self, run: &mut Running, pict_type: PictureType, q: f64,
  ) -> f64 {
    let qs = &self.enc.quantizer;
    let last_p_q = run.last_qscale_for[PictureType::P];
    let last_non_b_q = run
      .last_non_b_pict_type
      .map_or(INITIAL_LAST_QSCALE, |t| run.last_qscale_for[t]);

    let mut q = q;
    if pict_type == PictureType::I
      && (qs.i_quant_factor > 0.0
        || run.last_non_b_pict_type == Some(PictureType::P))
    {
      q = last_p_q * qs.i_quant_factor.abs() as f64 + qs.i_quant_offset as f64;
    } else if pict_type == PictureType::B && qs.b_quant_factor > 0.0 {
      q = last_non_b_q * qs.b_quant_factor as f64 + qs.b_quant_offset as f64;
    }
    if q < 1.0 {
      q = 1.0;
    }

    if run.last_non_b_pict_type == Some(pict_type)
      || pict_type != PictureType::I
    {
      let last_q = run.last_qscale_for[pict_type];
      let max_diff = QP2LAMBDA as f64 * qs.max_qdiff as f64;

      if q > last_q + max_diff {
        q = last_q + max_diff;
      } else if q < last_q - max_diff {
        q = last_q - max_diff;
      }
    }

    // Must be recorded before any blurring.
    run.last_qscale_for[pict_type] = q;

    if pict_type != PictureType::B {
      run.last_non_b_pict_type = Some(pict_type);
    }

    q
  }

  /// Applies the quantizer modulation and the buffer protection, then
  /// brings `q` into the lambda range of the picture type.
  pub(crate) fn modify_qscale(
    &self, run: &Running, rce: &StatEntry, q: f64, frame_num: usize,
  ) -> f64 {
    let enc = &self.enc;
    let pict_type = rce.pict_type;
    let (qmin, qmax) = self.get_qminmax(pict_type);
    let vbv = &run.vbv;

    let mut q = q;

    if enc.qmod_freq != 0
      && frame_num % enc.qmod_freq as usize == 0
      && pict_type == PictureType::P
    {
      q *= enc.qmod_amp as f64;
    }

    if vbv.is_enabled() {
      let buffer_size = vbv.buffer_size();
      let expected_size = vbv.buffer_index;
      let aggressivity = 1.0 / enc.buffer_aggressivity as f64;

      if vbv.min_rate() != 0.0 {
        let d =
          clip_depletion(2.0 * (buffer_size - expected_size) / buffer_size);
        q *= d.powf(aggressivity);

        let q_limit = rce.bits2qp(
          ((vbv.min_rate() - buffer_size + expected_size)
            * enc.min_vbv_overflow_use as f64)
            .max(1.0),
        );
        if q > q_limit {
          debug!("limiting QP {} -> {}", q, q_limit);
          q = q_limit;
        }
      }

      if vbv.max_rate() != 0.0 {
        let d = clip_depletion(2.0 * expected_size / buffer_size);
        q /= d.powf(aggressivity);

        let q_limit = rce.bits2qp(
          (expected_size * enc.max_available_vbv_use as f64).max(1.0),
        );
        if q < q_limit {
          debug!("limiting QP {} -> {}", q, q_limit);
          q = q_limit;
        }
      }
    }

    let (qmin, qmax) = (qmin as f64, qmax as f64);
    if enc.qsquish == 0.0 || qmin == qmax {
      if q < qmin {
        q = qmin;
      } else if q > qmax {
        q = qmax;
      }
    } else {
      let min2 = qmin.ln();
      let max2 = qmax.ln();

      // Logistic curve through the log-lambda range.
      let x = (q.ln() - min2) / (max2 - min2) - 0.5;
      let y = 1.0 / (1.0 + (-4.0 * x).exp());
      q = (y * (max2 - min2) + min2).exp();
    }

    q
  }
}

fn clip_depletion(d: f64) -> f64 {
  if d > 1.0 {
    1.0
  } else if d < 0.0001 {
    0.0001
  } else {
    d
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::api::EncoderConfig;
  use crate::rate::LAMBDA_SCALE;
  use quickcheck::{quickcheck, TestResult};

  fn setup(enc: &EncoderConfig) -> (RateModel, Running) {
    let mut run = Running::new(enc);
    run.pass1_rc_eq_output_sum = 0.001;
    (RateModel::new(enc).unwrap(), run)
  }

  fn p_entry() -> StatEntry {
    StatEntry {
      pict_type: PictureType::P,
      qscale: (2 * QP2LAMBDA) as f32,
      p_tex_bits: 20_000,
      mv_bits: 2000,
      misc_bits: 300,
      ..Default::default()
    }
  }

  #[test]
  fn single_intra_entry() {
    let enc = EncoderConfig::default();
    let (model, mut run) = setup(&enc);
    let rce = StatEntry {
      pict_type: PictureType::I,
      qscale: (2 * LAMBDA_SCALE) as f32,
      i_tex_bits: 100_000,
      ..Default::default()
    };
    let q = model.get_qscale(&mut run, &rce, 1.0, 0).unwrap();
    assert!(q.is_finite());
    assert!(q >= 1.0);
  }

  #[test]
  fn overrides_force_or_scale() {
    let enc = EncoderConfig {
      rc_overrides: Some("0,10,5/11,20,-50".to_string()),
      ..Default::default()
    };
    let (model, mut run) = setup(&enc);
    let (plain, mut plain_run) = setup(&EncoderConfig::default());
    let rce = p_entry();

    for frame in 0..=10 {
      let q = model.get_qscale(&mut run, &rce, 2.0, frame).unwrap();
      assert!((q - 5.0).abs() < 1e-9, "frame {} got {}", frame, q);
    }

    let scaled = model.get_qscale(&mut run, &rce, 2.0, 15).unwrap();
    let reference = plain.get_qscale(&mut plain_run, &rce, 2.0, 15).unwrap();
    assert!((scaled - 2.0 * reference).abs() < 1e-6 * reference);

    let outside = model.get_qscale(&mut run, &rce, 2.0, 21).unwrap();
    assert!((outside - reference).abs() < 1e-6 * reference);
  }

  #[test]
  fn zero_quality_factor_saturates() {
    let enc = EncoderConfig {
      rc_overrides: Some("0,10,0".to_string()),
      ..Default::default()
    };
    let (model, mut run) = setup(&enc);
    let rce = p_entry();
    let q = model.get_qscale(&mut run, &rce, 2.0, 3).unwrap();
    assert_eq!(q, f64::INFINITY);
    assert_eq!(model.modify_qscale(&run, &rce, q, 3), 3658.0);
  }

  #[test]
  fn independent_intra_offset() {
    let enc = EncoderConfig::default();
    let (model, mut run) = setup(&enc);
    let p = model.get_qscale(&mut run, &p_entry(), 1.0, 0).unwrap();
    let i = model
      .get_qscale(
        &mut run,
        &StatEntry { pict_type: PictureType::I, ..p_entry() },
        1.0,
        0,
      )
      .unwrap();
    let expected = p * -(enc.quantizer.i_quant_factor as f64);
    assert!((i - expected).abs() < 1e-9 * p, "{} != {}", i, expected);
  }

  #[test]
  fn nan_is_an_error() {
    let enc = EncoderConfig {
      rc_eq: Some("sqrt(iTex-100000)".to_string()),
      ..Default::default()
    };
    let (model, mut run) = setup(&enc);
    let rce = StatEntry { i_tex_bits: 100, ..p_entry() };
    assert_eq!(
      model.get_qscale(&mut run, &rce, 1.0, 0),
      Err(RateControlError::EquationNaN("sqrt(iTex-100000)".to_string()))
    );
  }

  #[test]
  fn p_range_is_the_base_range() {
    let qs = QuantizerSettings::default();
    assert_eq!(qminmax(&qs, PictureType::P), (236, 3658));
    assert_eq!(qminmax(&qs, PictureType::I), (189, 2926));
    assert_eq!(qminmax(&qs, PictureType::B), (296, 4574));
  }

  quickcheck! {
    fn qminmax_is_ordered(
      lmin: i32, lmax: i32, factor: f32, offset: f32, b: bool
    ) -> bool {
      let qs = QuantizerSettings {
        lmin,
        lmax,
        i_quant_factor: factor,
        i_quant_offset: offset,
        b_quant_factor: factor,
        b_quant_offset: offset,
        ..Default::default()
      };
      let pict_type = if b { PictureType::B } else { PictureType::I };
      let (qmin, qmax) = qminmax(&qs, pict_type);
      1 <= qmin && qmin <= qmax && qmax <= LAMBDA_MAX
    }
  }

  quickcheck! {
    fn diff_limiter_bounds_steps(qs: Vec<u16>) -> TestResult {
      if qs.is_empty() {
        return TestResult::discard();
      }
      let enc = EncoderConfig::default();
      let (model, mut run) = setup(&enc);
      let max_diff = (QP2LAMBDA * enc.quantizer.max_qdiff) as f64;
      let mut last = INITIAL_LAST_QSCALE;
      for q in qs {
        let limited =
          model.get_diff_limited_q(&mut run, PictureType::P, q as f64 + 1.0);
        if (limited - last).abs() > max_diff + 1e-9 {
          return TestResult::failed();
        }
        last = limited;
      }
      TestResult::passed()
    }
  }

  #[test]
  fn intra_follows_last_p() {
    let enc = EncoderConfig::default();
    let (model, mut run) = setup(&enc);
    model.get_diff_limited_q(&mut run, PictureType::P, 1000.0);
    let q = model.get_diff_limited_q(&mut run, PictureType::I, 5000.0);
    assert!((q - 944.0 * 0.8).abs() < 1e-3);
    assert_eq!(run.last_non_b_pict_type, Some(PictureType::I));
  }

  #[test]
  fn b_follows_last_non_b() {
    let enc = EncoderConfig::default();
    let (model, mut run) = setup(&enc);
    let q = model.get_diff_limited_q(&mut run, PictureType::B, 10.0);
    assert!((q - (590.0 * 1.25 + 1.25)).abs() < 1e-9);
    assert_eq!(run.last_non_b_pict_type, None);
  }

  #[test]
  fn hard_clip() {
    let enc = EncoderConfig::default();
    let (model, run) = setup(&enc);
    let rce = p_entry();
    assert_eq!(model.modify_qscale(&run, &rce, 10.0, 1), 236.0);
    assert_eq!(model.modify_qscale(&run, &rce, 1e6, 1), 3658.0);
    assert_eq!(model.modify_qscale(&run, &rce, 1000.0, 1), 1000.0);
  }

  #[test]
  fn squish_is_soft_and_monotonic() {
    let enc = EncoderConfig { qsquish: 1.0, ..Default::default() };
    let (model, run) = setup(&enc);
    let rce = p_entry();
    let mut last = 0.0;
    for q in &[1.0, 100.0, 236.0, 1000.0, 3658.0, 10_000.0, 1e6] {
      let squished = model.modify_qscale(&run, &rce, *q, 1);
      assert!(squished > 236.0 && squished < 3658.0, "{}", squished);
      assert!(squished > last);
      last = squished;
    }
  }

  #[test]
  fn periodic_modulation() {
    let enc =
      EncoderConfig { qmod_freq: 4, qmod_amp: 2.0, ..Default::default() };
    let (model, run) = setup(&enc);
    let rce = p_entry();
    assert_eq!(model.modify_qscale(&run, &rce, 500.0, 8), 1000.0);
    assert_eq!(model.modify_qscale(&run, &rce, 500.0, 9), 500.0);
    let b = StatEntry { pict_type: PictureType::B, ..rce };
    assert_eq!(model.modify_qscale(&run, &b, 500.0, 8), 500.0);
  }

  #[test]
  fn empty_buffer_raises_the_quantizer() {
    let enc = EncoderConfig {
      buffer_size: 400_000,
      max_rate: 400_000,
      ..Default::default()
    };
    let (model, mut run) = setup(&enc);
    let rce = p_entry();
    let full = model.modify_qscale(&run, &rce, 500.0, 1);
    run.vbv.buffer_index = 20_000.0;
    let drained = model.modify_qscale(&run, &rce, 500.0, 1);
    assert!(drained > full, "{} <= {}", drained, full);
  }

  #[test]
  fn full_buffer_lowers_the_quantizer() {
    let enc = EncoderConfig {
      buffer_size: 400_000,
      min_rate: 400_000,
      max_rate: 400_000,
      ..Default::default()
    };
    let (model, mut run) = setup(&enc);
    let rce = p_entry();

    run.vbv.buffer_index = 300_000.0;
    assert_eq!(model.modify_qscale(&run, &rce, 4000.0, 1), 2000.0);

    // 16000 bits per picture refill a buffer 10000 bits short of full.
    run.vbv.buffer_index = 390_000.0;
    let q = model.modify_qscale(&run, &rce, 100_000.0, 1);
    let limit = rce.bits2qp((16_000.0 - 10_000.0) * 3.0);
    assert!((q - limit).abs() < 1e-6, "{} != {}", q, limit);

    let (plain, plain_run) = setup(&EncoderConfig::default());
    assert!(q < plain.modify_qscale(&plain_run, &rce, 100_000.0, 1));
  }
}
