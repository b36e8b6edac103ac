// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use criterion::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;

use ratectl::bench::rate::{
  adaptive_quantization, Constant, RateEquation, CONSTANT_COUNT,
};
use ratectl::prelude::*;

const MB_WIDTH: usize = 120;
const MB_HEIGHT: usize = 68;

fn first_pass_log(frames: usize, seed: u8) -> StatsLog {
  let mut ra = ChaChaRng::from_seed([seed; 32]);
  StatsLog::from_entries((0..frames).map(|n| {
    let intra = n % 48 == 0;
    let tex: i32 = ra.gen_range(20_000..200_000);
    let qscale: i32 = ra.gen_range(236..1200);
    StatEntry {
      pict_type: if intra { PictureType::I } else { PictureType::P },
      qscale: qscale as f32,
      i_tex_bits: if intra { tex * 4 } else { 0 },
      p_tex_bits: if intra { 0 } else { tex },
      mv_bits: tex / 10,
      misc_bits: 800,
      f_code: 1,
      b_code: 1,
      ..Default::default()
    }
  }))
}

fn rate_equation(c: &mut Criterion) {
  let eq = RateEquation::parse(
    "(tex^qComp)*(1+isI*0.5)*max(1,min(2,avgTex/(tex+1)))",
  )
  .unwrap();
  let mut consts = [1.0; CONSTANT_COUNT];
  consts[Constant::Tex as usize] = 120_000.0;
  consts[Constant::QComp as usize] = 0.5;
  consts[Constant::AvgTex as usize] = 90_000.0;
  let entry = StatEntry::default();

  c.bench_function("rate_equation", move |b| {
    b.iter(|| eq.eval(black_box(&consts), &entry))
  });
}

fn adaptive_quant(c: &mut Criterion) {
  let mut ra = ChaChaRng::from_seed([1; 32]);
  let n = MB_WIDTH * MB_HEIGHT;
  let mb_var: Vec<u32> = (0..n).map(|_| ra.gen_range(0..4096)).collect();
  let mc_mb_var: Vec<u32> = (0..n).map(|_| ra.gen_range(0..2048)).collect();
  let mb_mean: Vec<u8> = (0..n).map(|_| ra.gen()).collect();
  let intra: Vec<bool> = (0..n).map(|_| ra.gen_ratio(1, 8)).collect();
  let aq = AdaptiveQuantSettings {
    lumi_masking: 0.05,
    dark_masking: 0.1,
    temporal_cplx_masking: 0.1,
    spatial_cplx_masking: 0.2,
    p_masking: 0.1,
    border_masking: 0.2,
    naq: true,
    ..Default::default()
  };

  c.bench_function("adaptive_quantization_1080p", move |b| {
    let mbs = MacroblockStats {
      mb_width: MB_WIDTH,
      mb_height: MB_HEIGHT,
      mb_var: &mb_var,
      mc_mb_var: &mc_mb_var,
      mb_mean: &mb_mean,
      intra: &intra,
    };
    b.iter(|| adaptive_quantization(&aq, black_box(&mbs), 900.0))
  });
}

fn two_pass_init(c: &mut Criterion) {
  let stats = first_pass_log(1000, 2);
  let enc = EncoderConfig {
    bitrate: 2_000_000,
    mb_width: MB_WIDTH,
    mb_height: MB_HEIGHT,
    gop_size: 48,
    ..Default::default()
  };
  let cfg = Config::new()
    .with_encoder_config(enc)
    .with_rate_control(RateControlConfig::new().with_stats(stats));

  c.bench_function("two_pass_init_1000", move |b| {
    b.iter(|| cfg.new_context().unwrap())
  });
}

fn single_pass(c: &mut Criterion) {
  let cfg = Config::default();

  c.bench_function("single_pass_100", move |b| {
    b.iter(|| {
      let mut ctx = cfg.new_context().unwrap();
      let mut total_bits = 0;
      for n in 0..100 {
        let pict_type =
          if n % 12 == 0 { PictureType::I } else { PictureType::P };
        let frame = FrameInput {
          picture_number: n,
          pict_type,
          mb_var_sum: 396 * 400,
          mc_mb_var_sum: 396 * 100,
          last_frame_bits: 8000,
          total_bits,
          ..Default::default()
        };
        ctx.estimate_qscale(&frame, false).unwrap();
        total_bits += 8000;
      }
    })
  });
}

criterion_group!(rate, rate_equation, adaptive_quant, two_pass_init, single_pass);
criterion_main!(rate);
