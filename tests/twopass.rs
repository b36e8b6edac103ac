use ratectl::prelude::*;

use std::fmt::Write;

fn pict_type_of(n: usize) -> PictureType {
  if n % 12 == 0 {
    PictureType::I
  } else if n % 3 == 0 {
    PictureType::P
  } else {
    PictureType::B
  }
}

// A first-pass log of `frames` pictures in an IBBPBBPBBPBB pattern.
fn first_pass_log(frames: usize) -> String {
  let mut log = String::new();
  for n in 0..frames {
    let pict_type = pict_type_of(n);
    let (itex, ptex, mv) = match pict_type {
      PictureType::I => (120_000, 0, 0),
      PictureType::P => (2_000, 38_000, 4_000),
      _ => (0, 15_000, 3_000),
    };
    let entry = StatEntry {
      pict_type,
      qscale: 236.0,
      i_tex_bits: itex,
      p_tex_bits: ptex,
      mv_bits: mv,
      misc_bits: 400,
      header_bits: 64,
      mc_mb_var_sum: 396 * 90,
      mb_var_sum: 396 * 300,
      i_count: if pict_type == PictureType::I { 396 } else { 8 },
      f_code: 2,
      b_code: if pict_type == PictureType::B { 3 } else { 1 },
      ..Default::default()
    };
    writeln!(log, "{}", entry.stats_line(n, n)).unwrap();
  }
  log
}

fn second_pass_config(bitrate: i64) -> Config {
  let enc = EncoderConfig {
    bitrate,
    max_b_frames: 2,
    buffer_size: 1_800_000,
    max_rate: 1_000_000,
    rc_overrides: Some("0,5,-50".to_string()),
    ..Default::default()
  };
  let rc = RateControlConfig::from_stats_str(&first_pass_log(96)).unwrap();

  Config::new().with_encoder_config(enc).with_rate_control(rc)
}

#[test]
fn plan_matches_the_requested_size() {
  let ctx = second_pass_config(400_000).new_context().unwrap();
  let entries = ctx.entries();

  // Room is left for the delayed B pictures.
  assert_eq!(entries.len(), 98);
  assert_eq!(entries[97].pict_type, PictureType::P);
  assert_eq!(entries[97].i_tex_bits + entries[97].p_tex_bits, 0);

  let last = entries[97];
  let total = last.expected_bits as f64
    + last.qp2bits(last.new_qscale as f64)
    + (last.mv_bits + last.misc_bits) as f64;
  let available = 400_000.0 * 98.0 / 25.0;
  assert!(
    (total / available - 1.0).abs() <= 0.01,
    "{} vs {}",
    total,
    available
  );

  // B pictures follow their anchors with a coarser quantizer.
  let anchor = entries[51].new_qscale;
  let b = entries[52].new_qscale;
  assert!(b > anchor, "{} <= {}", b, anchor);
}

#[test]
fn encode_follows_the_plan() {
  let mut ctx = second_pass_config(400_000).new_context().unwrap();

  for n in 0..98 {
    let planned = ctx.entries()[n];
    let pict_type = if n < 96 { pict_type_of(n) } else { PictureType::P };
    assert_eq!(planned.pict_type, pict_type);

    let frame = FrameInput {
      picture_number: n,
      pict_type,
      total_bits: planned.expected_bits as i64,
      ..Default::default()
    };
    let decision = ctx.estimate_qscale(&frame, false).unwrap();
    assert_eq!(decision.qscale, (planned.new_qscale + 0.5).floor());

    if n < 96 {
      let b_code = if pict_type == PictureType::B { 3 } else { 1 };
      assert_eq!(ctx.get_2pass_fcode(n), Some((2, b_code)));
    }

    let size = planned.qp2bits(decision.qscale as f64) as i64
      + (planned.mv_bits + planned.misc_bits) as i64;
    assert_eq!(ctx.vbv_update(size), 0);
  }
}

#[test]
fn overshoot_raises_the_quantizer() {
  let mut on_plan = second_pass_config(400_000).new_context().unwrap();
  let mut behind = second_pass_config(400_000).new_context().unwrap();

  let planned = on_plan.entries()[40];
  let frame = FrameInput {
    picture_number: 40,
    pict_type: planned.pict_type,
    total_bits: planned.expected_bits as i64,
    ..Default::default()
  };
  let q = on_plan.estimate_qscale(&frame, false).unwrap().qscale;

  let late = FrameInput { total_bits: frame.total_bits + 2_000_000, ..frame };
  let q_late = behind.estimate_qscale(&late, false).unwrap().qscale;
  assert!(q_late > q, "{} <= {}", q_late, q);
}

#[test]
fn infeasible_bitrates() {
  assert!(matches!(
    second_pass_config(50_000).new_context(),
    Err(RateControlError::BitrateTooLow { .. })
  ));
}
