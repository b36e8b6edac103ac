use ratectl::prelude::*;

#[test]
fn estimate_qscale() -> Result<(), Box<dyn std::error::Error>> {
  let cfg = Config::default();
  let mut ctx = cfg.new_context()?;
  let frame = FrameInput {
    picture_number: 0,
    pict_type: PictureType::I,
    mb_var_sum: 396 * 300,
    ..Default::default()
  };

  // Probe the rate control without touching its state
  let trial = ctx.estimate_qscale(&frame, true)?;
  // Then commit to the picture
  let decision = ctx.estimate_qscale(&frame, false)?;
  assert_eq!(trial, decision);
  Ok(())
}

#[test]
fn vbv_update() -> Result<(), Box<dyn std::error::Error>> {
  let enc = EncoderConfig {
    buffer_size: 2_000_000,
    min_rate: 0,
    max_rate: 1_000_000,
    ..Default::default()
  };
  let cfg = Config::new().with_encoder_config(enc);
  let mut ctx = cfg.new_context()?;

  // A picture larger than the buffer content underflows, which is logged
  // and clamped.
  let stuffing = ctx.vbv_update(10_000_000);
  assert_eq!(stuffing, 0);
  assert!(ctx.buffer_index() >= 0.0);
  Ok(())
}

#[test]
fn stats_log() -> Result<(), Box<dyn std::error::Error>> {
  let entry = StatEntry {
    pict_type: PictureType::I,
    qscale: 236.0,
    i_tex_bits: 40_000,
    misc_bits: 300,
    ..Default::default()
  };
  let log = StatsLog::from_entries(vec![entry; 3]);

  let text = log.to_string();
  let parsed: StatsLog = text.parse()?;
  assert_eq!(parsed.len(), 3);
  let (n, first) = parsed.iter().next().ok_or("empty log")?;
  assert_eq!(n, 0);
  assert_eq!(first.i_tex_bits, 40_000);
  Ok(())
}
