// Copyright (c) 2017-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! ratectl is a frame-level rate controller for block-based video encoders.
//!
//! It turns a bitrate policy into a quantizer scale for every coded picture.
//! In single-pass mode it predicts frame sizes online from the variance of
//! each picture; in two-pass mode it reads the statistics log written by a
//! first pass and plans the whole quantizer curve up front so the output
//! lands on the requested size.
//!
//! The encoder owns the macroblock cost model and the bitstream writer; this
//! crate only consumes the per-frame statistics those produce and hands back
//! quantizers.
//!
//! # Basic usage
//!
//! ```
//! use ratectl::prelude::*;
//!
//! # fn main() -> Result<(), RateControlError> {
//! let mut enc = EncoderConfig::default();
//! enc.bitrate = 800_000;
//!
//! let cfg = Config::new().with_encoder_config(enc);
//! let mut ctx = cfg.new_context()?;
//!
//! let frame = FrameInput {
//!   picture_number: 0,
//!   pict_type: PictureType::I,
//!   mb_var_sum: 396 * 400,
//!   mc_mb_var_sum: 396 * 400,
//!   ..Default::default()
//! };
//! let decision = ctx.estimate_qscale(&frame, false)?;
//! assert!(decision.qscale >= 1.0);
//! # Ok(())
//! # }
//! ```

#![deny(bare_trait_objects)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::float_cmp)]
#![warn(clippy::expl_impl_clone_on_copy)]
#![warn(clippy::linkedlist)]
#![warn(clippy::map_flatten)]
#![warn(clippy::mem_forget)]
#![warn(clippy::mut_mut)]
#![warn(clippy::mutex_integer)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_continue)]
#![warn(clippy::path_buf_push_overwrite)]
#![warn(clippy::range_plus_one)]

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

#[cfg(feature = "serialize")]
mod serialize {
  pub use serde::*;
}

#[cfg(not(feature = "serialize"))]
mod serialize {
  pub use noop_proc_macro::{Deserialize, Serialize};
}

mod api;
pub(crate) mod rate;

pub use crate::api::*;
pub use crate::rate::{
  OverrideAction, Predictor, RcOverride, StatEntry, StatsLine, StatsLog,
  LAMBDA_MAX, LAMBDA_SCALE, LAMBDA_SHIFT, QP2LAMBDA,
};

/// Commonly used types and traits.
pub mod prelude {
  pub use crate::api::*;
  pub use crate::rate::{OverrideAction, RcOverride, StatEntry, StatsLog};
}

#[cfg(feature = "bench")]
pub mod bench {
  pub mod rate {
    pub use crate::rate::aq::adaptive_quantization;
    pub use crate::rate::expr::{Constant, RateEquation, CONSTANT_COUNT};
  }
}
