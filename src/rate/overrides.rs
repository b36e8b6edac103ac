// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use nom::character::complete::{char, i32 as integer};
use nom::combinator::{all_consuming, map};
use nom::multi::separated_list1;
use nom::sequence::{terminated, tuple};
use nom::IResult;

use crate::api::RateControlError;

/// What an override does to the pictures in its range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OverrideAction {
  /// Force this quantizer scale.
  Qscale(i32),
  /// Multiply the bits the rate equation grants by this factor.
  QualityFactor(f32),
}

/// A user override of the rate control over a closed range of pictures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RcOverride {
  /// First picture of the range.
  pub start_frame: i32,
  /// Last picture of the range, included.
  pub end_frame: i32,
  /// What to do with the pictures in the range.
  pub action: OverrideAction,
}

impl RcOverride {
  /// Whether picture `frame_num` falls in the range.
  #[inline]
  pub fn contains(&self, frame_num: usize) -> bool {
    let frame_num = frame_num as i64;
    self.start_frame as i64 <= frame_num && frame_num <= self.end_frame as i64
  }
}

fn rc_override(input: &str) -> IResult<&str, RcOverride> {
  map(
    tuple((
      terminated(integer, char(',')),
      terminated(integer, char(',')),
      integer,
    )),
    |(start_frame, end_frame, q)| RcOverride {
      start_frame,
      end_frame,
      action: if q > 0 {
        OverrideAction::Qscale(q)
      } else {
        OverrideAction::QualityFactor((-(q as i64)) as f32 / 100.0)
      },
    },
  )(input)
}

/// Parses an override list of the form `start,end,q/start,end,q/...`.
///
/// A positive `q` forces that quantizer scale, anything else scales the
/// bits of the range by `-q/100`.
///
/// # Errors
///
/// Returns `RateControlError::InvalidOverride` if the list is malformed.
pub fn parse_overrides(
  overrides: &str,
) -> Result<Vec<RcOverride>, RateControlError> {
  all_consuming(separated_list1(char('/'), rc_override))(overrides)
    .map(|(_, list)| list)
    .map_err(|e| RateControlError::InvalidOverride {
      overrides: overrides.to_string(),
      reason: e.to_string(),
    })
}
