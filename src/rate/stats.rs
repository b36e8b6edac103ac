// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use nom::bytes::complete::tag;
use nom::character::complete::{
  i32 as int32, i64 as int64, multispace0, u64 as uint64,
};
use nom::combinator::{eof, map_opt};
use nom::error::Error as NomError;
use nom::number::complete::float;
use nom::sequence::{pair, preceded, terminated};
use nom::{IResult, Parser};

use crate::api::{PictureType, RateControlError};
use crate::rate::StatEntry;

use std::fmt;
use std::str::FromStr;

/// The statistics log written by a first pass.
///
/// The log is a sequence of `;` terminated lines, one per coded picture:
///
/// ```text
/// in:0 out:0 type:1 q:236 itex:20000 ptex:0 mv:0 misc:120 fcode:1 bcode:1 mc-var:0 var:30000 icount:396 skipcount:0 hbits:40;
/// ```
///
/// `in` is the coding-order index of the picture and `type` its picture
/// type code (1 for I, 2 for P, 3 for B).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsLog {
  lines: Vec<(usize, StatEntry)>,
}

fn field<'a, O, F>(
  name: &'static str, value: F,
) -> impl Parser<&'a str, O, NomError<&'a str>>
where
  F: Parser<&'a str, O, NomError<&'a str>>,
{
  preceded(pair(multispace0, tag(name)), value)
}

fn stats_line(input: &str) -> IResult<&str, (usize, StatEntry)> {
  let (input, picture_number) = field("in:", uint64).parse(input)?;
  let (input, _) = field("out:", int64).parse(input)?;
  let (input, pict_type) =
    field("type:", map_opt(int64, PictureType::from_code)).parse(input)?;
  let (input, qscale) = field("q:", float).parse(input)?;
  let (input, i_tex_bits) = field("itex:", int32).parse(input)?;
  let (input, p_tex_bits) = field("ptex:", int32).parse(input)?;
  let (input, mv_bits) = field("mv:", int32).parse(input)?;
  let (input, misc_bits) = field("misc:", int32).parse(input)?;
  let (input, f_code) = field("fcode:", int32).parse(input)?;
  let (input, b_code) = field("bcode:", int32).parse(input)?;
  let (input, mc_mb_var_sum) = field("mc-var:", int64).parse(input)?;
  let (input, mb_var_sum) = field("var:", int64).parse(input)?;
  let (input, i_count) = field("icount:", int32).parse(input)?;
  let (input, skip_count) = field("skipcount:", int32).parse(input)?;
  let (input, header_bits) =
    terminated(field("hbits:", int32), pair(multispace0, eof)).parse(input)?;

  Ok((
    input,
    (
      picture_number as usize,
      StatEntry {
        pict_type,
        qscale,
        mv_bits,
        i_tex_bits,
        p_tex_bits,
        misc_bits,
        header_bits,
        mc_mb_var_sum,
        mb_var_sum,
        i_count,
        skip_count,
        f_code,
        b_code,
        new_qscale: qscale,
        expected_bits: 0,
      },
    ),
  ))
}

impl StatsLog {
  /// Builds a log from entries given in coding order.
  pub fn from_entries<I: IntoIterator<Item = StatEntry>>(entries: I) -> Self {
    StatsLog { lines: entries.into_iter().enumerate().collect() }
  }

  /// Number of pictures in the log.
  pub fn len(&self) -> usize {
    self.lines.len()
  }

  /// Whether the log holds no picture.
  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  /// The logged pictures with their coding-order index, in log order.
  pub fn iter(&self) -> impl Iterator<Item = (usize, &StatEntry)> {
    self.lines.iter().map(|(n, entry)| (*n, entry))
  }

  /// Builds the second-pass entry table.
  ///
  /// The table has room for `max_b_frames` pictures past the end of the log;
  /// the pictures the log does not describe stay skipped P pictures.
  pub(crate) fn entry_table(
    &self, max_b_frames: usize, mb_num: usize,
  ) -> Result<Vec<StatEntry>, RateControlError> {
    let num_entries = self.lines.len() + max_b_frames;
    if num_entries == 0 {
      return Err(RateControlError::EmptyStats);
    }

    let mut entries = vec![StatEntry::skipped(mb_num); num_entries];
    for &(picture_number, entry) in &self.lines {
      let slot = entries.get_mut(picture_number).ok_or(
        RateControlError::FrameOutOfRange {
          frame: picture_number,
          entries: num_entries,
        },
      )?;
      *slot = entry;
    }

    Ok(entries)
  }
}

impl FromStr for StatsLog {
  type Err = RateControlError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let frames = s.matches(';').count();
    if frames == 0 {
      return Err(RateControlError::EmptyStats);
    }

    let lines = s
      .split(';')
      .take(frames)
      .enumerate()
      .map(|(line, text)| {
        stats_line(text).map(|(_, parsed)| parsed).map_err(|e| {
          RateControlError::CorruptedStats { line, reason: e.to_string() }
        })
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok(StatsLog { lines })
  }
}

impl fmt::Display for StatsLog {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (n, entry) in self.iter() {
      writeln!(f, "{}", entry.stats_line(n, n))?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  const LOG: &str = "\
in:0 out:0 type:1 q:236 itex:20000 ptex:0 mv:0 misc:120 fcode:1 bcode:1 mc-var:0 var:30000 icount:396 skipcount:0 hbits:40;
in:1 out:1 type:2 q:354.5 itex:100 ptex:8000 mv:900 misc:60 fcode:2 bcode:1 mc-var:12000 var:29000 icount:2 skipcount:30 hbits:40;
";

  #[test]
  fn parses_lines() {
    let log: StatsLog = LOG.parse().unwrap();
    assert_eq!(log.len(), 2);

    let (n, p) = log.iter().nth(1).unwrap();
    assert_eq!(n, 1);
    assert_eq!(
      *p,
      StatEntry {
        pict_type: PictureType::P,
        qscale: 354.5,
        mv_bits: 900,
        i_tex_bits: 100,
        p_tex_bits: 8000,
        misc_bits: 60,
        header_bits: 40,
        mc_mb_var_sum: 12000,
        mb_var_sum: 29000,
        i_count: 2,
        skip_count: 30,
        f_code: 2,
        b_code: 1,
        new_qscale: 354.5,
        expected_bits: 0,
      }
    );
  }

  #[test]
  fn display_reads_back() {
    let log: StatsLog = LOG.parse().unwrap();
    let again: StatsLog = log.to_string().parse().unwrap();
    assert_eq!(log, again);
  }

  #[test]
  fn corrupted_line_is_reported() {
    let damaged = LOG.replace("mv:900 ", "");
    match damaged.parse::<StatsLog>() {
      Err(RateControlError::CorruptedStats { line, .. }) => {
        assert_eq!(line, 1)
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn unknown_picture_type_is_rejected() {
    let damaged = LOG.replace("type:2", "type:9");
    assert!(matches!(
      damaged.parse::<StatsLog>(),
      Err(RateControlError::CorruptedStats { line: 1, .. })
    ));
  }

  #[test]
  fn empty_log_is_rejected() {
    assert_eq!("".parse::<StatsLog>(), Err(RateControlError::EmptyStats));
  }

  #[test]
  fn entry_table_pads_with_skipped_pictures() {
    let log: StatsLog = LOG.parse().unwrap();
    let table = log.entry_table(2, 396).unwrap();
    assert_eq!(table.len(), 4);
    assert_eq!(table[0].pict_type, PictureType::I);
    assert_eq!(table[2], StatEntry::skipped(396));
    assert_eq!(table[3], StatEntry::skipped(396));
  }

  #[test]
  fn entry_table_rejects_out_of_range_pictures() {
    let log: StatsLog = LOG.replace("in:1 ", "in:7 ").parse().unwrap();
    assert_eq!(
      log.entry_table(0, 396),
      Err(RateControlError::FrameOutOfRange { frame: 7, entries: 2 })
    );
  }
}
