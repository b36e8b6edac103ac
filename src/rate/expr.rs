// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! The rate equation.
//!
//! The equation maps the first-pass statistics of a picture to the number of
//! bits it deserves, before the global rate factor is applied. It is written
//! in a small arithmetic language:
//!
//! ```text
//! expr    := sum (';' sum)*          value of the last sum
//! sum     := term (('+' | '-') term)*
//! term    := factor (('*' | '/') factor)*
//! factor  := sign? primary ('^' sign? primary)*
//! primary := number | name | name '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! A leading sign negates the whole power chain; `^` is left-associative.
//! Whitespace is ignored.

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, char, one_of};
use nom::combinator::{all_consuming, map, opt, recognize};
use nom::error::Error as NomError;
use nom::error::{ErrorKind, FromExternalError};
use nom::multi::{many0, many0_count, separated_list1};
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded};
use nom::Err as NomErr;
use nom::IResult;

use crate::api::RateControlError;
use crate::rate::StatEntry;

/// Number of named constants an equation can refer to.
pub const CONSTANT_COUNT: usize = 20;

/// Named constants, in the order of the value table given to
/// [`RateEquation::eval`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Constant {
  Pi,
  E,
  ITex,
  PTex,
  Tex,
  Mv,
  FCode,
  ICount,
  McVar,
  Var,
  IsI,
  IsP,
  IsB,
  AvgQp,
  QComp,
  AvgIITex,
  AvgPITex,
  AvgPPTex,
  AvgBPTex,
  AvgTex,
}

impl Constant {
  const ALL: [Constant; CONSTANT_COUNT] = {
    use self::Constant::*;
    [
      Pi, E, ITex, PTex, Tex, Mv, FCode, ICount, McVar, Var, IsI, IsP, IsB,
      AvgQp, QComp, AvgIITex, AvgPITex, AvgPPTex, AvgBPTex, AvgTex,
    ]
  };

  const NAMES: [&'static str; CONSTANT_COUNT] = [
    "PI", "E", "iTex", "pTex", "tex", "mv", "fCode", "iCount", "mcVar", "var",
    "isI", "isP", "isB", "avgQP", "qComp", "avgIITex", "avgPITex", "avgPPTex",
    "avgBPTex", "avgTex",
  ];

  fn from_name(name: &str) -> Option<Self> {
    Self::NAMES.iter().position(|&n| n == name).map(|i| Self::ALL[i])
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Func1 {
  Bits2Qp,
  Qp2Bits,
  Sqrt,
  Exp,
  Log,
  Abs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Func2 {
  Min,
  Max,
  Pow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
  Pow,
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
  Number(f64),
  Constant(Constant),
  Neg(Box<Node>),
  Binary(BinOp, Box<Node>, Box<Node>),
  Call1(Func1, Box<Node>),
  Call2(Func2, Box<Node>, Box<Node>),
  Sequence(Vec<Node>),
}

impl Node {
  fn eval(&self, consts: &[f64; CONSTANT_COUNT], entry: &StatEntry) -> f64 {
    match self {
      Node::Number(v) => *v,
      Node::Constant(c) => consts[*c as usize],
      Node::Neg(a) => -a.eval(consts, entry),
      Node::Binary(op, a, b) => {
        let (a, b) = (a.eval(consts, entry), b.eval(consts, entry));
        match op {
          BinOp::Add => a + b,
          BinOp::Sub => a - b,
          BinOp::Mul => a * b,
          BinOp::Div => a / b,
          BinOp::Pow => a.powf(b),
        }
      }
      Node::Call1(f, a) => {
        let a = a.eval(consts, entry);
        match f {
          Func1::Bits2Qp => entry.bits2qp(a),
          Func1::Qp2Bits => entry.qp2bits(a),
          Func1::Sqrt => a.sqrt(),
          Func1::Exp => a.exp(),
          Func1::Log => a.ln(),
          Func1::Abs => a.abs(),
        }
      }
      Node::Call2(f, a, b) => {
        let (a, b) = (a.eval(consts, entry), b.eval(consts, entry));
        match f {
          Func2::Min => a.min(b),
          Func2::Max => a.max(b),
          Func2::Pow => a.powf(b),
        }
      }
      Node::Sequence(nodes) => {
        nodes.iter().fold(f64::NAN, |_, node| node.eval(consts, entry))
      }
    }
  }
}

fn identifier(input: &str) -> IResult<&str, &str> {
  recognize(pair(alpha1, many0_count(alt((alphanumeric1, tag("_"))))))(input)
}

fn named(input: &str) -> IResult<&str, Node> {
  let (rest, name) = identifier(input)?;
  let (rest, args) =
    opt(delimited(char('('), separated_list1(char(','), expr), char(')')))(
      rest,
    )?;

  let node = match args {
    None => Constant::from_name(name).map(Node::Constant),
    Some(mut args) => match (name, args.len()) {
      (_, 1) => {
        let func = match name {
          "bits2qp" => Some(Func1::Bits2Qp),
          "qp2bits" => Some(Func1::Qp2Bits),
          "sqrt" => Some(Func1::Sqrt),
          "exp" => Some(Func1::Exp),
          "log" => Some(Func1::Log),
          "abs" => Some(Func1::Abs),
          _ => None,
        };
        func.zip(args.pop()).map(|(f, a)| Node::Call1(f, Box::new(a)))
      }
      (_, 2) => {
        let func = match name {
          "min" => Some(Func2::Min),
          "max" => Some(Func2::Max),
          "pow" => Some(Func2::Pow),
          _ => None,
        };
        let b = args.pop();
        let a = args.pop();
        match (func, a, b) {
          (Some(f), Some(a), Some(b)) => {
            Some(Node::Call2(f, Box::new(a), Box::new(b)))
          }
          _ => None,
        }
      }
      _ => None,
    },
  };

  match node {
    Some(node) => Ok((rest, node)),
    None => Err(NomErr::Failure(NomError::from_external_error(
      input,
      ErrorKind::Verify,
      "Unknown constant or function",
    ))),
  }
}

fn primary(input: &str) -> IResult<&str, Node> {
  alt((
    named,
    map(double, Node::Number),
    delimited(char('('), expr, char(')')),
  ))(input)
}

fn signed_primary(input: &str) -> IResult<&str, (bool, Node)> {
  let (input, sign) = opt(one_of("+-"))(input)?;
  let (input, node) = primary(input)?;
  Ok((input, (sign == Some('-'), node)))
}

fn negate_if(negate: bool, node: Node) -> Node {
  if negate {
    Node::Neg(Box::new(node))
  } else {
    node
  }
}

fn factor(input: &str) -> IResult<&str, Node> {
  let (input, (negate, base)) = signed_primary(input)?;
  let (input, exponents) = many0(preceded(char('^'), signed_primary))(input)?;
  let power = exponents.into_iter().fold(base, |acc, (neg, exp)| {
    Node::Binary(BinOp::Pow, Box::new(acc), Box::new(negate_if(neg, exp)))
  });
  Ok((input, negate_if(negate, power)))
}

fn term(input: &str) -> IResult<&str, Node> {
  let (input, first) = factor(input)?;
  let (input, rest) = many0(pair(one_of("*/"), factor))(input)?;
  let node = rest.into_iter().fold(first, |acc, (op, rhs)| {
    let op = if op == '*' { BinOp::Mul } else { BinOp::Div };
    Node::Binary(op, Box::new(acc), Box::new(rhs))
  });
  Ok((input, node))
}

fn sum(input: &str) -> IResult<&str, Node> {
  let (input, first) = term(input)?;
  let (input, rest) = many0(pair(one_of("+-"), term))(input)?;
  let node = rest.into_iter().fold(first, |acc, (op, rhs)| {
    let op = if op == '+' { BinOp::Add } else { BinOp::Sub };
    Node::Binary(op, Box::new(acc), Box::new(rhs))
  });
  Ok((input, node))
}

fn expr(input: &str) -> IResult<&str, Node> {
  let (input, mut sums) = separated_list1(char(';'), sum)(input)?;
  let node = if sums.len() == 1 {
    sums.remove(0)
  } else {
    Node::Sequence(sums)
  };
  Ok((input, node))
}

/// Statistics of a typical P picture, with the constants they yield.
fn nominal_picture() -> ([f64; CONSTANT_COUNT], StatEntry) {
  use self::Constant::*;

  let entry = StatEntry {
    qscale: 236.0,
    i_tex_bits: 20_000,
    p_tex_bits: 60_000,
    mv_bits: 4000,
    misc_bits: 400,
    f_code: 1,
    b_code: 1,
    mc_mb_var_sum: 396 * 300,
    mb_var_sum: 396 * 500,
    i_count: 40,
    ..Default::default()
  };

  let mut consts = [0.0; CONSTANT_COUNT];
  for (c, v) in [
    (Pi, std::f64::consts::PI),
    (E, std::f64::consts::E),
    (ITex, 20_000.0 * 236.0),
    (PTex, 60_000.0 * 236.0),
    (Tex, 80_000.0 * 236.0),
    (Mv, 4000.0 / 396.0),
    (FCode, 1.0),
    (ICount, 40.0 / 396.0),
    (McVar, 300.0),
    (Var, 500.0),
    (IsP, 1.0),
    (AvgQp, 250.0),
    (QComp, 0.5),
    (AvgIITex, 2.0e7),
    (AvgPITex, 5.0e6),
    (AvgPPTex, 1.5e7),
    (AvgBPTex, 8.0e6),
    (AvgTex, 2.0e7),
  ] {
    consts[c as usize] = v;
  }

  (consts, entry)
}

/// A parsed rate equation.
#[derive(Clone, Debug, PartialEq)]
pub struct RateEquation {
  source: String,
  root: Node,
}

impl RateEquation {
  /// Parses `source`.
  ///
  /// # Errors
  ///
  /// Returns `RateControlError::InvalidRateEquation` if the equation is
  /// malformed, names an unknown constant or function, or does not evaluate
  /// to a number on a nominal picture.
  ///
  /// The nominal picture is a P picture of a 396 macroblock grid at
  /// quantizer 2, with distinct texture sizes and running averages. An
  /// equation that is only undefined for other statistics passes here and
  /// fails later with `RateControlError::EquationNaN`.
  pub fn parse(source: &str) -> Result<Self, RateControlError> {
    let invalid = |reason: String| RateControlError::InvalidRateEquation {
      eq: source.to_string(),
      reason,
    };

    let compact: String =
      source.chars().filter(|c| !c.is_whitespace()).collect();
    let (_, root) = all_consuming(expr)(compact.as_str())
      .map_err(|e| invalid(e.to_string()))?;

    let (consts, entry) = nominal_picture();
    if root.eval(&consts, &entry).is_nan() {
      return Err(invalid("evaluates to NaN".to_string()));
    }

    Ok(RateEquation { source: source.to_string(), root })
  }

  /// Evaluates the equation for `entry`, with `consts` holding the values
  /// of the named constants in [`Constant`] order.
  #[inline]
  pub fn eval(&self, consts: &[f64; CONSTANT_COUNT], entry: &StatEntry) -> f64 {
    self.root.eval(consts, entry)
  }

  /// The equation as written by the user.
  pub fn source(&self) -> &str {
    &self.source
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use interpolate_name::interpolate_test;

  fn consts() -> [f64; CONSTANT_COUNT] {
    let mut consts = [0.0; CONSTANT_COUNT];
    for (i, c) in consts.iter_mut().enumerate() {
      *c = i as f64 + 1.0;
    }
    consts[Constant::Pi as usize] = std::f64::consts::PI;
    consts[Constant::E as usize] = std::f64::consts::E;
    consts
  }

  fn eval(source: &str) -> f64 {
    let eq = RateEquation::parse(source).unwrap();
    eq.eval(&consts(), &StatEntry::default())
  }

  #[interpolate_test(add, "1+2", 3.0)]
  #[interpolate_test(precedence, "1+2*3", 7.0)]
  #[interpolate_test(parens, "(1+2)*3", 9.0)]
  #[interpolate_test(subtract_chain, "10-2-3", 5.0)]
  #[interpolate_test(divide_chain, "12/2/3", 2.0)]
  #[interpolate_test(power_left_assoc, "2^3^2", 64.0)]
  #[interpolate_test(negated_power, "-2^2", -4.0)]
  #[interpolate_test(negative_exponent, "2^-1", 0.5)]
  #[interpolate_test(sign_in_term, "3*-2", -6.0)]
  #[interpolate_test(exponent_literal, "1.5e2", 150.0)]
  #[interpolate_test(whitespace, " 1 + 2 * 3 ", 7.0)]
  #[interpolate_test(sequence, "1;2;3", 3.0)]
  #[interpolate_test(functions, "max(sqrt(16),min(2,3))+abs(-1)", 5.0)]
  #[interpolate_test(pow_function, "pow(2,10)", 1024.0)]
  #[interpolate_test(named_constants, "tex*qComp", 5.0 * 15.0)]
  #[interpolate_test(texture_ratio, "(tex-pTex)/(tex-iTex)+1", 1.5)]
  fn evaluates(source: &str, expected: f64) {
    assert!((eval(source) - expected).abs() < 1e-9, "{}", source);
  }

  #[test]
  fn default_equation() {
    let eq = RateEquation::parse("tex^qComp").unwrap();
    let mut consts = [0.0; CONSTANT_COUNT];
    consts[Constant::Tex as usize] = 10_000.0;
    consts[Constant::QComp as usize] = 0.5;
    assert!((eq.eval(&consts, &StatEntry::default()) - 100.0).abs() < 1e-9);
    assert_eq!(eq.source(), "tex^qComp");
  }

  #[test]
  fn entry_bound_functions() {
    let entry = StatEntry {
      qscale: 2.0,
      i_tex_bits: 49,
      p_tex_bits: 50,
      ..Default::default()
    };
    let eq = RateEquation::parse("bits2qp(100)+qp2bits(4)").unwrap();
    assert!((eq.eval(&consts(), &entry) - 52.0).abs() < 1e-9);
  }

  #[test]
  fn constant_names_round_trip() {
    for (name, c) in Constant::NAMES.iter().zip(Constant::ALL.iter()) {
      assert_eq!(Constant::from_name(name), Some(*c));
    }
  }

  #[interpolate_test(empty, "")]
  #[interpolate_test(unknown_constant, "tex^foo")]
  #[interpolate_test(unknown_function, "foo(1)")]
  #[interpolate_test(wrong_arity, "sqrt(1,2)")]
  #[interpolate_test(unbalanced, "(1+2")]
  #[interpolate_test(trailing_operator, "1+")]
  #[interpolate_test(nan, "sqrt(-1)")]
  #[interpolate_test(nan_on_nominal_picture, "log(iTex-pTex)")]
  fn rejects(source: &str) {
    match RateEquation::parse(source) {
      Err(RateControlError::InvalidRateEquation { eq, .. }) => {
        assert_eq!(eq, source)
      }
      other => panic!("unexpected {:?}", other),
    }
  }
}
