//! Bytebeat expressions: a tiny arithmetic language over the sample index `t`.
//!
//! Syntax follows JavaScript expression rules so that classic one-liners paste in unchanged:
//!
//! ```text
//! expr    := binary
//! binary  := unary (op unary)*          precedence: * / %  >  + -  >  << >> >>>
//!                                                   >  < <= > >=  >  == !=  >  &  >  ^  >  |
//! unary   := ('-' | '+' | '~' | '!') unary | primary
//! primary := 't' | number | '(' expr ')'
//! ```
//!
//! Evaluation uses JavaScript number semantics: arithmetic in `f64`, `%` is the truncating
//! remainder, bitwise and shift operators go through 32-bit integers, comparisons yield 1 or 0.
//! Division by zero is not an error here; it produces a non-finite value, which the engine
//! treats as a generator fault and plays as silence.
//!
//! The grammar is written with `nom` combinators. Trees deeper than [`MAX_DEPTH`] are
//! rejected at parse time, so evaluation and drop recursion stay bounded on the audio thread.

use core::fmt;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{char, digit1, multispace0, satisfy};
use nom::combinator::{map, not, recognize, value};
use nom::error::{ErrorKind, ParseError as NomParseError};
use nom::sequence::{pair, preceded, terminated};
use nom::IResult;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected character {found:?} at offset {pos}")]
    UnexpectedChar { pos: usize, found: char },
    #[error("invalid number {text:?} at offset {pos}")]
    InvalidNumber { pos: usize, text: String },
    #[error("expected {expected} at offset {pos}")]
    Expected { pos: usize, expected: &'static str },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected trailing input at offset {pos}")]
    Trailing { pos: usize },
    #[error("expression nested deeper than {limit} levels at offset {pos}")]
    TooDeep { pos: usize, limit: usize },
}

impl ParseError {
    /// Byte offset into the source, if the error points at one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            ParseError::UnexpectedChar { pos, .. }
            | ParseError::InvalidNumber { pos, .. }
            | ParseError::Expected { pos, .. }
            | ParseError::Trailing { pos }
            | ParseError::TooDeep { pos, .. } => Some(*pos),
            ParseError::UnexpectedEnd => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    BitNot,
    Not,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    UShr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Xor,
    Or,
}

impl BinOp {
    /// Operators used by [`generate`].
    pub const GENERATED: [BinOp; 10] = [
        BinOp::Shl,
        BinOp::Shr,
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Div,
        BinOp::Rem,
        BinOp::Or,
        BinOp::And,
        BinOp::Xor,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::UShr => ">>>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&",
            BinOp::Xor => "^",
            BinOp::Or => "|",
        }
    }

    /// Binding strength; higher binds tighter. All binary operators are left-associative.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Mul | BinOp::Div | BinOp::Rem => 10,
            BinOp::Add | BinOp::Sub => 9,
            BinOp::Shl | BinOp::Shr | BinOp::UShr => 8,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 7,
            BinOp::Eq | BinOp::Ne => 6,
            BinOp::And => 5,
            BinOp::Xor => 4,
            BinOp::Or => 3,
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Rem => a % b,
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Shl => f64::from(to_int32(a).wrapping_shl(shift_count(b))),
            BinOp::Shr => f64::from(to_int32(a).wrapping_shr(shift_count(b))),
            BinOp::UShr => f64::from(to_uint32(a).wrapping_shr(shift_count(b))),
            BinOp::Lt => truth(a < b),
            BinOp::Le => truth(a <= b),
            BinOp::Gt => truth(a > b),
            BinOp::Ge => truth(a >= b),
            BinOp::Eq => truth(a == b),
            BinOp::Ne => truth(a != b),
            BinOp::And => f64::from(to_int32(a) & to_int32(b)),
            BinOp::Xor => f64::from(to_int32(a) ^ to_int32(b)),
            BinOp::Or => f64::from(to_int32(a) | to_int32(b)),
        }
    }
}

// JavaScript ToUint32: truncate, wrap modulo 2^32; NaN and infinities become 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_uint32(x: f64) -> u32 {
    if !x.is_finite() {
        return 0;
    }
    x.trunc().rem_euclid(4_294_967_296.0) as u32
}

#[allow(clippy::cast_possible_wrap)]
fn to_int32(x: f64) -> i32 {
    to_uint32(x) as i32
}

#[inline]
fn shift_count(x: f64) -> u32 {
    to_uint32(x) & 31
}

#[inline]
fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

/// Parsed expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Time,
    Num(f64),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(src: &str) -> Result<Expr, ParseError> {
        parse_expr(src)
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Evaluate at sample index `t`.
    pub fn eval(&self, t: f64) -> f64 {
        match self {
            Expr::Time => t,
            Expr::Num(n) => *n,
            Expr::Unary(op, e) => {
                let v = e.eval(t);
                match op {
                    UnaryOp::Neg => -v,
                    UnaryOp::Plus => v,
                    UnaryOp::BitNot => f64::from(!to_int32(v)),
                    UnaryOp::Not => truth(v == 0.0 || v.is_nan()),
                }
            }
            Expr::Binary(op, a, b) => op.apply(a.eval(t), b.eval(t)),
        }
    }

    /// Number of nodes, for diagnostics.
    pub fn size(&self) -> usize {
        match self {
            Expr::Time | Expr::Num(_) => 1,
            Expr::Unary(_, e) => 1 + e.size(),
            Expr::Binary(_, a, b) => 1 + a.size() + b.size(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Time => f.write_str("t"),
            Expr::Num(n) => write!(f, "{n}"),
            Expr::Unary(op, e) => {
                let sym = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::BitNot => "~",
                    UnaryOp::Not => "!",
                };
                write!(f, "{sym}{e}")
            }
            Expr::Binary(op, a, b) => write!(f, "({a}{}{b})", op.symbol()),
        }
    }
}

impl core::str::FromStr for Expr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expr::parse(s)
    }
}

/// Random expression tree of exactly `depth` binary levels. Leaves are `t` or an integer
/// literal in `0..256`, each with probability one half.
pub fn generate<R: Rng + ?Sized>(depth: u32, rng: &mut R) -> Expr {
    if depth == 0 {
        return if rng.gen_bool(0.5) { Expr::Time } else { Expr::Num(f64::from(rng.gen_range(0u32..256))) };
    }
    let op = BinOp::GENERATED[rng.gen_range(0..BinOp::GENERATED.len())];
    Expr::binary(op, generate(depth - 1, rng), generate(depth - 1, rng))
}

// ------------------------------------ Parser -------------------------------------

/// Deepest expression tree [`Expr::parse`] accepts. Parentheses count as a level.
pub const MAX_DEPTH: usize = 128;

/// Parsed subtree and its height.
type Node = (Expr, usize);

type PResult<'a, O> = IResult<&'a str, O, Fail<'a>>;

#[derive(Debug)]
struct Fail<'a> {
    at: &'a str,
    kind: FailKind<'a>,
}

#[derive(Debug)]
enum FailKind<'a> {
    Syntax,
    End,
    Unexpected(char),
    Expected(&'static str),
    Number(&'a str),
    TooDeep,
}

impl<'a> NomParseError<&'a str> for Fail<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        Fail { at: input, kind: FailKind::Syntax }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl Fail<'_> {
    fn into_parse_error(self, src: &str) -> ParseError {
        let pos = src.len() - self.at.len();
        match self.kind {
            FailKind::End => ParseError::UnexpectedEnd,
            FailKind::Unexpected(found) => ParseError::UnexpectedChar { pos, found },
            FailKind::Expected(expected) => ParseError::Expected { pos, expected },
            FailKind::Number(text) => ParseError::InvalidNumber { pos, text: text.to_owned() },
            FailKind::TooDeep => ParseError::TooDeep { pos, limit: MAX_DEPTH },
            FailKind::Syntax => match self.at.chars().next() {
                Some(found) => ParseError::UnexpectedChar { pos, found },
                None => ParseError::UnexpectedEnd,
            },
        }
    }
}

fn fail<'a, O>(at: &'a str, kind: FailKind<'a>) -> PResult<'a, O> {
    Err(nom::Err::Failure(Fail { at, kind }))
}

// Characters that can start some token other than `t`.
fn starts_token(c: char) -> bool {
    c.is_ascii_digit() || "().+-*/%<>=!&^|~".contains(c)
}

fn parse_expr(src: &str) -> Result<Expr, ParseError> {
    let (rest, (expr, _)) = match parse_binary(src, 0, 0) {
        Ok(done) => done,
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => return Err(e.into_parse_error(src)),
        Err(nom::Err::Incomplete(_)) => return Err(ParseError::UnexpectedEnd),
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
    match rest.chars().next() {
        None => Ok(expr),
        Some(c) if c == 't' || starts_token(c) => Err(ParseError::Trailing { pos: src.len() - rest.len() }),
        Some(found) => Err(ParseError::UnexpectedChar { pos: src.len() - rest.len(), found }),
    }
}

// Longest symbols first so that `>>>` wins over `>>` and `>`.
fn parse_binop(input: &str) -> PResult<'_, BinOp> {
    preceded(
        multispace0,
        alt((
            value(BinOp::UShr, tag(">>>")),
            value(BinOp::Shl, tag("<<")),
            value(BinOp::Shr, tag(">>")),
            value(BinOp::Le, tag("<=")),
            value(BinOp::Ge, tag(">=")),
            value(BinOp::Eq, tag("==")),
            value(BinOp::Ne, tag("!=")),
            value(BinOp::Mul, char('*')),
            value(BinOp::Div, char('/')),
            value(BinOp::Rem, char('%')),
            value(BinOp::Add, char('+')),
            value(BinOp::Sub, char('-')),
            value(BinOp::Lt, char('<')),
            value(BinOp::Gt, char('>')),
            value(BinOp::And, char('&')),
            value(BinOp::Xor, char('^')),
            value(BinOp::Or, char('|')),
        )),
    )(input)
}

fn parse_unop(input: &str) -> PResult<'_, UnaryOp> {
    alt((
        value(UnaryOp::Neg, char('-')),
        value(UnaryOp::Plus, char('+')),
        value(UnaryOp::BitNot, char('~')),
        value(UnaryOp::Not, terminated(char('!'), not(char('=')))),
    ))(input)
}

// Precedence climbing over nom token parsers. `depth` counts the levels above this subtree.
fn parse_binary(input: &str, min_prec: u8, depth: usize) -> PResult<'_, Node> {
    let (mut input, (mut lhs, mut height)) = parse_unary(input, depth)?;
    while let Ok((after, op)) = parse_binop(input) {
        let prec = op.precedence();
        if prec < min_prec {
            break;
        }
        let (after, (rhs, rhs_height)) = parse_binary(after, prec + 1, depth + 1)?;
        height = height.max(rhs_height) + 1;
        if depth + height > MAX_DEPTH {
            return fail(input, FailKind::TooDeep);
        }
        lhs = Expr::binary(op, lhs, rhs);
        input = after;
    }
    Ok((input, (lhs, height)))
}

fn parse_unary(input: &str, depth: usize) -> PResult<'_, Node> {
    let (input, _) = multispace0(input)?;
    if depth >= MAX_DEPTH {
        return fail(input, FailKind::TooDeep);
    }
    match parse_unop(input) {
        Ok((after, op)) => {
            let (after, (operand, height)) = parse_unary(after, depth + 1)?;
            Ok((after, (Expr::Unary(op, Box::new(operand)), height + 1)))
        }
        Err(_) => parse_primary(input, depth),
    }
}

fn parse_primary(input: &str, depth: usize) -> PResult<'_, Node> {
    let leaf = alt((
        map(parse_time, |()| (Expr::Time, 1)),
        map(parse_number, |n| (Expr::Num(n), 1)),
        |i| parse_parens(i, depth),
    ))(input);
    match leaf {
        Err(nom::Err::Error(_)) => match input.chars().next() {
            None => fail(input, FailKind::End),
            Some(c) if starts_token(c) => fail(input, FailKind::Expected("'t', a number or '('")),
            Some(c) => fail(input, FailKind::Unexpected(c)),
        },
        other => other,
    }
}

fn parse_time(input: &str) -> PResult<'_, ()> {
    value((), terminated(char('t'), not(satisfy(|c| c.is_ascii_alphanumeric() || c == '_'))))(input)
}

// A number token runs over every alphanumeric and `.` so that `12ab` is one bad literal.
fn parse_number(input: &str) -> PResult<'_, f64> {
    let (rest, text) = recognize(pair(
        alt((digit1, recognize(pair(char('.'), digit1)))),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '.'),
    ))(input)?;
    match number_value(text) {
        Some(n) => Ok((rest, n)),
        None => fail(input, FailKind::Number(text)),
    }
}

fn number_value(text: &str) -> Option<f64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(|v| v as f64);
    }
    if text.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return text.parse().ok();
    }
    None
}

fn parse_parens(input: &str, depth: usize) -> PResult<'_, Node> {
    let (input, _) = char('(')(input)?;
    let (input, inner) = parse_binary(input, 0, depth + 1)?;
    let (input, _) = multispace0(input)?;
    match char::<_, Fail<'_>>(')')(input) {
        Ok((rest, _)) => Ok((rest, inner)),
        Err(_) => fail(input, FailKind::Expected("')'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn eval(src: &str, t: f64) -> f64 {
        Expr::parse(src).unwrap().eval(t)
    }

    #[test]
    fn precedence_matches_javascript() {
        assert_eq!(eval("1+2*3", 0.0), 7.0);
        assert_eq!(eval("t>>4&1", 48.0), 1.0);
        assert_eq!(eval("1|2^3&4", 0.0), 3.0);
        assert_eq!(eval("8-2-1", 0.0), 5.0);
        assert_eq!(eval("1<<2+1", 0.0), 8.0);
        assert_eq!(eval("t>100==1", 101.0), 1.0);
    }

    #[test]
    fn javascript_number_semantics() {
        assert_eq!(eval("-1>>>28", 0.0), 15.0);
        assert_eq!(eval("-1>>28", 0.0), -1.0);
        assert_eq!(eval("1<<31", 0.0), -2_147_483_648.0);
        assert_eq!(eval("1<<33", 0.0), 2.0);
        assert_eq!(eval("~0", 0.0), -1.0);
        assert_eq!(eval("-7%3", 0.0), -1.0);
        assert_eq!(eval("7/2", 0.0), 3.5);
        assert_eq!(eval("2.5|0", 0.0), 2.0);
        assert_eq!(eval("0x10", 0.0), 16.0);
        assert!(eval("t/0", 1.0).is_infinite());
        assert!(eval("t%0", 1.0).is_nan());
        assert_eq!(eval("(t/0)|0", 1.0), 0.0);
    }

    #[test]
    fn classic_one_liner() {
        let e = Expr::parse("t*(t>>5|t>>8)").unwrap();
        for t in [0u32, 1, 255, 4096, 100_000] {
            let expected = f64::from(t) * f64::from((t >> 5) | (t >> 8));
            assert_eq!(e.eval(f64::from(t)), expected, "t={t}");
        }
    }

    #[test]
    fn errors_carry_positions() {
        assert_eq!(Expr::parse("t +"), Err(ParseError::UnexpectedEnd));
        assert_eq!(Expr::parse("t)"), Err(ParseError::Trailing { pos: 1 }));
        assert_eq!(Expr::parse("(t"), Err(ParseError::Expected { pos: 2, expected: "')'" }));
        assert_eq!(Expr::parse("t $ 1"), Err(ParseError::UnexpectedChar { pos: 2, found: '$' }));
        assert!(matches!(Expr::parse("12ab"), Err(ParseError::InvalidNumber { pos: 0, .. })));
        assert!(matches!(Expr::parse("tt"), Err(ParseError::UnexpectedChar { pos: 0, found: 't' })));
    }

    #[test]
    fn whitespace_and_operator_prefixes() {
        assert_eq!(eval(" t >>> 1 ", 6.0), 3.0);
        assert_eq!(eval("t<<1<=4", 2.0), 1.0);
        assert_eq!(eval("!t != 1", 0.0), 0.0);
        assert_eq!(eval("- -t", 3.0), 3.0);
        assert_eq!(eval(".5*4", 0.0), 2.0);
        assert_eq!(Expr::parse("t < < 1"), Err(ParseError::Expected { pos: 4, expected: "'t', a number or '('" }));
    }

    #[test]
    fn nesting_is_limited() {
        let deep = format!("{}t{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(Expr::parse(&deep), Err(ParseError::TooDeep { pos: MAX_DEPTH, limit: MAX_DEPTH }));

        let negations = format!("{}t", "-".repeat(200_000));
        assert_eq!(Expr::parse(&negations), Err(ParseError::TooDeep { pos: MAX_DEPTH, limit: MAX_DEPTH }));

        let chain = format!("{}t", "t+".repeat(10_000));
        assert!(matches!(Expr::parse(&chain), Err(ParseError::TooDeep { .. })));

        let fits = format!("{}t{}", "(".repeat(MAX_DEPTH - 1), ")".repeat(MAX_DEPTH - 1));
        assert_eq!(Expr::parse(&fits), Ok(Expr::Time));
    }

    #[test]
    fn generated_expressions_have_requested_depth_and_reparse() {
        let mut rng = StdRng::seed_from_u64(42);
        let e = generate(5, &mut rng);
        assert_eq!(e.size(), 63);
        let text = e.to_string();
        assert!(text.starts_with('('));
        assert_eq!(Expr::parse(&text).unwrap(), e);
    }
}
