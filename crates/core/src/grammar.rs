//! Parameter-property grammar (spec §4.3, §6).
//!
//! A single string describes one or more comma-separated scan entries:
//!
//! ```text
//! d(ref,lo,hi[,steps])   // double
//! f(ref,lo,hi[,steps])   // float
//! i(ref,lo,hi[,steps])   // int32
//! b(ref[,lo,hi[,steps]]) // bool — lo/hi default to false/true
//! ```
//!
//! `ref` names the parameter either by position (`ref` parses as a bare
//! non-negative integer), by a plain identifier (resolved by name at scan
//! setup time), or by `name[index]` into a collection leaf. `steps`
//! defaults to 100 when omitted. Whitespace outside identifiers is
//! insignificant.
//!
//! Hand-written recursive descent: the grammar is four short productions,
//! too small to justify pulling in a parser-combinator crate.

use crate::activity::ValueKind;
use crate::error::MetaError;

/// How a scan entry's `ref` resolves to a concrete leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum RefMode {
    /// `mode = 0`: resolve by absolute position in the streamlined tree.
    Position,
    /// `mode = 1`: resolve by name, then index into that leaf's collection.
    Indexed,
    /// `mode = 2`: resolve by name (scalar leaf, or the first entry of a
    /// collection leaf).
    Name,
}

impl RefMode {
    pub fn code(&self) -> u8 {
        match self {
            RefMode::Position => 0,
            RefMode::Indexed => 1,
            RefMode::Name => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanValue {
    Double(f64),
    Float(f32),
    Int32(i32),
    Bool(bool),
}

/// One parsed scan entry: `{mode, name, pos, lo, hi, n_steps}` per the
/// glossary's "scan spec".
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSpec {
    pub kind: ValueKind,
    pub mode: RefMode,
    pub name: Option<String>,
    pub pos: usize,
    pub lo: ScanValue,
    pub hi: ScanValue,
    pub n_steps: usize,
}

const DEFAULT_STEPS: usize = 100;

struct Cursor<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn err(&self, message: impl Into<String>) -> MetaError {
        MetaError::GrammarError {
            offset: self.pos,
            input: self.input.to_string(),
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), MetaError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(format!("expected {:?}", c as char)))
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.pos < self.bytes.len() && pred(self.bytes[self.pos]) {
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    fn identifier(&mut self) -> Result<&'a str, MetaError> {
        self.skip_ws();
        let start = self.pos;
        let ident = self.take_while(|b| {
            b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'[' | b']')
        });
        if ident.is_empty() {
            self.pos = start;
            return Err(self.err("expected an identifier"));
        }
        Ok(ident)
    }

    fn at_end_of_entry(&mut self) -> bool {
        self.skip_ws();
        matches!(self.peek(), Some(b')') | None)
    }
}

fn parse_ref(token: &str) -> (RefMode, Option<String>, usize) {
    if let Some(open) = token.find('[') {
        if token.ends_with(']') {
            let name = &token[..open];
            let idx_str = &token[open + 1..token.len() - 1];
            if let Ok(idx) = idx_str.parse::<usize>() {
                return (RefMode::Indexed, Some(name.to_string()), idx);
            }
        }
    }
    if let Ok(pos) = token.parse::<usize>() {
        return (RefMode::Position, None, pos);
    }
    (RefMode::Name, Some(token.to_string()), 0)
}

fn parse_f64(cur: &mut Cursor<'_>) -> Result<f64, MetaError> {
    cur.skip_ws();
    let tok = cur.take_while(|b| {
        b.is_ascii_digit() || b == b'-' || b == b'+' || b == b'.' || b == b'e' || b == b'E'
    });
    tok.parse::<f64>()
        .map_err(|_| cur.err(format!("{tok:?} is not a valid number")))
}

fn parse_i32(cur: &mut Cursor<'_>) -> Result<i32, MetaError> {
    cur.skip_ws();
    let tok = cur.take_while(|b| b.is_ascii_digit() || b == b'-' || b == b'+');
    tok.parse::<i32>()
        .map_err(|_| cur.err(format!("{tok:?} is not a valid integer")))
}

fn parse_bool(cur: &mut Cursor<'_>) -> Result<bool, MetaError> {
    cur.skip_ws();
    let tok = cur.take_while(|b| b.is_ascii_alphabetic());
    match tok {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(cur.err(format!("{other:?} is not a valid boolean"))),
    }
}

fn parse_usize(cur: &mut Cursor<'_>) -> Result<usize, MetaError> {
    cur.skip_ws();
    let tok = cur.take_while(|b| b.is_ascii_digit());
    tok.parse::<usize>()
        .map_err(|_| cur.err(format!("{tok:?} is not a valid step count")))
}

fn parse_entry(cur: &mut Cursor<'_>) -> Result<ScanSpec, MetaError> {
    cur.skip_ws();
    let letter = cur.peek().ok_or_else(|| cur.err("expected a kind letter (d/f/i/b)"))?;
    let kind = match letter {
        b'd' => ValueKind::Double,
        b'f' => ValueKind::Float,
        b'i' => ValueKind::Int32,
        b'b' => ValueKind::Bool,
        other => return Err(cur.err(format!("unknown kind letter {:?}", other as char))),
    };
    cur.pos += 1;
    cur.expect(b'(')?;

    let reference = cur.identifier()?;
    let (mode, name, pos) = parse_ref(reference);

    let has_bounds = {
        cur.skip_ws();
        cur.peek() == Some(b',')
    };

    let (lo, hi) = if kind == ValueKind::Bool && !has_bounds {
        (ScanValue::Bool(false), ScanValue::Bool(true))
    } else {
        cur.expect(b',')?;
        let (lo, hi) = match kind {
            ValueKind::Double => {
                let lo = parse_f64(cur)?;
                cur.expect(b',')?;
                let hi = parse_f64(cur)?;
                (ScanValue::Double(lo), ScanValue::Double(hi))
            }
            ValueKind::Float => {
                let lo = parse_f64(cur)? as f32;
                cur.expect(b',')?;
                let hi = parse_f64(cur)? as f32;
                (ScanValue::Float(lo), ScanValue::Float(hi))
            }
            ValueKind::Int32 => {
                let lo = parse_i32(cur)?;
                cur.expect(b',')?;
                let hi = parse_i32(cur)?;
                (ScanValue::Int32(lo), ScanValue::Int32(hi))
            }
            ValueKind::Bool => {
                let lo = parse_bool(cur)?;
                cur.expect(b',')?;
                let hi = parse_bool(cur)?;
                (ScanValue::Bool(lo), ScanValue::Bool(hi))
            }
        };
        (lo, hi)
    };

    let n_steps = if !cur.at_end_of_entry() {
        cur.expect(b',')?;
        parse_usize(cur)?
    } else {
        DEFAULT_STEPS
    };

    cur.expect(b')')?;

    Ok(ScanSpec {
        kind,
        mode,
        name,
        pos,
        lo,
        hi,
        n_steps,
    })
}

/// Parse a full comma-separated property string into its scan specs.
pub fn parse_property_string(input: &str) -> Result<Vec<ScanSpec>, MetaError> {
    let mut cur = Cursor::new(input);
    let mut specs = Vec::new();
    loop {
        cur.skip_ws();
        if cur.pos >= cur.bytes.len() {
            break;
        }
        specs.push(parse_entry(&mut cur)?);
        cur.skip_ws();
        match cur.peek() {
            Some(b',') => {
                cur.pos += 1;
            }
            None => break,
            Some(_) => return Err(cur.err("expected ',' or end of input")),
        }
    }
    if specs.is_empty() {
        return Err(cur.err("property string contained no entries"));
    }
    Ok(specs)
}
