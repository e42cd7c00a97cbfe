//! Relaxed-JSON ("SJSON") decoder for BeamNG level data.
//!
//! The game writes JSON with a number of extensions: `//` and `/* */`
//! comments, unquoted bareword keys and values, `=` as an alternative
//! key/value separator, commas treated as whitespace and special float
//! tokens for infinities.  The decoder is a hand-written recursive descent
//! scanner with an explicit byte cursor; every sub-parser returns the new
//! cursor position.
//!
//! Many legacy files are newline-delimited record streams rather than one
//! document.  [`decode_records`] handles those with a deliberate best-effort
//! policy: lines that fail to parse are dropped, not reported.

use std::fmt;

use thiserror::Error;

/// A decoded relaxed-JSON value.
///
/// Objects preserve insertion order, matching the order fields appear in
/// the source file.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.as_f64().map(|n| n as f32)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Looks up a field on an object value (first match wins).
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Extracts every number found in this value, recursing into arrays
    /// and scanning strings for embedded numerics ("1 2 3" style fields).
    pub fn to_float_list(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.collect_floats(&mut out);
        out
    }

    fn collect_floats(&self, out: &mut Vec<f64>) {
        match self {
            Value::Number(n) => out.push(*n),
            Value::Bool(b) => out.push(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => out.extend(floats_in_str(s)),
            Value::Array(items) => {
                for item in items {
                    item.collect_floats(out);
                }
            }
            _ => {}
        }
    }
}

/// Scans a string for numeric literals, in order of appearance.
pub fn floats_in_str(s: &str) -> Vec<f64> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_digit()
            || (matches!(c, b'-' | b'+' | b'.')
                && bytes.get(i + 1).is_some_and(|n| n.is_ascii_digit() || *n == b'.'))
        {
            if let Some((value, end)) = match_number(bytes, i) {
                out.push(value);
                i = end;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Error raised by [`decode`], carrying the byte offset of the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} at byte {offset}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnexpectedEnd,
    UnterminatedString,
    InvalidNumber,
    InvalidKey,
    InvalidValue,
    MissingSeparator,
    UnclosedObject,
    UnclosedArray,
    TrailingText,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ParseErrorKind::UnexpectedEnd => "unexpected end of input",
            ParseErrorKind::UnterminatedString => "unterminated string",
            ParseErrorKind::InvalidNumber => "invalid number",
            ParseErrorKind::InvalidKey => "invalid object key",
            ParseErrorKind::InvalidValue => "invalid value",
            ParseErrorKind::MissingSeparator => "missing ':' or '=' after key",
            ParseErrorKind::UnclosedObject => "expected '}'",
            ParseErrorKind::UnclosedArray => "expected ']'",
            ParseErrorKind::TrailingText => "trailing text after value",
        };
        f.write_str(text)
    }
}

fn err(kind: ParseErrorKind, offset: usize) -> ParseError {
    ParseError { kind, offset }
}

/// Decodes a single relaxed-JSON document.
pub fn decode(text: &str) -> Result<Value, ParseError> {
    let bytes = text.as_bytes();
    let i = skip_ws(bytes, 0);
    let (value, i) = parse_value(text, i)?;
    let i = skip_ws(bytes, i);
    if i != bytes.len() {
        return Err(err(ParseErrorKind::TrailingText, i));
    }
    Ok(value)
}

/// Decodes a file that may hold one document or a stream of
/// newline-delimited records.
///
/// A whole-file array flattens to its elements and a whole-file object
/// becomes a single record.  Otherwise each line is parsed independently
/// and unparsable lines are silently dropped; this leniency is deliberate,
/// legacy level data routinely contains half-corrupt record streams.
pub fn decode_records(text: &str) -> Vec<Value> {
    match decode(text) {
        Ok(Value::Array(items)) => return items,
        Ok(obj @ Value::Object(_)) => return vec![obj],
        _ => {}
    }
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| decode(line).ok())
        .collect()
}

fn is_ws(c: u8) -> bool {
    matches!(c, b' ' | b'\r' | b'\n' | b'\t' | b',')
}

fn is_bareword(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'@' | b'$' | b'+' | b'-')
}

/// Advances past whitespace, commas and comments.
fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    let len = bytes.len();
    while i < len {
        let c = bytes[i];
        if is_ws(c) {
            i += 1;
        } else if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            i += 2;
            while i < len && bytes[i] != b'\n' && bytes[i] != b'\r' {
                i += 1;
            }
        } else if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i + 1 < len && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                i += 1;
            }
            i = (i + 2).min(len);
        } else {
            break;
        }
    }
    i
}

/// Matches a numeric literal, returning the value and end offset.
fn match_number(bytes: &[u8], start: usize) -> Option<(f64, usize)> {
    let len = bytes.len();
    let mut i = start;
    if i < len && matches!(bytes[i], b'-' | b'+') {
        i += 1;
    }
    let digits_start = i;
    while i < len && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - digits_start;
    if i < len && bytes[i] == b'.' {
        i += 1;
        while i < len && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i == digits_start {
        return None;
    }
    // Engine-written infinities: 1#INF00 / -1#INF00
    if int_digits > 0 && i < len && bytes[i] == b'#' {
        let mut j = i + 1;
        while j < len && bytes[j].is_ascii_alphanumeric() {
            j += 1;
        }
        if bytes[i + 1..j].eq_ignore_ascii_case(b"INF00") {
            let value = if bytes[start] == b'-' {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            };
            return Some((value, j));
        }
    }
    if i < len && matches!(bytes[i], b'e' | b'E') {
        let mut j = i + 1;
        if j < len && matches!(bytes[j], b'-' | b'+') {
            j += 1;
        }
        let exp_start = j;
        while j < len && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    let text = std::str::from_utf8(&bytes[start..i]).ok()?;
    text.parse::<f64>().ok().map(|value| (value, i))
}

fn parse_string(text: &str, start: usize) -> Result<(String, usize), ParseError> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes[start], b'"');
    let mut i = start + 1;
    let len = bytes.len();
    let mut out = String::new();
    while i < len {
        match bytes[i] {
            b'"' => return Ok((out, i + 1)),
            b'\\' => {
                let esc = *bytes
                    .get(i + 1)
                    .ok_or_else(|| err(ParseErrorKind::UnterminatedString, start))?;
                match esc {
                    b't' => out.push('\t'),
                    b'n' => out.push('\n'),
                    b'f' => out.push('\x0c'),
                    b'r' => out.push('\r'),
                    b'b' => out.push('\x08'),
                    b'u' => {
                        let hex = text
                            .get(i + 2..i + 6)
                            .ok_or_else(|| err(ParseErrorKind::UnterminatedString, start))?;
                        let code = u32::from_str_radix(hex, 16)
                            .map_err(|_| err(ParseErrorKind::UnterminatedString, i))?;
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                        i += 6;
                        continue;
                    }
                    other => out.push(other as char),
                }
                i += 2;
            }
            c if c < 0x80 => {
                out.push(c as char);
                i += 1;
            }
            _ => {
                // Copy a whole multi-byte character.
                let ch = text[i..].chars().next().unwrap_or('\u{fffd}');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    Err(err(ParseErrorKind::UnterminatedString, start))
}

fn parse_bareword(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut i = start;
    while i < bytes.len() && is_bareword(bytes[i]) {
        i += 1;
    }
    if i == start {
        return None;
    }
    let word = std::str::from_utf8(&bytes[start..i]).ok()?.to_string();
    Some((word, i))
}

fn parse_key(text: &str, start: usize) -> Result<(String, usize), ParseError> {
    let bytes = text.as_bytes();
    let i = skip_ws(bytes, start);
    if i >= bytes.len() {
        return Err(err(ParseErrorKind::UnexpectedEnd, i));
    }
    if bytes[i] == b'"' {
        return parse_string(text, i);
    }
    parse_bareword(bytes, i).ok_or_else(|| err(ParseErrorKind::InvalidKey, i))
}

fn parse_value(text: &str, start: usize) -> Result<(Value, usize), ParseError> {
    let bytes = text.as_bytes();
    let i = skip_ws(bytes, start);
    let Some(&c) = bytes.get(i) else {
        return Err(err(ParseErrorKind::UnexpectedEnd, i));
    };
    match c {
        b'{' => parse_object(text, i),
        b'[' => parse_array(text, i),
        b'"' => {
            let (s, end) = parse_string(text, i)?;
            Ok((Value::String(s), end))
        }
        c if c.is_ascii_digit() || matches!(c, b'+' | b'-' | b'.') => {
            // '+'/'-'/'.' may also start a bareword like "-x"; numbers win
            // when they actually parse.
            if let Some((value, end)) = match_number(bytes, i) {
                if end >= bytes.len() || !is_bareword(bytes[end]) {
                    return Ok((Value::Number(value), end));
                }
            }
            let (word, end) =
                parse_bareword(bytes, i).ok_or_else(|| err(ParseErrorKind::InvalidValue, i))?;
            Ok((bareword_value(word), end))
        }
        _ => {
            let (word, end) =
                parse_bareword(bytes, i).ok_or_else(|| err(ParseErrorKind::InvalidValue, i))?;
            Ok((bareword_value(word), end))
        }
    }
}

fn bareword_value(word: String) -> Value {
    match word.as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::String(word),
    }
}

fn parse_object(text: &str, start: usize) -> Result<(Value, usize), ParseError> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes[start], b'{');
    let mut i = skip_ws(bytes, start + 1);
    let mut fields: Vec<(String, Value)> = Vec::new();
    while i < bytes.len() && bytes[i] != b'}' {
        let (key, next) = parse_key(text, i)?;
        i = skip_ws(bytes, next);
        if i < bytes.len() && matches!(bytes[i], b':' | b'=') {
            i += 1;
        } else {
            return Err(err(ParseErrorKind::MissingSeparator, i));
        }
        let (value, next) = parse_value(text, i)?;
        if let Some(slot) = fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            fields.push((key, value));
        }
        i = skip_ws(bytes, next);
    }
    if i >= bytes.len() || bytes[i] != b'}' {
        return Err(err(ParseErrorKind::UnclosedObject, i));
    }
    Ok((Value::Object(fields), i + 1))
}

fn parse_array(text: &str, start: usize) -> Result<(Value, usize), ParseError> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes[start], b'[');
    let mut i = skip_ws(bytes, start + 1);
    let mut items = Vec::new();
    while i < bytes.len() && bytes[i] != b']' {
        let (value, next) = parse_value(text, i)?;
        items.push(value);
        i = skip_ws(bytes, next);
    }
    if i >= bytes.len() || bytes[i] != b']' {
        return Err(err(ParseErrorKind::UnclosedArray, i));
    }
    Ok((Value::Array(items), i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(fields: &[(&str, Value)]) -> Value {
        Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn decodes_strict_json() {
        let text = r#"{"a": 1, "b": [true, null, "x"], "c": {"d": -2.5}}"#;
        let value = decode(text).unwrap();
        assert_eq!(
            value,
            obj(&[
                ("a", Value::Number(1.0)),
                (
                    "b",
                    Value::Array(vec![
                        Value::Bool(true),
                        Value::Null,
                        Value::String("x".into())
                    ])
                ),
                ("c", obj(&[("d", Value::Number(-2.5))])),
            ])
        );
    }

    #[test]
    fn round_trips_serde_json_output() {
        let doc = serde_json::json!({
            "name": "east_coast",
            "squareSize": 2.0,
            "nodes": [[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]],
            "looped": false,
            "missing": null,
        });
        let text = serde_json::to_string_pretty(&doc).unwrap();
        let value = decode(&text).unwrap();
        assert_eq!(value.get("name").unwrap().as_str(), Some("east_coast"));
        assert_eq!(value.get("squareSize").unwrap().as_f64(), Some(2.0));
        assert_eq!(value.get("looped").unwrap().as_bool(), Some(false));
        assert_eq!(value.get("missing"), Some(&Value::Null));
        let nodes = value.get("nodes").unwrap().as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].to_float_list(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn tolerates_comments_and_barewords() {
        let value = decode("{a: 1 // c\n}").unwrap();
        assert_eq!(value, obj(&[("a", Value::Number(1.0))]));

        let value = decode("{a=true,}").unwrap();
        assert_eq!(value, obj(&[("a", Value::Bool(true))]));

        let value = decode("{mat = asphalt_road /* atlas */ , idx = 3}").unwrap();
        assert_eq!(value.get("mat").unwrap().as_str(), Some("asphalt_road"));
        assert_eq!(value.get("idx").unwrap().as_f64(), Some(3.0));
    }

    #[test]
    fn parses_engine_infinities() {
        let value = decode("{a = 1#INF00, b = -1#INF00}").unwrap();
        assert_eq!(value.get("a").unwrap().as_f64(), Some(f64::INFINITY));
        assert_eq!(value.get("b").unwrap().as_f64(), Some(f64::NEG_INFINITY));
    }

    #[test]
    fn errors_carry_offsets() {
        let error = decode("{a: \"oops").unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::UnterminatedString);
        assert_eq!(error.offset, 4);

        let error = decode("{a 1}").unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::MissingSeparator);

        assert!(decode("{a: 1} garbage").is_err());
        assert!(decode("[1, 2").is_err());
    }

    #[test]
    fn record_stream_drops_bad_lines() {
        let text = "{type = oak, pos = [1, 2, 3]}\nnot a record {{{\n{type = pine}\n";
        let records = decode_records(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("type").unwrap().as_str(), Some("oak"));
        assert_eq!(records[1].get("type").unwrap().as_str(), Some("pine"));
    }

    #[test]
    fn whole_file_array_flattens() {
        let records = decode_records("[{a = 1}, {a = 2}]");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn floats_in_str_extracts_in_order() {
        assert_eq!(floats_in_str("1 2.5 -3e1"), vec![1.0, 2.5, -30.0]);
        assert_eq!(floats_in_str("no numbers"), Vec::<f64>::new());
    }
}
