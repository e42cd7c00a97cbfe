//! Parser for C-like object definition scripts (`.cs` / `.mis` files).
//!
//! These scripts declare scene objects with `new Class(Name) { prop = value; }`
//! syntax, optionally nested.  Only declarations matter for import; function
//! bodies, expressions and anything else the tokenizer does not recognize is
//! skipped.  The parser never fails: malformed regions are stepped over one
//! token at a time until the next recognizable declaration.
//!
//! Parsed objects are returned as [`Value`] objects with a `class` field,
//! an optional `name`, and `__parent` naming the enclosing declaration for
//! nested objects.  Children appear before their parent in the output, in
//! source order otherwise.

use crate::sjson::Value;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Sym(char),
    Str(String),
    Num(String),
    Id(String),
}

fn is_id_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_id_part(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn is_bareword(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'@' | b'$' | b'+' | b'-')
}

fn tokenize(text: &str) -> Vec<Tok> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < len {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < len && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i + 1 < len && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                i += 1;
            }
            i = (i + 2).min(len);
            continue;
        }
        if matches!(c, b'(' | b')' | b'{' | b'}' | b';' | b'=' | b':' | b',') {
            toks.push(Tok::Sym(c as char));
            i += 1;
            continue;
        }
        if c == b'"' {
            let (s, end) = scan_string(text, i);
            toks.push(Tok::Str(s));
            i = end;
            continue;
        }
        if let Some(end) = scan_number(bytes, i) {
            toks.push(Tok::Num(text[i..end].to_string()));
            i = end;
            continue;
        }
        if is_id_start(c) {
            let mut j = i + 1;
            while j < len && is_id_part(bytes[j]) {
                j += 1;
            }
            toks.push(Tok::Id(text[i..j].to_string()));
            i = j;
            continue;
        }
        if is_bareword(c) {
            let mut j = i + 1;
            while j < len && is_bareword(bytes[j]) {
                j += 1;
            }
            toks.push(Tok::Id(text[i..j].to_string()));
            i = j;
            continue;
        }
        // Anything else (brackets, operators, stray bytes) becomes a
        // single-char symbol; the parser skips what it does not expect.
        toks.push(Tok::Sym(c as char));
        i += 1;
    }
    toks
}

fn scan_string(text: &str, start: usize) -> (String, usize) {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut out = String::new();
    let mut i = start + 1;
    while i < len {
        match bytes[i] {
            b'"' => return (out, i + 1),
            b'\\' if i + 1 < len => {
                match bytes[i + 1] {
                    b'n' => out.push('\n'),
                    b't' => out.push('\t'),
                    other if other < 0x80 => out.push(other as char),
                    _ => {
                        let ch = text[i + 1..].chars().next().unwrap_or('\u{fffd}');
                        out.push(ch);
                        i += 1 + ch.len_utf8();
                        continue;
                    }
                }
                i += 2;
            }
            c if c < 0x80 => {
                out.push(c as char);
                i += 1;
            }
            _ => {
                let ch = text[i..].chars().next().unwrap_or('\u{fffd}');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    // Unterminated string runs to end of input.
    (out, len)
}

fn scan_number(bytes: &[u8], start: usize) -> Option<usize> {
    let len = bytes.len();
    let mut i = start;
    if i < len && matches!(bytes[i], b'-' | b'+') {
        i += 1;
    }
    let digits_start = i;
    while i < len && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < len && bytes[i] == b'.' && (i > digits_start || bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
        i += 1;
        while i < len && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i == digits_start {
        return None;
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
    Some(i)
}

struct Parser {
    toks: Vec<Tok>,
    i: usize,
    objects: Vec<Value>,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.i)
    }

    fn is_sym(&self, c: char) -> bool {
        matches!(self.peek(), Some(Tok::Sym(s)) if *s == c)
    }

    fn is_decl_keyword(&self) -> bool {
        matches!(self.peek(), Some(Tok::Id(w)) if matches!(w.as_str(), "new" | "singleton" | "datablock"))
    }

    fn skip_until_sym(&mut self, c: char) {
        while self.i < self.toks.len() && !self.is_sym(c) {
            self.i += 1;
        }
        if self.i < self.toks.len() {
            self.i += 1;
        }
    }

    fn parse_value(&mut self) -> Value {
        let Some(tok) = self.peek().cloned() else {
            return Value::Null;
        };
        match tok {
            Tok::Str(s) => {
                self.i += 1;
                Value::String(s)
            }
            Tok::Num(s) => {
                self.i += 1;
                s.parse::<f64>().map(Value::Number).unwrap_or(Value::String(s))
            }
            Tok::Id(word) => {
                self.i += 1;
                match word.as_str() {
                    "true" | "True" => Value::Bool(true),
                    "false" | "False" => Value::Bool(false),
                    "null" | "NULL" => Value::Null,
                    _ => Value::String(word),
                }
            }
            // Vector literal: (x y z) -> array.
            Tok::Sym('(') => self.parse_group('(', ')'),
            Tok::Sym('[') => self.parse_group('[', ']'),
            Tok::Sym(_) => {
                self.i += 1;
                Value::Null
            }
        }
    }

    fn parse_group(&mut self, open: char, close: char) -> Value {
        debug_assert!(self.is_sym(open));
        self.i += 1;
        let mut items = Vec::new();
        while self.i < self.toks.len() && !self.is_sym(close) {
            let item = self.parse_value();
            if item != Value::Null {
                items.push(item);
            }
            if self.is_sym(',') {
                self.i += 1;
            }
        }
        if self.i < self.toks.len() {
            self.i += 1;
        }
        Value::Array(items)
    }

    fn token_word(&mut self) -> Option<String> {
        match self.peek() {
            Some(Tok::Id(w)) => Some(w.clone()),
            Some(Tok::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn parse_object(&mut self, parent_name: Option<&str>) {
        debug_assert!(self.is_decl_keyword());
        self.i += 1;

        let class = self.token_word().unwrap_or_else(|| "SimObject".to_string());
        if self.i < self.toks.len() {
            self.i += 1;
        }

        let mut name = String::new();
        if self.is_sym('(') {
            self.i += 1;
            if let Some(word) = self.token_word() {
                name = word;
                self.i += 1;
                // `(Name : CopySource)` copy sources are ignored.
                if self.is_sym(':') {
                    self.i += 1;
                    if self.i < self.toks.len() {
                        self.i += 1;
                    }
                }
            }
            self.skip_until_sym(')');
        }

        let mut fields: Vec<(String, Value)> = vec![("class".to_string(), Value::String(class))];
        if !name.is_empty() {
            fields.push(("name".to_string(), Value::String(name.clone())));
        }
        if let Some(parent) = parent_name {
            fields.push(("__parent".to_string(), Value::String(parent.to_string())));
        }

        if self.is_sym(';') {
            self.i += 1;
            self.objects.push(Value::Object(fields));
            return;
        }
        if !self.is_sym('{') {
            self.objects.push(Value::Object(fields));
            return;
        }
        self.i += 1;
        let own_name = (!name.is_empty()).then_some(name);
        while self.i < self.toks.len() && !self.is_sym('}') {
            if self.is_decl_keyword() {
                self.parse_object(own_name.as_deref());
                continue;
            }
            if let Some(key) = self.token_word() {
                self.i += 1;
                // Indexed props (`foo[3]`) keep the base name.
                if self.is_sym('[') {
                    self.skip_until_sym(']');
                }
                if self.is_sym('=') {
                    self.i += 1;
                    let value = self.parse_value();
                    self.skip_until_sym(';');
                    if let Some(slot) = fields.iter_mut().find(|(k, _)| *k == key) {
                        slot.1 = value;
                    } else {
                        fields.push((key, value));
                    }
                    continue;
                }
                continue;
            }
            self.i += 1;
        }
        if self.is_sym('}') {
            self.i += 1;
        }
        if self.is_sym(';') {
            self.i += 1;
        }
        self.objects.push(Value::Object(fields));
    }
}

/// Extracts every object declaration from a script.
pub fn parse_objects(text: &str) -> Vec<Value> {
    let mut parser = Parser {
        toks: tokenize(text),
        i: 0,
        objects: Vec::new(),
    };
    while parser.i < parser.toks.len() {
        if parser.is_decl_keyword() {
            parser.parse_object(None);
        } else {
            parser.i += 1;
        }
    }
    parser.objects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_declaration() {
        let text = r#"
            new TSStatic(rock01) {
                shapeName = "art/shapes/rock.dae";
                position = "10 20 0.5";
                scale = "2 2 2";
            };
        "#;
        let objects = parse_objects(text);
        assert_eq!(objects.len(), 1);
        let obj = &objects[0];
        assert_eq!(obj.get("class").unwrap().as_str(), Some("TSStatic"));
        assert_eq!(obj.get("name").unwrap().as_str(), Some("rock01"));
        assert_eq!(
            obj.get("shapeName").unwrap().as_str(),
            Some("art/shapes/rock.dae")
        );
    }

    #[test]
    fn nested_objects_record_parent() {
        let text = r#"
            new SimGroup(MissionGroup) {
                new TSStatic(rock01) { position = "1 2 3"; };
                new TSStatic() { position = "4 5 6"; };
            };
        "#;
        let objects = parse_objects(text);
        assert_eq!(objects.len(), 3);
        // Children come first, parent last.
        assert_eq!(
            objects[0].get("__parent").unwrap().as_str(),
            Some("MissionGroup")
        );
        assert_eq!(
            objects[1].get("__parent").unwrap().as_str(),
            Some("MissionGroup")
        );
        assert!(objects[1].get("name").is_none());
        assert_eq!(objects[2].get("name").unwrap().as_str(), Some("MissionGroup"));
        assert!(objects[2].get("__parent").is_none());
    }

    #[test]
    fn copy_source_is_ignored() {
        let objects = parse_objects("datablock DecalData(Crack01 : CrackBase) { frame = 2; };");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].get("name").unwrap().as_str(), Some("Crack01"));
        assert_eq!(objects[0].get("frame").unwrap().as_f64(), Some(2.0));
    }

    #[test]
    fn vector_literals_become_arrays() {
        let objects = parse_objects("new WaterPlane(w) { baseColor = (0.1 0.2 0.8); };");
        assert_eq!(
            objects[0].get("baseColor").unwrap(),
            &Value::Array(vec![
                Value::Number(0.1),
                Value::Number(0.2),
                Value::Number(0.8)
            ])
        );
    }

    #[test]
    fn indexed_props_and_junk_are_skipped() {
        let text = r#"
            function doStuff(%a) { echo(%a + 1); }
            new GroundCover(gc) {
                billboardUVs[3] = "0 0 1 1";
                probability = 0.5;
            };
        "#;
        let objects = parse_objects(text);
        assert_eq!(objects.len(), 1);
        assert_eq!(
            objects[0].get("billboardUVs").unwrap().as_str(),
            Some("0 0 1 1")
        );
        assert_eq!(objects[0].get("probability").unwrap().as_f64(), Some(0.5));
    }

    #[test]
    fn bodyless_declaration_survives() {
        let objects = parse_objects("new ScatterSky(sky);");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].get("class").unwrap().as_str(), Some("ScatterSky"));
    }
}
