// src/io/tokenizer.rs
//
// Line-oriented lexer for the CIF family of grammars. Tokens never span a
// line boundary except for semicolon text fields and triple-quoted strings.

use super::error::{CifError, DiagnosticKind, Diagnostics};
use std::io::BufRead;

/// A decoded data value.
///
/// `.` and `?` are kept apart from text so that "present but empty" can be
/// told from "no more data" (which is `None` at the API level).
#[derive(Debug, Clone, PartialEq)]
pub enum CifValue {
    Text(String),
    /// `.`: the item does not apply to this record.
    Inapplicable,
    /// `?`: the value exists but is not known.
    Unknown,
}

impl CifValue {
    pub fn is_null(&self) -> bool {
        !matches!(self, CifValue::Text(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CifValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_str().and_then(parse_float)
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_str().and_then(parse_int)
    }

    pub fn first_char(&self) -> Option<char> {
        self.as_str().and_then(|s| s.chars().next())
    }
}

/// Parses a CIF number, dropping a trailing standard uncertainty such as
/// the `(12)` in `3.567(12)`.
pub fn parse_float(s: &str) -> Option<f64> {
    let clean = match s.find('(') {
        Some(i) => &s[..i],
        None => s,
    };
    let clean = clean.trim();
    if clean.is_empty() {
        return None;
    }
    clean.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_int(s: &str) -> Option<i32> {
    let clean = match s.find('(') {
        Some(i) => &s[..i],
        None => s,
    };
    let clean = clean.trim();
    clean
        .parse::<i32>()
        .ok()
        .or_else(|| parse_float(clean).filter(|v| v.fract() == 0.0).map(|v| v as i32))
}

/// Returns the standard uncertainty carried by a value, aligned to the last
/// decimal place: `3.567(12)` gives `0.012`, `1.54(3)` gives `0.03`.
pub fn parse_esd(s: &str) -> Option<f64> {
    let open = s.find('(')?;
    let close = s[open..].find(')')? + open;
    let digits = &s[open + 1..close];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let esd: f64 = digits.parse().ok()?;
    let mantissa = &s[..open];
    let decimals = match mantissa.find('.') {
        Some(dot) => mantissa.len() - dot - 1,
        None => 0,
    };
    Some(esd / 10f64.powi(decimals as i32))
}

/// One lexical token with enough context to classify it.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text: String,
    /// Quoted or text-field tokens can never be keys or reserved words.
    pub quoted: bool,
    pub line: usize,
}

impl Token {
    fn reserved(&self, word: &str) -> bool {
        !self.quoted
            && self
                .text
                .get(..word.len())
                .map_or(false, |p| p.eq_ignore_ascii_case(word))
    }

    pub fn is_key(&self) -> bool {
        !self.quoted && self.text.starts_with('_')
    }

    pub fn is_loop(&self) -> bool {
        self.reserved("loop_")
    }

    pub fn is_data_block(&self) -> bool {
        self.reserved("data_")
    }

    pub fn is_save_frame(&self) -> bool {
        self.reserved("save_")
    }

    pub fn is_global(&self) -> bool {
        self.reserved("global_")
    }

    /// True for anything that cannot be row data.
    pub fn is_structural(&self) -> bool {
        self.is_key()
            || self.is_loop()
            || self.is_data_block()
            || self.is_save_frame()
            || self.is_global()
            || self.reserved("stop_")
    }

    pub fn into_value(self) -> CifValue {
        if !self.quoted {
            match self.text.as_str() {
                "." => return CifValue::Inapplicable,
                "?" => return CifValue::Unknown,
                _ => {}
            }
        }
        CifValue::Text(self.text)
    }
}

/// Pull-style tokenizer over any buffered reader.
pub struct Tokenizer<R: BufRead> {
    reader: R,
    raw: Vec<u8>,
    line: String,
    pos: usize,
    line_number: usize,
    eof: bool,
    peeked: Option<Token>,
    diagnostics: Diagnostics,
}

impl<'a> Tokenizer<&'a [u8]> {
    pub fn from_text(text: &'a str) -> Self {
        Tokenizer::new(text.as_bytes())
    }
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            raw: Vec::new(),
            line: String::new(),
            pos: 0,
            line_number: 0,
            eof: false,
            peeked: None,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn line_number(&self) -> usize {
        self.line_number
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    /// Looks at the next token without consuming it.
    pub fn peek(&mut self) -> Result<Option<&Token>, CifError> {
        if self.peeked.is_none() {
            self.peeked = self.scan_token()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Returns a copy of the next token (key or otherwise) without consuming it.
    pub fn peek_key(&mut self) -> Result<Option<Token>, CifError> {
        Ok(self.peek()?.cloned())
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, CifError> {
        match self.peeked.take() {
            Some(t) => Ok(Some(t)),
            None => self.scan_token(),
        }
    }

    /// Consumes one value. `Ok(None)` means the stream is exhausted.
    pub fn consume_value(&mut self) -> Result<Option<CifValue>, CifError> {
        Ok(self.next_token()?.map(Token::into_value))
    }

    // --- Lexing ---

    fn read_line(&mut self) -> Result<bool, CifError> {
        self.line.clear();
        self.pos = 0;
        if self.eof {
            return Ok(false);
        }
        self.raw.clear();
        let n = self.reader.read_until(b'\n', &mut self.raw)?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        while matches!(self.raw.last(), Some(b'\n' | b'\r')) {
            self.raw.pop();
        }
        self.line_number += 1;
        match std::str::from_utf8(&self.raw) {
            Ok(text) => self.line.push_str(text),
            Err(_) => {
                self.line.push_str(&String::from_utf8_lossy(&self.raw));
                self.diagnostics.report(
                    DiagnosticKind::GrammarWarning,
                    self.line_number,
                    "invalid UTF-8 replaced",
                );
            }
        }
        Ok(true)
    }

    fn scan_token(&mut self) -> Result<Option<Token>, CifError> {
        loop {
            let bytes = self.line.as_bytes();
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos >= bytes.len() || bytes[self.pos] == b'#' {
                if !self.read_line()? {
                    return Ok(None);
                }
                continue;
            }

            let b = bytes[self.pos];
            if b == b';' && self.pos == 0 {
                return self.scan_text_field().map(Some);
            }
            if b == b'\'' || b == b'"' {
                let triple = [b, b, b];
                if bytes[self.pos..].starts_with(&triple) {
                    return self.scan_triple_quoted(b).map(Some);
                }
                return Ok(Some(self.scan_quoted(b)));
            }

            let start = self.pos;
            while self.pos < bytes.len() && !bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            return Ok(Some(Token {
                text: self.line[start..self.pos].to_string(),
                quoted: false,
                line: self.line_number,
            }));
        }
    }

    fn scan_quoted(&mut self, quote: u8) -> Token {
        let line = self.line_number;
        let bytes = self.line.as_bytes();
        let start = self.pos + 1;
        let mut i = start;
        while i < bytes.len() {
            // a quote only closes the value when followed by whitespace or EOL
            if bytes[i] == quote && (i + 1 == bytes.len() || bytes[i + 1].is_ascii_whitespace()) {
                let text = self.line[start..i].to_string();
                self.pos = i + 1;
                return Token { text, quoted: true, line };
            }
            i += 1;
        }
        let text = self.line[start..].to_string();
        self.pos = bytes.len();
        self.diagnostics.report(
            DiagnosticKind::GrammarWarning,
            line,
            format!("unterminated quoted value, taking rest of line: {}", text),
        );
        Token { text, quoted: true, line }
    }

    fn scan_triple_quoted(&mut self, quote: u8) -> Result<Token, CifError> {
        let line = self.line_number;
        let delim = [quote, quote, quote];
        let mut text = String::new();
        self.pos += 3;
        loop {
            let rest = &self.line.as_bytes()[self.pos..];
            if let Some(end) = rest.windows(3).position(|w| w == delim) {
                text.push_str(&self.line[self.pos..self.pos + end]);
                self.pos += end + 3;
                return Ok(Token { text, quoted: true, line });
            }
            text.push_str(&self.line[self.pos..]);
            if !self.read_line()? {
                self.diagnostics.report(
                    DiagnosticKind::GrammarWarning,
                    line,
                    "unterminated triple-quoted value at end of input",
                );
                return Ok(Token { text, quoted: true, line });
            }
            text.push('\n');
        }
    }

    fn scan_text_field(&mut self) -> Result<Token, CifError> {
        let line = self.line_number;
        let mut text = self.line[1..].to_string();
        let mut first = true;
        loop {
            if !self.read_line()? {
                self.diagnostics.report(
                    DiagnosticKind::GrammarWarning,
                    line,
                    "unterminated semicolon text field at end of input",
                );
                break;
            }
            if self.line.starts_with(';') {
                self.pos = 1;
                break;
            }
            if !(first && text.trim().is_empty()) {
                text.push('\n');
            } else {
                text.clear();
            }
            first = false;
            text.push_str(&self.line);
        }
        Ok(Token {
            text,
            quoted: true,
            line,
        })
    }
}
