use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};
use crate::syntax::lexeme::Lexeme;

pub(crate) struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub(crate) fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    pub(crate) fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.node == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if is_ident_start(ch) {
                return self.scan_ident_or_keyword();
            }

            if ch.is_ascii_digit() {
                return self.scan_number();
            }

            if ch == b'%' {
                if let Some(tok) = self.scan_value(start) {
                    return tok;
                }
                continue;
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol returned None → error was recorded, try again
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }

            // `#` comments run to end of line
            if self.pos < self.source.len() && self.source[self.pos] == b'#' {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }

            break;
        }
    }

    fn text(&self, start: usize) -> &'src str {
        // Only ASCII bytes are ever consumed into a token.
        std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("")
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = self.text(start);
        let token = Lexeme::from_keyword(text).unwrap_or_else(|| Lexeme::Ident(text.to_string()));
        self.make_token(token, start, self.pos)
    }

    fn skip_digits(&mut self) -> usize {
        let start = self.pos;
        while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        self.pos - start
    }

    /// Integers, decimals (`2.5`), and exponents (`1e-7`, `2.5e3`). A `.`
    /// followed by another `.` ends the number, so `0..16` lexes as a range.
    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        self.skip_digits();
        let mut is_float = false;

        if self.peek() == Some(b'.') && self.peek_at(1) != Some(b'.') {
            is_float = true;
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if self.skip_digits() == 0 {
                // Not an exponent after all
                self.pos = mark;
            } else {
                is_float = true;
            }
        }

        let text = self.text(start);
        if is_float {
            let value = text.parse::<f64>().unwrap_or(f64::NAN);
            return self.make_token(Lexeme::Float(value), start, self.pos);
        }
        match text.parse::<u64>() {
            Ok(n) => self.make_token(Lexeme::Integer(n), start, self.pos),
            Err(_) => {
                self.diagnostics.push(
                    Diagnostic::error(
                        format!("integer literal '{}' is too large", text),
                        Span::new(start as u32, self.pos as u32),
                    )
                    .with_help(format!("maximum integer value is {}", u64::MAX)),
                );
                self.make_token(Lexeme::Integer(0), start, self.pos)
            }
        }
    }

    fn scan_value(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        self.pos += 1; // skip '%'
        let digits_start = self.pos;
        if self.skip_digits() == 0 {
            self.diagnostics.push(
                Diagnostic::error(
                    "expected a value number after '%'".to_string(),
                    Span::new(start as u32, self.pos as u32),
                )
                .with_help("values are written `%0`, `%1`, ...".to_string()),
            );
            return None;
        }
        match self.text(digits_start).parse::<u32>() {
            Ok(n) => Some(self.make_token(Lexeme::Value(n), start, self.pos)),
            Err(_) => {
                self.diagnostics.push(Diagnostic::error(
                    format!("value number '{}' is too large", self.text(start)),
                    Span::new(start as u32, self.pos as u32),
                ));
                None
            }
        }
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        self.pos += 1;

        let token = match ch {
            b'{' => Lexeme::LBrace,
            b'}' => Lexeme::RBrace,
            b'[' => Lexeme::LBracket,
            b']' => Lexeme::RBracket,
            b',' => Lexeme::Comma,
            b':' => Lexeme::Colon,
            b'=' => Lexeme::Eq,
            b'*' => Lexeme::Star,
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.pos += 1;
                    Lexeme::DotDot
                } else {
                    Lexeme::Dot
                }
            }
            b'+' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Lexeme::PlusEq
                } else {
                    self.diagnostics.push(
                        Diagnostic::error(
                            "unexpected '+'".to_string(),
                            Span::new(start as u32, self.pos as u32),
                        )
                        .with_help("arithmetic is written as `%2 = add %0, %1`".to_string()),
                    );
                    return None;
                }
            }
            b'-' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Lexeme::MinusEq
                } else {
                    Lexeme::Minus
                }
            }
            _ => {
                self.diagnostics.push(
                    Diagnostic::error(
                        format!("unexpected character '{}' (U+{:04X})", ch as char, ch),
                        Span::new(start as u32, self.pos as u32),
                    )
                    .with_help(
                        "this character is not part of the kernel text format".to_string(),
                    ),
                );
                return None;
            }
        };

        Some(self.make_token(token, start, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.source.get(self.pos + ahead).copied()
    }

    fn make_token(&self, token: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(token, Span::new(start as u32, end as u32))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

#[cfg(test)]
mod tests;
