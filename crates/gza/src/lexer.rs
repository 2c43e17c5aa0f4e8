//! Tokenizes source text (spec §4.1).
//!
//! Recognizes both brace-style and keyword-style syntax keywords, numeric and string
//! literals (with escapes), identifiers, operators, and both comment forms. Grounded on
//! the teacher's recursive-descent `parse.rs` in spirit (position-tracked token stream
//! feeding a hand-written parser) though the grammar itself has no Python analog.

use std::fmt;

use crate::error::{CodeLoc, ParseError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),

    Var,
    Local,
    Function,
    If,
    Then,
    Elseif,
    Else,
    End,
    While,
    Do,
    For,
    In,
    Repeat,
    Until,
    Return,
    Break,
    Continue,
    True,
    False,
    Nil,
    And,
    Or,
    Not,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    DotDot,
    Eq,
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "number {n}"),
            Self::Str(s) => write!(f, "string {s:?}"),
            Self::Ident(s) => write!(f, "identifier '{s}'"),
            Self::Eof => write!(f, "end of input"),
            other => write!(f, "'{other:?}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: CodeLoc,
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "var" => TokenKind::Var,
        "local" => TokenKind::Local,
        "function" => TokenKind::Function,
        "if" => TokenKind::If,
        "then" => TokenKind::Then,
        "elseif" => TokenKind::Elseif,
        "else" => TokenKind::Else,
        "end" => TokenKind::End,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "repeat" => TokenKind::Repeat,
        "until" => TokenKind::Until,
        "return" => TokenKind::Return,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "nil" => TokenKind::Nil,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        _ => return None,
    })
}

/// Converts source text into a token stream. Newlines and `;` are both accepted as
/// statement separators by the parser but are not meaningful to the lexer itself — they
/// are skipped like any other whitespace, the same choice Lua makes, which keeps the
/// grammar separator-insensitive instead of needing automatic-semicolon-insertion rules.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn loc(&self) -> CodeLoc {
        CodeLoc::new(self.line, self.col)
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(byte)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.advance();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    if self.peek_at(2) == Some(b'[') && self.peek_at(3) == Some(b'[') {
                        self.skip_block_comment("--[[", "]]--")?;
                    } else {
                        self.skip_line_comment();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => self.skip_line_comment(),
                Some(b'/') if self.peek_at(1) == Some(b'*') => self.skip_block_comment("/*", "*/")?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(&mut self, open: &str, close: &str) -> Result<(), ParseError> {
        let start = self.loc();
        for _ in 0..open.len() {
            self.advance();
        }
        loop {
            if self.peek().is_none() {
                return Err(ParseError::new(format!("unterminated comment (opened with {open})"), start));
            }
            if self.source[self.pos..].starts_with(close.as_bytes()) {
                for _ in 0..close.len() {
                    self.advance();
                }
                return Ok(());
            }
            self.advance();
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let loc = self.loc();
        let Some(b) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, loc });
        };

        if b.is_ascii_digit() {
            return self.lex_number(loc);
        }
        if b == b'"' || b == b'\'' {
            return self.lex_string(b, loc);
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            return Ok(self.lex_identifier(loc));
        }

        self.lex_operator(loc)
    }

    fn lex_number(&mut self, loc: CodeLoc) -> Result<Token, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b) if b.is_ascii_digit()) {
            self.advance();
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            self.advance();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.advance();
            }
            if matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = save;
            }
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        let value = text
            .parse::<f64>()
            .map_err(|_| ParseError::new(format!("malformed number literal '{text}'"), loc))?;
        Ok(Token {
            kind: TokenKind::Number(value),
            loc,
        })
    }

    fn lex_string(&mut self, quote: u8, loc: CodeLoc) -> Result<Token, ParseError> {
        self.advance();
        let mut out = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err(ParseError::new("unterminated string literal", loc)),
                Some(b) if b == quote => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    out.push(self.lex_escape(loc)?);
                }
                Some(_) => {
                    // Collect one UTF-8 scalar value (non-ASCII bytes are permitted
                    // inside string literals per spec §6).
                    let start = self.pos;
                    let first = self.advance().unwrap();
                    let extra = utf8_extra_bytes(first);
                    for _ in 0..extra {
                        self.advance();
                    }
                    let slice = &self.source[start..self.pos];
                    match std::str::from_utf8(slice) {
                        Ok(s) => out.push_str(s),
                        Err(_) => return Err(ParseError::new("invalid UTF-8 in string literal", loc)),
                    }
                }
            }
        }
        Ok(Token {
            kind: TokenKind::Str(out),
            loc,
        })
    }

    fn lex_escape(&mut self, loc: CodeLoc) -> Result<char, ParseError> {
        let Some(b) = self.advance() else {
            return Err(ParseError::new("unterminated escape sequence", loc));
        };
        Ok(match b {
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'\\' => '\\',
            b'"' => '"',
            b'\'' => '\'',
            b'x' => self.lex_hex_escape(loc, 2)?,
            b'0'..=b'7' => self.lex_octal_escape(b, loc)?,
            other => {
                return Err(ParseError::new(
                    format!("malformed escape sequence '\\{}'", other as char),
                    loc,
                ));
            }
        })
    }

    fn lex_hex_escape(&mut self, loc: CodeLoc, digits: usize) -> Result<char, ParseError> {
        let mut value: u32 = 0;
        for _ in 0..digits {
            let Some(b) = self.peek() else {
                return Err(ParseError::new("malformed hex escape", loc));
            };
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| ParseError::new("malformed hex escape", loc))?;
            value = value * 16 + digit;
            self.advance();
        }
        char::from_u32(value).ok_or_else(|| ParseError::new("hex escape is not a valid character", loc))
    }

    fn lex_octal_escape(&mut self, first: u8, loc: CodeLoc) -> Result<char, ParseError> {
        let mut value = u32::from(first - b'0');
        for _ in 0..2 {
            match self.peek() {
                Some(b @ b'0'..=b'7') => {
                    value = value * 8 + u32::from(b - b'0');
                    self.advance();
                }
                _ => break,
            }
        }
        char::from_u32(value).ok_or_else(|| ParseError::new("octal escape is not a valid character", loc))
    }

    fn lex_identifier(&mut self, loc: CodeLoc) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        let kind = keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_owned()));
        Token { kind, loc }
    }

    fn lex_operator(&mut self, loc: CodeLoc) -> Result<Token, ParseError> {
        let two = |lexer: &mut Self, expect: u8, then: TokenKind, otherwise: TokenKind| {
            lexer.advance();
            if lexer.peek() == Some(expect) {
                lexer.advance();
                then
            } else {
                otherwise
            }
        };
        let b = self.peek().unwrap();
        let kind = match b {
            b'+' => {
                self.advance();
                TokenKind::Plus
            }
            b'-' => {
                self.advance();
                TokenKind::Minus
            }
            b'*' => {
                self.advance();
                TokenKind::Star
            }
            b'/' => {
                self.advance();
                TokenKind::Slash
            }
            b'%' => {
                self.advance();
                TokenKind::Percent
            }
            b'=' => two(self, b'=', TokenKind::EqEq, TokenKind::Eq),
            b'!' => two(self, b'=', TokenKind::NotEq, TokenKind::Bang),
            b'<' => two(self, b'=', TokenKind::Le, TokenKind::Lt),
            b'>' => two(self, b'=', TokenKind::Ge, TokenKind::Gt),
            b'&' if self.peek_at(1) == Some(b'&') => {
                self.advance();
                self.advance();
                TokenKind::AndAnd
            }
            b'|' if self.peek_at(1) == Some(b'|') => {
                self.advance();
                self.advance();
                TokenKind::OrOr
            }
            b'.' if self.peek_at(1) == Some(b'.') => {
                self.advance();
                self.advance();
                TokenKind::DotDot
            }
            b'.' => {
                self.advance();
                TokenKind::Dot
            }
            b',' => {
                self.advance();
                TokenKind::Comma
            }
            b';' => {
                self.advance();
                TokenKind::Semicolon
            }
            b'(' => {
                self.advance();
                TokenKind::LParen
            }
            b')' => {
                self.advance();
                TokenKind::RParen
            }
            b'[' => {
                self.advance();
                TokenKind::LBracket
            }
            b']' => {
                self.advance();
                TokenKind::RBracket
            }
            b'{' => {
                self.advance();
                TokenKind::LBrace
            }
            b'}' => {
                self.advance();
                TokenKind::RBrace
            }
            other => {
                return Err(ParseError::new(format!("unrecognized character '{}'", other as char), loc));
            }
        };
        Ok(Token { kind, loc })
    }
}

/// Number of continuation bytes following a UTF-8 lead byte (0 for ASCII).
fn utf8_extra_bytes(lead: u8) -> usize {
    if lead & 0b1000_0000 == 0 {
        0
    } else if lead & 0b1110_0000 == 0b1100_0000 {
        1
    } else if lead & 0b1111_0000 == 0b1110_0000 {
        2
    } else if lead & 0b1111_1000 == 0b1111_0000 {
        3
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(kinds("42 3.14 1e10 1.5e-3"), vec![
            TokenKind::Number(42.0),
            TokenKind::Number(3.14),
            TokenKind::Number(1e10),
            TokenKind::Number(1.5e-3),
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn lexes_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\t\\\"""#),
            vec![TokenKind::Str("a\nb\t\\\"".to_owned()), TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("\"abc").tokenize().unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn skips_both_comment_styles() {
        assert_eq!(
            kinds("1 -- line\n+ 2 // also line\n + 3 --[[ block ]]-- + /* block */ 4"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Plus,
                TokenKind::Number(3.0),
                TokenKind::Plus,
                TokenKind::Number(4.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(kinds("var x if elseif"), vec![
            TokenKind::Var,
            TokenKind::Ident("x".to_owned()),
            TokenKind::If,
            TokenKind::Elseif,
            TokenKind::Eof,
        ]);
    }
}
