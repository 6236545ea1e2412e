//! Tokenizer for the query language.

use super::ast::CompareOp;
use crate::error::{SyntaxError, SyntaxErrorKind};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenKind {
    LParen,
    RParen,
    Bang,
    /// `@name`; the name is validated by the parser.
    TypeFilter(String),
    /// `#tag`, without the `#`.
    Tag(String),
    Op(CompareOp),
    Str(String),
    Number(f64),
    /// Inner text of `[[...]]`.
    WikiLink(String),
    Ident(String),
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character of the token.
    pub offset: usize,
}

const OPERATOR_CHARS: &[char] = &['=', '!', '<', '>', '~', '&', '|', '^', '%', '*', '+'];

pub(crate) struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn next_token(&mut self) -> Result<Token, SyntaxError> {
        self.take_while(char::is_whitespace);
        let offset = self.pos;
        let token = |kind| Ok(Token { kind, offset });

        let Some(c) = self.peek() else {
            return token(TokenKind::Eof);
        };

        match c {
            '(' => {
                self.bump();
                token(TokenKind::LParen)
            }
            ')' => {
                self.bump();
                token(TokenKind::RParen)
            }
            '@' => {
                self.bump();
                let name = self.take_while(is_ident_char);
                if name.is_empty() {
                    return Err(SyntaxError::new(
                        SyntaxErrorKind::UnexpectedToken,
                        offset,
                        "expected a record type after '@'",
                    ));
                }
                token(TokenKind::TypeFilter(name.to_string()))
            }
            '#' => {
                self.bump();
                let tag = self.take_while(is_tag_char);
                if tag.is_empty() {
                    return Err(SyntaxError::new(
                        SyntaxErrorKind::UnexpectedToken,
                        offset,
                        "expected a tag name after '#'",
                    ));
                }
                token(TokenKind::Tag(tag.to_string()))
            }
            '"' | '\'' => self.string(c).map(|s| Token {
                kind: TokenKind::Str(s),
                offset,
            }),
            '[' => {
                if self.peek_second() != Some('[') {
                    return Err(SyntaxError::new(
                        SyntaxErrorKind::UnexpectedToken,
                        offset,
                        "expected '[[' to start a link",
                    ));
                }
                self.pos += 2;
                match self.input[self.pos..].find("]]") {
                    Some(end) => {
                        let inner = &self.input[self.pos..self.pos + end];
                        self.pos += end + 2;
                        token(TokenKind::WikiLink(inner.to_string()))
                    }
                    None => Err(SyntaxError::new(
                        SyntaxErrorKind::UnterminatedLink,
                        offset,
                        "link is missing its closing ']]'",
                    )),
                }
            }
            c if OPERATOR_CHARS.contains(&c) => {
                let symbol = self.take_while(|c| OPERATOR_CHARS.contains(&c));
                if symbol == "!" {
                    return token(TokenKind::Bang);
                }
                match CompareOp::from_symbol(symbol) {
                    Some(op) => token(TokenKind::Op(op)),
                    None => Err(SyntaxError::new(
                        SyntaxErrorKind::UnknownOperator,
                        offset,
                        format!("unknown operator '{}'", symbol),
                    )),
                }
            }
            c if c.is_ascii_digit()
                || (c == '-' && self.peek_second().is_some_and(|n| n.is_ascii_digit() || n == '.')) =>
            {
                self.number().map(|n| Token {
                    kind: TokenKind::Number(n),
                    offset,
                })
            }
            c if is_ident_start(c) => {
                self.bump();
                self.take_while(is_ident_char);
                token(TokenKind::Ident(self.input[offset..self.pos].to_string()))
            }
            other => Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedToken,
                offset,
                format!("unexpected character '{}'", other),
            )),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, SyntaxError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(SyntaxError::new(
                        SyntaxErrorKind::UnterminatedString,
                        start,
                        "string is missing its closing quote",
                    ))
                }
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(escaped) => out.push(escaped),
                    None => {
                        return Err(SyntaxError::new(
                            SyntaxErrorKind::UnterminatedString,
                            start,
                            "string is missing its closing quote",
                        ))
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<f64, SyntaxError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        self.take_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            self.bump();
            self.take_while(|c| c.is_ascii_digit());
        }
        // A number running straight into letters is not a number.
        self.take_while(is_ident_char);
        let text = &self.input[start..self.pos];
        text.parse::<f64>().map_err(|_| {
            SyntaxError::new(
                SyntaxErrorKind::InvalidLiteral,
                start,
                format!("invalid number '{}'", text),
            )
        })
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '/'
}
