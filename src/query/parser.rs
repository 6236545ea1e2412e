//! Recursive-descent parser for the query language.
//!
//! Precedence from lowest to highest: `or`, `and`, `not`/`!`, atoms. A
//! query either parses completely or fails with the offset of the first
//! offending token.

use super::ast::IndexQuery;
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{SyntaxError, SyntaxErrorKind};
use crate::literal::{parse_date, Literal};
use crate::types::{normalize_tag, Link, RecordType};

/// Parse query text into a syntax tree.
pub fn parse(text: &str) -> Result<IndexQuery, SyntaxError> {
    let tokens = Lexer::new(text).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.or_expr()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(SyntaxError::new(
            SyntaxErrorKind::UnexpectedToken,
            trailing.offset,
            format!("unexpected {} after complete query", describe(&trailing.kind)),
        ));
    }
    Ok(query)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The token list always ends with Eof, and the parser never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind_at(&self, ahead: usize) -> &TokenKind {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(word) if word.eq_ignore_ascii_case(keyword))
    }

    fn or_expr(&mut self) -> Result<IndexQuery, SyntaxError> {
        let mut left = self.and_expr()?;
        while self.at_keyword("or") {
            self.advance();
            let right = self.and_expr()?;
            left = IndexQuery::or(left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<IndexQuery, SyntaxError> {
        let mut left = self.not_expr()?;
        while self.at_keyword("and") {
            self.advance();
            let right = self.not_expr()?;
            left = IndexQuery::and(left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<IndexQuery, SyntaxError> {
        let negated = match &self.peek().kind {
            TokenKind::Bang => true,
            // `not` followed by an operator is a field called "not"
            TokenKind::Ident(word) if word.eq_ignore_ascii_case("not") => {
                !matches!(self.peek_kind_at(1), TokenKind::Op(_))
            }
            _ => false,
        };
        if negated {
            self.advance();
            return Ok(IndexQuery::negate(self.atom()?));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<IndexQuery, SyntaxError> {
        let token = self.advance();
        match token.kind {
            TokenKind::LParen => {
                let inner = self.or_expr()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            TokenKind::TypeFilter(name) => match RecordType::from_name(&name) {
                Some(record_type) => Ok(IndexQuery::record_type(record_type)),
                None => Err(SyntaxError::new(
                    SyntaxErrorKind::UnknownType,
                    token.offset,
                    format!(
                        "unknown record type '{}', expected one of page, section, block, task, file",
                        name
                    ),
                )),
            },
            TokenKind::Tag(name) => Ok(IndexQuery::tag(normalize_tag(&name))),
            TokenKind::Ident(name) => self.ident_atom(name, token.offset),
            TokenKind::Eof => Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedEnd,
                token.offset,
                "unexpected end of query, expected a filter",
            )),
            other => Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedToken,
                token.offset,
                format!("expected a filter, found {}", describe(&other)),
            )),
        }
    }

    fn ident_atom(&mut self, name: String, offset: usize) -> Result<IndexQuery, SyntaxError> {
        let lower = name.to_lowercase();
        let is_call = self.peek().kind == TokenKind::LParen;

        if is_call {
            match lower.as_str() {
                "path" => {
                    self.advance();
                    let (prefix, _) = self.string_arg()?;
                    self.expect_rparen()?;
                    return Ok(IndexQuery::path(prefix));
                }
                "exists" => {
                    self.advance();
                    let field = self.field_name_arg()?;
                    self.expect_rparen()?;
                    return Ok(IndexQuery::exists(field));
                }
                "linkedto" | "connected" => {
                    self.advance();
                    let target = self.link_arg()?;
                    self.expect_rparen()?;
                    return Ok(if lower == "linkedto" {
                        IndexQuery::linked_to(target)
                    } else {
                        IndexQuery::connected(target)
                    });
                }
                "parentof" | "childof" => {
                    self.advance();
                    let inner = self.or_expr()?;
                    self.expect_rparen()?;
                    return Ok(if lower == "parentof" {
                        IndexQuery::parent_of(inner)
                    } else {
                        IndexQuery::child_of(inner)
                    });
                }
                _ => {}
            }
        }

        if matches!(lower.as_str(), "and" | "or") {
            return Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedToken,
                offset,
                format!("expected a filter, found keyword '{}'", lower),
            ));
        }

        let next = self.advance();
        match next.kind {
            TokenKind::Op(op) => {
                let value = self.literal()?;
                Ok(IndexQuery::field(lower, op, value))
            }
            TokenKind::Eof => Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedEnd,
                next.offset,
                format!("expected a comparison operator after field '{}'", name),
            )),
            other => Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedToken,
                next.offset,
                format!(
                    "expected a comparison operator after field '{}', found {}",
                    name,
                    describe(&other)
                ),
            )),
        }
    }

    fn literal(&mut self) -> Result<Literal, SyntaxError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) => Ok(Literal::String(s)),
            TokenKind::Number(n) => Ok(Literal::Number(n)),
            TokenKind::WikiLink(text) => Ok(Literal::Link(Link::parse(&text))),
            TokenKind::Ident(word) => match word.to_lowercase().as_str() {
                "true" => Ok(Literal::Boolean(true)),
                "false" => Ok(Literal::Boolean(false)),
                "null" => Ok(Literal::Null),
                "date" if self.peek().kind == TokenKind::LParen => {
                    self.advance();
                    let (text, text_offset) = self.string_arg()?;
                    self.expect_rparen()?;
                    parse_date(&text).map(Literal::Date).ok_or_else(|| {
                        SyntaxError::new(
                            SyntaxErrorKind::InvalidLiteral,
                            text_offset,
                            format!("invalid date '{}', expected YYYY-MM-DD", text),
                        )
                    })
                }
                _ => Err(SyntaxError::new(
                    SyntaxErrorKind::UnexpectedToken,
                    token.offset,
                    format!("expected a value, found '{}'", word),
                )),
            },
            TokenKind::Eof => Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedEnd,
                token.offset,
                "unexpected end of query, expected a value",
            )),
            other => Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedToken,
                token.offset,
                format!("expected a value, found {}", describe(&other)),
            )),
        }
    }

    fn string_arg(&mut self) -> Result<(String, usize), SyntaxError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) => Ok((s, token.offset)),
            other => Err(self.unexpected(token.offset, &other, "a quoted string")),
        }
    }

    fn field_name_arg(&mut self) -> Result<String, SyntaxError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Ident(name) => Ok(name.to_lowercase()),
            other => Err(self.unexpected(token.offset, &other, "a field name")),
        }
    }

    fn link_arg(&mut self) -> Result<Link, SyntaxError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(text) | TokenKind::WikiLink(text) => Ok(Link::parse(&text)),
            other => Err(self.unexpected(token.offset, &other, "a string or [[link]]")),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), SyntaxError> {
        let token = self.advance();
        match token.kind {
            TokenKind::RParen => Ok(()),
            other => Err(self.unexpected(token.offset, &other, "')'")),
        }
    }

    fn unexpected(&self, offset: usize, found: &TokenKind, expected: &str) -> SyntaxError {
        if *found == TokenKind::Eof {
            SyntaxError::new(
                SyntaxErrorKind::UnexpectedEnd,
                offset,
                format!("unexpected end of query, expected {}", expected),
            )
        } else {
            SyntaxError::new(
                SyntaxErrorKind::UnexpectedToken,
                offset,
                format!("expected {}, found {}", expected, describe(found)),
            )
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::Bang => "'!'".to_string(),
        TokenKind::TypeFilter(name) => format!("'@{}'", name),
        TokenKind::Tag(name) => format!("'#{}'", name),
        TokenKind::Op(op) => format!("operator '{}'", op),
        TokenKind::Str(s) => format!("string \"{}\"", s),
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::WikiLink(text) => format!("link [[{}]]", text),
        TokenKind::Ident(word) => format!("'{}'", word),
        TokenKind::Eof => "end of query".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CompareOp;

    #[test]
    fn test_precedence() {
        let query = parse("#a or #b and !#c").unwrap();
        assert_eq!(
            query,
            IndexQuery::or(
                IndexQuery::tag("a"),
                IndexQuery::and(IndexQuery::tag("b"), IndexQuery::negate(IndexQuery::tag("c"))),
            )
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let query = parse("@Task AND NOT (#x OR #y)").unwrap();
        assert_eq!(
            query,
            IndexQuery::and(
                IndexQuery::record_type(RecordType::Task),
                IndexQuery::negate(IndexQuery::or(IndexQuery::tag("x"), IndexQuery::tag("y"))),
            )
        );
    }

    #[test]
    fn test_calls() {
        assert_eq!(parse("path(\"Projects/\")").unwrap(), IndexQuery::path("Projects/"));
        assert_eq!(parse("exists(Due)").unwrap(), IndexQuery::exists("due"));
        assert_eq!(
            parse("linkedto([[Home|home page]])").unwrap(),
            IndexQuery::linked_to(Link::file("Home"))
        );
        assert_eq!(
            parse("connected(\"Home#Intro\")").unwrap(),
            IndexQuery::connected(Link::file("Home").with_subpath("Intro"))
        );
        assert_eq!(
            parse("childof(@page and #project)").unwrap(),
            IndexQuery::child_of(IndexQuery::and(
                IndexQuery::record_type(RecordType::Page),
                IndexQuery::tag("project"),
            ))
        );
    }

    #[test]
    fn test_field_literals() {
        assert_eq!(
            parse("priority >= 2").unwrap(),
            IndexQuery::field("priority", CompareOp::Ge, 2)
        );
        assert_eq!(
            parse("done = true").unwrap(),
            IndexQuery::field("done", CompareOp::Eq, true)
        );
        assert_eq!(
            parse("owner != [[People/Ann]]").unwrap(),
            IndexQuery::field("owner", CompareOp::Ne, Link::file("People/Ann"))
        );
        assert_eq!(
            parse("$id = 4").unwrap(),
            IndexQuery::field("$id", CompareOp::Eq, 4)
        );
        assert!(matches!(
            parse("due < date(\"2024-02-01\")").unwrap(),
            IndexQuery::FieldCompare { value: Literal::Date(_), .. }
        ));
        assert_eq!(
            parse("not = 1").unwrap(),
            IndexQuery::field("not", CompareOp::Eq, 1)
        );
    }

    #[test]
    fn test_missing_right_operand() {
        let err = parse("@page and").unwrap_err();
        assert_eq!(err.offset, 9);
        assert_eq!(err.kind, SyntaxErrorKind::UnexpectedEnd);
    }

    #[test]
    fn test_error_offsets() {
        let err = parse("@pages").unwrap_err();
        assert_eq!((err.kind, err.offset), (SyntaxErrorKind::UnknownType, 0));

        let err = parse("#a #b").unwrap_err();
        assert_eq!((err.kind, err.offset), (SyntaxErrorKind::UnexpectedToken, 3));

        let err = parse("(#a or #b").unwrap_err();
        assert_eq!((err.kind, err.offset), (SyntaxErrorKind::UnexpectedEnd, 9));

        let err = parse("priority 3").unwrap_err();
        assert_eq!((err.kind, err.offset), (SyntaxErrorKind::UnexpectedToken, 9));

        let err = parse("@page and or #x").unwrap_err();
        assert_eq!((err.kind, err.offset), (SyntaxErrorKind::UnexpectedToken, 10));

        let err = parse("due = date(\"soon\")").unwrap_err();
        assert_eq!((err.kind, err.offset), (SyntaxErrorKind::InvalidLiteral, 11));

        let err = parse("!!#a").unwrap_err();
        assert_eq!((err.kind, err.offset), (SyntaxErrorKind::UnknownOperator, 0));
    }

    #[test]
    fn test_display_round_trips() {
        for text in [
            "@task and #done",
            "(#a or #b) and !exists(due)",
            "parentof(@task and status = \"x\") or childof(path(\"Daily\"))",
            "linkedto([[Home#Intro]]) and priority < 3",
        ] {
            let query = parse(text).unwrap();
            assert_eq!(parse(&query.to_string()).unwrap(), query, "{}", text);
        }
    }
}
