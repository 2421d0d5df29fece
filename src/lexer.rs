//! Lexical analyzer.
//!
//! Turns a whole source unit into a flat token vector ending in `Eof`. The
//! interpreter keeps spans into that vector, so lexing is all-at-once rather
//! than streaming.

use crate::diag::{LexError, LexErrorKind, Position};
use crate::token::{Token, TokenKind};

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: Position,
}

impl Lexer {
    pub fn new(source: &str) -> Lexer {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::with_capacity(self.source.len() / 4 + 1);

        loop {
            self.skip_whitespace();
            if self.at_end() {
                break;
            }
            if self.peek() == Some('/') && self.peek_next() == Some('/') {
                self.skip_comment();
                continue;
            }
            tokens.push(self.next_token()?);
        }

        tokens.push(Token::eof(self.line));
        Ok(tokens)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    /// Consumes the next character if it equals `expected`.
    fn bump_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            if ch == '\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        let ch = match self.peek() {
            Some(ch) => ch,
            None => return Ok(Token::eof(self.line)),
        };

        if ch.is_ascii_digit() {
            return Ok(self.number());
        }
        if ch.is_alphabetic() || ch == '_' {
            return Ok(self.identifier());
        }
        if ch == '"' {
            return self.string();
        }

        let line = self.line;
        self.pos += 1;
        let kind = match ch {
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '.' => {
                if self.bump_if('.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '-' => {
                if self.bump_if('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '=' => {
                if self.bump_if('=') {
                    TokenKind::EqualEqual
                } else if self.bump_if('>') {
                    TokenKind::FatArrow
                } else {
                    TokenKind::Equal
                }
            }
            '!' => {
                if self.bump_if('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.bump_if('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                if self.bump_if('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '&' => {
                if self.bump_if('&') {
                    TokenKind::AndAnd
                } else {
                    return Err(LexError {
                        pos: line,
                        kind: LexErrorKind::LoneAmpersand,
                    });
                }
            }
            '|' => {
                if self.bump_if('|') {
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            _ => {
                return Err(LexError {
                    pos: line,
                    kind: LexErrorKind::UnexpectedChar(ch),
                });
            }
        };
        Ok(Token::of(kind, line))
    }

    fn number(&mut self) -> Token {
        let line = self.line;
        let mut text = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.pos += 1;
            } else if ch == '.' && !has_dot {
                // `0..10` keeps the dots for the range operator, and a dot
                // not followed by a digit is a member access.
                if self.peek_next() == Some('.') {
                    break;
                }
                match self.peek_next() {
                    Some(next) if next.is_ascii_digit() => {
                        has_dot = true;
                        text.push(ch);
                        self.pos += 1;
                    }
                    _ => break,
                }
            } else {
                break;
            }
        }

        Token::new(TokenKind::Number, text, line)
    }

    fn identifier(&mut self) -> Token {
        let line = self.line;
        let mut text = String::new();

        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                text.push(ch);
                self.pos += 1;
            } else {
                break;
            }
        }

        match TokenKind::keyword(&text) {
            Some(kind) => Token::new(kind, text, line),
            None => Token::new(TokenKind::Ident, text, line),
        }
    }

    fn string(&mut self) -> Result<Token, LexError> {
        let start_line = self.line;
        self.pos += 1; // opening quote
        let mut text = String::new();

        loop {
            match self.peek() {
                None => {
                    return Err(LexError {
                        pos: start_line,
                        kind: LexErrorKind::UnterminatedString,
                    });
                }
                Some('"') => break,
                Some('\n') => {
                    return Err(LexError {
                        pos: start_line,
                        kind: LexErrorKind::UnterminatedString,
                    });
                }
                Some('\\') if self.peek_next().is_some() => {
                    self.pos += 1;
                    let escaped = self.bump().unwrap_or('\\');
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        '\\' => text.push('\\'),
                        '"' => text.push('"'),
                        other => text.push(other),
                    }
                }
                Some(ch) => {
                    text.push(ch);
                    self.pos += 1;
                }
            }
        }

        self.pos += 1; // closing quote
        Ok(Token::new(TokenKind::Str, text, start_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scan(input: &str) -> Result<Vec<Token>, LexError> {
        Lexer::new(input).tokenize()
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        scan(input)
            .expect("lexer error")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn fixed_tokens() {
        assert_eq!(
            kinds("+ - * / % ( ) { } [ ] , ; : . |"),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::Comma,
                TokenKind::Semicolon,
                TokenKind::Colon,
                TokenKind::Dot,
                TokenKind::Pipe,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_char_operators_munch_maximally() {
        assert_eq!(
            kinds("== != <= >= && || -> => .."),
            vec![
                TokenKind::EqualEqual,
                TokenKind::BangEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Arrow,
                TokenKind::FatArrow,
                TokenKind::DotDot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn number_then_range() {
        let tokens = scan("0..10").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].lexeme, "0");
        assert_eq!(tokens[1].kind, TokenKind::DotDot);
        assert_eq!(tokens[2].kind, TokenKind::Number);
        assert_eq!(tokens[2].lexeme, "10");
    }

    #[test]
    fn floating_point_literal() {
        let tokens = scan("4.25").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].lexeme, "4.25");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn trailing_dot_is_member_access() {
        let tokens = scan("3.sqrt").unwrap();
        assert_eq!(tokens[0].lexeme, "3");
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].kind, TokenKind::Ident);
    }

    #[test]
    fn keywords() {
        assert_eq!(
            kinds("let fn if else while for in return puts true false struct import try catch throw break continue match case default"),
            vec![
                TokenKind::Let,
                TokenKind::Fn,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::For,
                TokenKind::In,
                TokenKind::Return,
                TokenKind::Puts,
                TokenKind::True,
                TokenKind::False,
                TokenKind::Struct,
                TokenKind::Import,
                TokenKind::Try,
                TokenKind::Catch,
                TokenKind::Throw,
                TokenKind::Break,
                TokenKind::Continue,
                TokenKind::Match,
                TokenKind::Case,
                TokenKind::Default,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reserved_words_lex_to_their_own_kinds() {
        assert_eq!(
            kinds("impl async await from"),
            vec![
                TokenKind::Impl,
                TokenKind::Async,
                TokenKind::Await,
                TokenKind::From,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn identifiers() {
        let tokens = scan("foo _bar t42").unwrap();
        assert_eq!(tokens[0].lexeme, "foo");
        assert_eq!(tokens[1].lexeme, "_bar");
        assert_eq!(tokens[2].lexeme, "t42");
        assert!(tokens[..3].iter().all(|t| t.kind == TokenKind::Ident));
    }

    #[test]
    fn comments_are_ignored() {
        assert_eq!(kinds("true // false\n1"), vec![TokenKind::True, TokenKind::Number, TokenKind::Eof]);
    }

    #[test]
    fn string_escapes() {
        let tokens = scan(r#""a\nb\tc\\d\"e\qf""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].lexeme, "a\nb\tc\\d\"eqf");
    }

    #[test]
    fn interpolation_marker_is_kept_verbatim() {
        let tokens = scan(r#""hi #{name}!""#).unwrap();
        assert_eq!(tokens[0].lexeme, "hi #{name}!");
    }

    #[test]
    fn unterminated_string_at_eof() {
        let err = scan("\"abc").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!(err.pos, 1);
    }

    #[test]
    fn newline_inside_string_is_an_error() {
        let err = scan("\"abc\ndef\"").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
    }

    #[test]
    fn lone_ampersand_is_an_error() {
        let err = scan("1 & 2").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::LoneAmpersand);
    }

    #[test]
    fn unexpected_character_is_an_error() {
        let err = scan("let x = @;").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedChar('@'));
    }

    #[test]
    fn lexer_keeps_track_of_lines() {
        let tokens = scan("1\n2 3\n4").unwrap();
        let lines: Vec<_> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 2, 3, 3]);
    }

    #[test]
    fn ends_with_eof() {
        let tokens = scan("").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    proptest! {
        #[test]
        fn number_literals_roundtrip(d in 0.0f64..1e9) {
            let source = format!("{}", d);
            let tokens = scan(&source).unwrap();
            prop_assert_eq!(tokens.len(), 2);
            prop_assert_eq!(tokens[0].kind, TokenKind::Number);
            let parsed: f64 = tokens[0].lexeme.parse().unwrap();
            prop_assert_eq!(parsed, d);
        }
    }
}
