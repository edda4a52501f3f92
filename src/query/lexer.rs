//! Tokenizer for the entity query language.

use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifiers and keywords; keywords are matched case-insensitively by
    /// the parser.
    Ident(String),
    String(String),
    Int(i64),
    /// Named parameter, without the leading colon.
    Param(String),

    Comma,
    Dot,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) => format!("'{}'", s),
            TokenKind::String(s) => format!("string '{}'", s),
            TokenKind::Int(v) => format!("number {}", v),
            TokenKind::Param(p) => format!("parameter :{}", p),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Eq => "'='".to_string(),
            TokenKind::NotEq => "'<>'".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::LtEq => "'<='".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::GtEq => "'>='".to_string(),
            TokenKind::Eof => "end of query".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, QueryError> {
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

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.input[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek_char().is_some_and(&pred) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn next_token(&mut self) -> Result<Token, QueryError> {
        self.skip_whitespace();
        let offset = self.pos;
        let token = |kind| Ok(Token { kind, offset });

        let c = match self.peek_char() {
            Some(c) => c,
            None => return token(TokenKind::Eof),
        };

        if is_ident_start(c) {
            let ident = self.take_while(is_ident_continue);
            return token(TokenKind::Ident(ident.to_string()));
        }

        if c.is_ascii_digit() || (c == '-' && self.peek_second().is_some_and(|d| d.is_ascii_digit())) {
            return self.number(offset);
        }

        self.bump();
        match c {
            ',' => token(TokenKind::Comma),
            '.' => token(TokenKind::Dot),
            '=' => token(TokenKind::Eq),
            '!' if self.peek_char() == Some('=') => {
                self.bump();
                token(TokenKind::NotEq)
            }
            '<' => match self.peek_char() {
                Some('=') => {
                    self.bump();
                    token(TokenKind::LtEq)
                }
                Some('>') => {
                    self.bump();
                    token(TokenKind::NotEq)
                }
                _ => token(TokenKind::Lt),
            },
            '>' => {
                if self.peek_char() == Some('=') {
                    self.bump();
                    token(TokenKind::GtEq)
                } else {
                    token(TokenKind::Gt)
                }
            }
            ':' => {
                let name = self.take_while(is_ident_continue);
                if name.is_empty() {
                    return Err(QueryError::at("expected parameter name after ':'", offset));
                }
                token(TokenKind::Param(name.to_string()))
            }
            '\'' => self.string(offset),
            other => Err(QueryError::at(format!("unexpected character '{}'", other), offset)),
        }
    }

    fn number(&mut self, offset: usize) -> Result<Token, QueryError> {
        let start = self.pos;
        if self.peek_char() == Some('-') {
            self.bump();
        }
        self.take_while(|c| c.is_ascii_digit());
        let text = &self.input[start..self.pos];
        let value = text
            .parse::<i64>()
            .map_err(|_| QueryError::at(format!("integer literal out of range: {}", text), offset))?;
        Ok(Token {
            kind: TokenKind::Int(value),
            offset,
        })
    }

    /// Single-quoted string; a doubled quote stands for one quote.
    fn string(&mut self, offset: usize) -> Result<Token, QueryError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('\'') if self.peek_char() == Some('\'') => {
                    self.bump();
                    value.push('\'');
                }
                Some('\'') => {
                    return Ok(Token {
                        kind: TokenKind::String(value),
                        offset,
                    })
                }
                Some(c) => value.push(c),
                None => return Err(QueryError::at("unterminated string literal", offset)),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
