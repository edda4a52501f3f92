//! Recursive-descent parser for the entity query language.

use crate::entity::Value;
use crate::error::QueryError;

use super::ast::*;
use super::lexer::{Lexer, Token, TokenKind};

/// Words that end an optional alias position.
const RESERVED: &[&str] = &[
    "select", "distinct", "from", "as", "join", "inner", "left", "outer", "fetch", "where",
    "and", "order", "by", "asc", "desc",
];

pub fn parse(input: &str) -> Result<SelectStatement, QueryError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let stmt = parser.select_statement()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(QueryError::at(
            format!("unexpected {} after end of statement", trailing.kind.describe()),
            trailing.offset,
        ));
    }
    Ok(stmt)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

// ==================== TOKEN HELPERS ====================

impl Parser {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(s) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), QueryError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", keyword)))
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    /// A non-reserved identifier.
    fn expect_ident(&mut self, what: &str) -> Result<(String, usize), QueryError> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !is_reserved(name) => {
                let name = name.clone();
                let offset = self.advance().offset;
                Ok((name, offset))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn peek_alias_candidate(&self) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if !is_reserved(name))
    }

    fn unexpected(&self, expected: &str) -> QueryError {
        let token = self.peek();
        QueryError::at(
            format!("expected {}, found {}", expected, token.kind.describe()),
            token.offset,
        )
    }
}

// ==================== GRAMMAR ====================

impl Parser {
    fn select_statement(&mut self) -> Result<SelectStatement, QueryError> {
        self.expect_keyword("select")?;
        let distinct = self.eat_keyword("distinct");

        let mut items = vec![self.select_item()?];
        while self.eat(&TokenKind::Comma) {
            items.push(self.select_item()?);
        }

        self.expect_keyword("from")?;
        let from = self.range_variable()?;

        let mut joins = Vec::new();
        while let Some(join) = self.join_clause()? {
            joins.push(join);
        }

        let mut conditions = Vec::new();
        if self.eat_keyword("where") {
            conditions.push(self.comparison()?);
            while self.eat_keyword("and") {
                conditions.push(self.comparison()?);
            }
        }

        let mut order_by = Vec::new();
        if self.eat_keyword("order") {
            self.expect_keyword("by")?;
            order_by.push(self.order_item()?);
            while self.eat(&TokenKind::Comma) {
                order_by.push(self.order_item()?);
            }
        }

        Ok(SelectStatement {
            distinct,
            items,
            from,
            joins,
            conditions,
            order_by,
        })
    }

    fn select_item(&mut self) -> Result<SelectItem, QueryError> {
        let (alias, offset) = self.expect_ident("an identification variable")?;
        if self.eat(&TokenKind::Dot) {
            let (attribute, _) = self.expect_ident("an attribute name")?;
            Ok(SelectItem::Path(PathExpr {
                alias,
                attribute,
                offset,
            }))
        } else {
            Ok(SelectItem::Alias {
                name: alias,
                offset,
            })
        }
    }

    fn range_variable(&mut self) -> Result<RangeVariable, QueryError> {
        let (entity, offset) = self.expect_ident("an entity name")?;
        self.eat_keyword("as");
        let (alias, _) = self.expect_ident("an identification variable")?;
        Ok(RangeVariable {
            entity,
            alias,
            offset,
        })
    }

    fn join_clause(&mut self) -> Result<Option<JoinClause>, QueryError> {
        let kind = if self.eat_keyword("left") {
            self.eat_keyword("outer");
            self.expect_keyword("join")?;
            JoinKind::Left
        } else if self.eat_keyword("inner") {
            self.expect_keyword("join")?;
            JoinKind::Inner
        } else if self.eat_keyword("join") {
            JoinKind::Inner
        } else {
            return Ok(None);
        };

        let fetch = self.eat_keyword("fetch");
        let path = self.path()?;
        let alias = if self.eat_keyword("as") {
            Some(self.expect_ident("an identification variable")?.0)
        } else if self.peek_alias_candidate() {
            Some(self.expect_ident("an identification variable")?.0)
        } else {
            None
        };

        Ok(Some(JoinClause {
            kind,
            fetch,
            path,
            alias,
        }))
    }

    fn path(&mut self) -> Result<PathExpr, QueryError> {
        let (alias, offset) = self.expect_ident("an identification variable")?;
        if !self.eat(&TokenKind::Dot) {
            return Err(self.unexpected("'.'"));
        }
        let (attribute, _) = self.expect_ident("an attribute name")?;
        Ok(PathExpr {
            alias,
            attribute,
            offset,
        })
    }

    fn comparison(&mut self) -> Result<Comparison, QueryError> {
        let left = self.operand()?;
        let op = match self.peek().kind {
            TokenKind::Eq => ComparisonOp::Eq,
            TokenKind::NotEq => ComparisonOp::NotEq,
            TokenKind::Lt => ComparisonOp::Lt,
            TokenKind::LtEq => ComparisonOp::LtEq,
            TokenKind::Gt => ComparisonOp::Gt,
            TokenKind::GtEq => ComparisonOp::GtEq,
            _ => return Err(self.unexpected("a comparison operator")),
        };
        self.advance();
        let right = self.operand()?;
        Ok(Comparison { left, op, right })
    }

    fn operand(&mut self) -> Result<Operand, QueryError> {
        match self.peek().kind.clone() {
            TokenKind::String(s) => {
                self.advance();
                Ok(Operand::Literal(Value::Text(s)))
            }
            TokenKind::Int(v) => {
                self.advance();
                Ok(Operand::Literal(Value::BigInt(v)))
            }
            TokenKind::Param(name) => {
                self.advance();
                Ok(Operand::Parameter(name))
            }
            TokenKind::Ident(_) => Ok(Operand::Path(self.path()?)),
            _ => Err(self.unexpected("a path, literal or parameter")),
        }
    }

    fn order_item(&mut self) -> Result<OrderItem, QueryError> {
        let path = self.path()?;
        let descending = if self.eat_keyword("desc") {
            true
        } else {
            self.eat_keyword("asc");
            false
        };
        Ok(OrderItem { path, descending })
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}
