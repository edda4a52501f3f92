//! Syntax tree of a `select` statement.

use crate::entity::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: RangeVariable,
    pub joins: Vec<JoinClause>,
    pub conditions: Vec<Comparison>,
    pub order_by: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// A whole entity, e.g. `select m`.
    Alias { name: String, offset: usize },
    /// A single attribute, e.g. `select m.username`.
    Path(PathExpr),
}

/// `Entity [as] alias` in the from clause.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeVariable {
    pub entity: String,
    pub alias: String,
    pub offset: usize,
}

/// `alias.attribute`
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub alias: String,
    pub attribute: String,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub fetch: bool,
    pub path: PathExpr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOp {
    pub fn sql(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(PathExpr),
    Literal(Value),
    Parameter(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub left: Operand,
    pub op: ComparisonOp,
    pub right: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub path: PathExpr,
    pub descending: bool,
}
