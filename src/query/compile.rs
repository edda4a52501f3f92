//! Validation of a parsed statement against the metamodel and translation
//! to PostgreSQL.

use std::collections::HashMap;

use crate::entity::{Association, AssociationKind, EntityDescriptor, EntityKind, FieldType, Value};
use crate::error::QueryError;

use super::ast::*;

/// A statement ready to run, minus pagination.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    /// Parameter name for each `$n` placeholder, in placeholder order.
    pub parameters: Vec<String>,
    pub selection: Selection,
    pub distinct: bool,
    /// Whether any join, fetched or not, follows a to-many association.
    pub joins_collection: bool,
}

#[derive(Debug, Clone)]
pub enum Selection {
    /// One entity per row, starting at column 0, plus any fetched associations.
    Entity {
        kind: EntityKind,
        fetches: Vec<FetchPlan>,
    },
    /// Scalar attributes.
    Projection { columns: Vec<FieldType> },
}

/// Where a fetch-joined association's columns sit in each row.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub association: &'static Association,
    pub offset: usize,
}

impl CompiledQuery {
    /// Whether a to-many association is fetched, which makes SQL-level
    /// pagination count joined rows instead of root entities.
    pub fn fetches_collection(&self) -> bool {
        match &self.selection {
            Selection::Entity { fetches, .. } => fetches
                .iter()
                .any(|f| f.association.kind == AssociationKind::OneToMany),
            Selection::Projection { .. } => false,
        }
    }

    /// Whether `first_result`/`max_results` must be applied after hydration.
    ///
    /// A collection fetch, or `distinct` over a collection join, repeats the
    /// root entity per joined row, so a SQL window would count rows instead
    /// of results.
    pub fn pages_in_memory(&self) -> bool {
        match &self.selection {
            Selection::Entity { .. } => {
                self.fetches_collection() || (self.distinct && self.joins_collection)
            }
            Selection::Projection { .. } => false,
        }
    }
}

struct AliasBinding {
    descriptor: &'static EntityDescriptor,
    sql_alias: String,
}

struct Compiler {
    aliases: HashMap<String, AliasBinding>,
    parameters: Vec<String>,
}

pub fn compile(stmt: &SelectStatement) -> Result<CompiledQuery, QueryError> {
    let mut compiler = Compiler {
        aliases: HashMap::new(),
        parameters: Vec::new(),
    };
    compiler.compile(stmt)
}

impl Compiler {
    fn compile(&mut self, stmt: &SelectStatement) -> Result<CompiledQuery, QueryError> {
        let root = EntityDescriptor::by_name(&stmt.from.entity).ok_or_else(|| {
            QueryError::at(
                format!("{} is not mapped", stmt.from.entity),
                stmt.from.offset,
            )
        })?;
        let root_alias = self.bind_alias(&stmt.from.alias, root, stmt.from.offset)?;
        let mut from = format!("{} {}", root.table, root_alias);

        // Fetch joins without an alias still need a SQL alias.
        let mut join_aliases = Vec::with_capacity(stmt.joins.len());
        for (index, join) in stmt.joins.iter().enumerate() {
            let association = self.association(&join.path)?;
            let target = association.target.descriptor();
            let name = join
                .alias
                .clone()
                .unwrap_or_else(|| format!("{}#fetch{}", join.path.alias, index));
            let sql_alias = self.bind_alias(&name, target, join.path.offset)?;
            let owner_alias = &self.aliases[&join.path.alias].sql_alias;
            let on = match association.kind {
                AssociationKind::ManyToOne => format!(
                    "{}.id = {}.{}",
                    sql_alias, owner_alias, association.foreign_key
                ),
                AssociationKind::OneToMany => format!(
                    "{}.{} = {}.id",
                    sql_alias, association.foreign_key, owner_alias
                ),
            };
            let keyword = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::Left => "LEFT OUTER JOIN",
            };
            from.push_str(&format!(" {} {} {} ON {}", keyword, target.table, sql_alias, on));
            join_aliases.push((name, association));
        }

        let (select_list, selection) = self.selection(stmt, &join_aliases)?;

        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if stmt.distinct && matches!(selection, Selection::Projection { .. }) {
                "DISTINCT "
            } else {
                ""
            },
            select_list,
            from
        );

        if !stmt.conditions.is_empty() {
            let conditions = stmt
                .conditions
                .iter()
                .map(|c| self.comparison(c))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if !stmt.order_by.is_empty() {
            let items = stmt
                .order_by
                .iter()
                .map(|o| {
                    self.column(&o.path)
                        .map(|(column, _)| if o.descending { format!("{} DESC", column) } else { column })
                })
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }

        Ok(CompiledQuery {
            sql,
            parameters: std::mem::take(&mut self.parameters),
            selection,
            distinct: stmt.distinct,
            joins_collection: join_aliases
                .iter()
                .any(|(_, association)| association.kind == AssociationKind::OneToMany),
        })
    }

    fn bind_alias(
        &mut self,
        name: &str,
        descriptor: &'static EntityDescriptor,
        offset: usize,
    ) -> Result<String, QueryError> {
        if self.aliases.contains_key(name) {
            return Err(QueryError::at(
                format!("identification variable '{}' is declared twice", name),
                offset,
            ));
        }
        let sql_alias = format!("{}{}_", descriptor.table, self.aliases.len());
        self.aliases.insert(
            name.to_string(),
            AliasBinding {
                descriptor,
                sql_alias: sql_alias.clone(),
            },
        );
        Ok(sql_alias)
    }

    fn binding(&self, alias: &str, offset: usize) -> Result<&AliasBinding, QueryError> {
        self.aliases.get(alias).ok_or_else(|| {
            QueryError::at(format!("unknown identification variable '{}'", alias), offset)
        })
    }

    fn association(&self, path: &PathExpr) -> Result<&'static Association, QueryError> {
        let binding = self.binding(&path.alias, path.offset)?;
        binding
            .descriptor
            .association(&path.attribute)
            .ok_or_else(|| {
                QueryError::at(
                    format!(
                        "{} has no association named '{}'",
                        binding.descriptor.name, path.attribute
                    ),
                    path.offset,
                )
            })
    }

    /// Qualified column for `alias.attribute` and its type.
    fn column(&self, path: &PathExpr) -> Result<(String, FieldType), QueryError> {
        let binding = self.binding(&path.alias, path.offset)?;
        let column = binding.descriptor.field(&path.attribute).ok_or_else(|| {
            QueryError::at(
                format!(
                    "{} has no attribute named '{}'",
                    binding.descriptor.name, path.attribute
                ),
                path.offset,
            )
        })?;
        Ok((format!("{}.{}", binding.sql_alias, column.name), column.ty))
    }

    fn selection(
        &self,
        stmt: &SelectStatement,
        joins: &[(String, &'static Association)],
    ) -> Result<(String, Selection), QueryError> {
        if let [SelectItem::Alias { name, offset }] = stmt.items.as_slice() {
            let binding = self.binding(name, *offset)?;
            let mut select_list = binding.descriptor.select_list(Some(&binding.sql_alias));
            let mut width = binding.descriptor.columns.len();
            let mut fetches = Vec::new();

            for (join, (join_alias, association)) in stmt.joins.iter().zip(joins) {
                if !join.fetch {
                    continue;
                }
                if join.path.alias != *name {
                    return Err(QueryError::at(
                        format!(
                            "fetch join of '{}.{}' requires '{}' in the select list",
                            join.path.alias, join.path.attribute, join.path.alias
                        ),
                        join.path.offset,
                    ));
                }
                let target = &self.aliases[join_alias];
                select_list.push_str(", ");
                select_list.push_str(&target.descriptor.select_list(Some(&target.sql_alias)));
                fetches.push(FetchPlan {
                    association: *association,
                    offset: width,
                });
                width += target.descriptor.columns.len();
            }

            return Ok((
                select_list,
                Selection::Entity {
                    kind: binding.descriptor.kind,
                    fetches,
                },
            ));
        }

        if let Some(join) = stmt.joins.iter().find(|j| j.fetch) {
            return Err(QueryError::at(
                "fetch joins require an entity select list",
                join.path.offset,
            ));
        }

        let mut columns = Vec::with_capacity(stmt.items.len());
        let mut types = Vec::with_capacity(stmt.items.len());
        for item in &stmt.items {
            match item {
                SelectItem::Path(path) => {
                    let (column, ty) = self.column(path)?;
                    columns.push(column);
                    types.push(ty);
                }
                SelectItem::Alias { name, offset } => {
                    return Err(QueryError::at(
                        format!("entity '{}' cannot be combined with other select items", name),
                        *offset,
                    ));
                }
            }
        }
        Ok((columns.join(", "), Selection::Projection { columns: types }))
    }

    fn comparison(&mut self, comparison: &Comparison) -> Result<String, QueryError> {
        let left = self.operand(&comparison.left)?;
        let right = self.operand(&comparison.right)?;
        Ok(format!("{} {} {}", left, comparison.op.sql(), right))
    }

    fn operand(&mut self, operand: &Operand) -> Result<String, QueryError> {
        match operand {
            Operand::Path(path) => self.column(path).map(|(column, _)| column),
            Operand::Literal(value) => Ok(literal(value)),
            Operand::Parameter(name) => {
                let position = match self.parameters.iter().position(|p| p == name) {
                    Some(index) => index + 1,
                    None => {
                        self.parameters.push(name.clone());
                        self.parameters.len()
                    }
                };
                Ok(format!("${}", position))
            }
        }
    }
}

/// Inline a literal. Strings stay untyped so PostgreSQL can coerce them to
/// the column type (`m.id = '10'`).
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}
