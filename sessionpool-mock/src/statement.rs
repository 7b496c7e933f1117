//! The handful of statements the mock store understands.
//!
//! ```text
//! CREATE TABLE t (a <type>, b <type>, ...)
//! INSERT INTO t VALUES ($1, 'text', 42, NULL, ...)
//! SELECT * | COUNT(*) | a, b FROM t [WHERE col = <expr>]
//! SELECT <expr>, ...
//! DELETE FROM t [WHERE col = <expr>]
//! SLEEP <millis>
//! ```
//!
//! Everything but `SLEEP` is parsed as PostgreSQL by `sqlparser` and then narrowed down to
//! these forms. Column types are required by the grammar but ignored by the store.

use std::time::Duration;

use sessionpool_core::{Arguments, Value};
use sqlparser::ast::{
    self, BinaryOperator, FromTable, ObjectName, SelectItem, SetExpr, TableFactor,
    TableWithJoins, UnaryOperator,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{code, MockError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    CreateTable {
        table: String,
        columns: Vec<String>,
    },
    Insert {
        table: String,
        values: Vec<Expr>,
    },
    Select {
        projection: Projection,
        table: String,
        filter: Option<Filter>,
    },
    /// `SELECT` without `FROM`: one row echoing the expressions.
    Echo(Vec<Expr>),
    Delete {
        table: String,
        filter: Option<Filter>,
    },
    Sleep(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    All,
    Count,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    /// `$n`, 1-based.
    Placeholder(usize),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Filter {
    pub(crate) column: String,
    pub(crate) value: Expr,
}

impl Expr {
    pub(crate) fn eval(&self, arguments: &Arguments) -> Result<Value, MockError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Placeholder(n) => arguments.placeholder(*n).cloned().ok_or_else(|| {
                MockError::new(
                    code::UNDEFINED_PARAMETER,
                    format!("there is no parameter ${n}"),
                )
            }),
        }
    }
}

pub(crate) fn parse(sql: &str) -> Result<Statement, MockError> {
    if let Some(duration) = parse_sleep(sql)? {
        return Ok(Statement::Sleep(duration));
    }

    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| MockError::syntax(e.to_string()))?;

    let statement = match statements.len() {
        1 => statements.remove(0),
        0 => return Err(MockError::syntax("syntax error at end of input")),
        n => {
            return Err(MockError::syntax(format!(
                "expected one statement, found {n}"
            )))
        }
    };

    match statement {
        ast::Statement::CreateTable(create) => Ok(Statement::CreateTable {
            table: table_name(&create.name),
            columns: create
                .columns
                .iter()
                .map(|column| column.name.value.to_ascii_lowercase())
                .collect(),
        }),

        ast::Statement::Insert(insert) => {
            if !insert.columns.is_empty() {
                return Err(unsupported("INSERT with a column list"));
            }

            let rows = match insert.source.as_deref().map(|source| &*source.body) {
                Some(SetExpr::Values(values)) => &values.rows,
                _ => return Err(unsupported("INSERT without VALUES")),
            };

            let [row] = &rows[..] else {
                return Err(unsupported("INSERT of more than one row"));
            };

            Ok(Statement::Insert {
                table: table_name(&insert.table_name),
                values: row.iter().map(expr).collect::<Result<_, _>>()?,
            })
        }

        ast::Statement::Query(query) => {
            let SetExpr::Select(select) = &*query.body else {
                return Err(unsupported("this kind of query"));
            };

            let exprs = &select.projection;

            if select.from.is_empty() {
                if select.selection.is_some() {
                    return Err(unsupported("WHERE without FROM"));
                }

                return exprs
                    .iter()
                    .map(|item| match item {
                        SelectItem::UnnamedExpr(e) => expr(e),
                        other => Err(unsupported(&format!("select item {other}"))),
                    })
                    .collect::<Result<_, _>>()
                    .map(Statement::Echo);
            }

            Ok(Statement::Select {
                projection: projection(exprs)?,
                table: single_table(&select.from)?,
                filter: select.selection.as_ref().map(filter).transpose()?,
            })
        }

        ast::Statement::Delete(delete) => {
            let from = match &delete.from {
                FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => from,
            };

            Ok(Statement::Delete {
                table: single_table(from)?,
                filter: delete.selection.as_ref().map(filter).transpose()?,
            })
        }

        other => Err(unsupported(&other.to_string())),
    }
}

/// `SLEEP <millis>` is not SQL, so it never reaches the parser.
fn parse_sleep(sql: &str) -> Result<Option<Duration>, MockError> {
    let mut words = sql.trim().trim_end_matches(';').split_whitespace();

    match words.next() {
        Some(word) if word.eq_ignore_ascii_case("SLEEP") => {}
        _ => return Ok(None),
    }

    match (words.next().map(str::parse::<u64>), words.next()) {
        (Some(Ok(millis)), None) => Ok(Some(Duration::from_millis(millis))),
        _ => Err(MockError::syntax("expected SLEEP <millis>")),
    }
}

fn unsupported(what: &str) -> MockError {
    MockError::new(
        code::FEATURE_NOT_SUPPORTED,
        format!("not supported by the mock store: {what}"),
    )
}

fn table_name(name: &ObjectName) -> String {
    name.to_string().to_ascii_lowercase()
}

fn single_table(from: &[TableWithJoins]) -> Result<String, MockError> {
    match from {
        [TableWithJoins {
            relation: TableFactor::Table { name, .. },
            joins,
            ..
        }] if joins.is_empty() => Ok(table_name(name)),
        _ => Err(unsupported("anything but a single table in FROM")),
    }
}

fn projection(items: &[SelectItem]) -> Result<Projection, MockError> {
    match items {
        [SelectItem::Wildcard(_)] => Ok(Projection::All),

        [SelectItem::UnnamedExpr(e @ ast::Expr::Function(_))]
            if e.to_string().eq_ignore_ascii_case("COUNT(*)") =>
        {
            Ok(Projection::Count)
        }

        _ => items
            .iter()
            .map(|item| match item {
                SelectItem::UnnamedExpr(ast::Expr::Identifier(ident)) => {
                    Ok(ident.value.to_ascii_lowercase())
                }
                other => Err(unsupported(&format!("select item {other}"))),
            })
            .collect::<Result<_, _>>()
            .map(Projection::Columns),
    }
}

fn filter(selection: &ast::Expr) -> Result<Filter, MockError> {
    match selection {
        ast::Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => match &**left {
            ast::Expr::Identifier(column) => Ok(Filter {
                column: column.value.to_ascii_lowercase(),
                value: expr(right)?,
            }),
            other => Err(unsupported(&format!("comparison with {other}"))),
        },

        other => Err(unsupported(&format!("WHERE {other}"))),
    }
}

fn expr(e: &ast::Expr) -> Result<Expr, MockError> {
    match e {
        ast::Expr::Value(value) => value_expr(value),

        ast::Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match &**inner {
            ast::Expr::Value(ast::Value::Number(number, _)) => {
                number_literal(&format!("-{number}")).map(Expr::Literal)
            }
            other => Err(unsupported(&format!("negation of {other}"))),
        },

        other => Err(unsupported(&format!("expression {other}"))),
    }
}

fn value_expr(value: &ast::Value) -> Result<Expr, MockError> {
    let literal = match value {
        ast::Value::Placeholder(placeholder) => {
            return placeholder
                .strip_prefix('$')
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .map(Expr::Placeholder)
                .ok_or_else(|| {
                    MockError::syntax(format!("invalid placeholder {placeholder}"))
                });
        }

        ast::Value::Number(number, _) => number_literal(number)?,
        ast::Value::SingleQuotedString(text) => Value::Text(text.clone()),
        ast::Value::Boolean(b) => Value::Bool(*b),
        ast::Value::Null => Value::Null,

        other => return Err(unsupported(&format!("literal {other}"))),
    };

    Ok(Expr::Literal(literal))
}

fn number_literal(number: &str) -> Result<Value, MockError> {
    if let Ok(int) = number.parse::<i64>() {
        Ok(Value::Int(int))
    } else if let Ok(float) = number.parse::<f64>() {
        Ok(Value::Float(float))
    } else {
        Err(MockError::syntax(format!("invalid number {number:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_every_form() {
        assert_eq!(
            parse("create table users (id INT, name text);").unwrap(),
            Statement::CreateTable {
                table: "users".into(),
                columns: vec!["id".into(), "name".into()],
            }
        );

        assert_eq!(
            parse("INSERT INTO users VALUES ($1, 'o''brien', -2, NULL)").unwrap(),
            Statement::Insert {
                table: "users".into(),
                values: vec![
                    Expr::Placeholder(1),
                    Expr::Literal(Value::Text("o'brien".into())),
                    Expr::Literal(Value::Int(-2)),
                    Expr::Literal(Value::Null),
                ],
            }
        );

        assert_eq!(
            parse("SELECT name FROM users WHERE id = $1").unwrap(),
            Statement::Select {
                projection: Projection::Columns(vec!["name".into()]),
                table: "users".into(),
                filter: Some(Filter {
                    column: "id".into(),
                    value: Expr::Placeholder(1),
                }),
            }
        );

        assert_eq!(
            parse("SELECT COUNT(*) FROM users").unwrap(),
            Statement::Select {
                projection: Projection::Count,
                table: "users".into(),
                filter: None,
            }
        );

        assert_eq!(
            parse("SELECT $1, 2.5, TRUE").unwrap(),
            Statement::Echo(vec![
                Expr::Placeholder(1),
                Expr::Literal(Value::Float(2.5)),
                Expr::Literal(Value::Bool(true)),
            ])
        );

        assert_eq!(
            parse("DELETE FROM users").unwrap(),
            Statement::Delete {
                table: "users".into(),
                filter: None,
            }
        );

        assert_eq!(
            parse("SLEEP 250").unwrap(),
            Statement::Sleep(Duration::from_millis(250))
        );
    }

    #[test]
    fn it_rejects_malformed_statements() {
        for sql in ["SELECT * FROM", "SELECT $0", "", "SLEEP x", "SLEEP 1 2"] {
            let err = parse(sql).unwrap_err();
            assert_eq!(err.code(), code::SYNTAX_ERROR, "{sql}: {err}");
        }
    }

    #[test]
    fn it_rejects_statements_it_cannot_run() {
        for sql in [
            "UPDATE users SET id = 1",
            "SELECT a FROM t JOIN u ON t.id = u.id",
            "SELECT * FROM t WHERE id > 1",
            "INSERT INTO t VALUES (1), (2)",
        ] {
            let err = parse(sql).unwrap_err();
            assert_eq!(err.code(), code::FEATURE_NOT_SUPPORTED, "{sql}: {err}");
        }
    }

    #[test]
    fn placeholders_are_one_based() {
        let mut arguments = Arguments::new();
        arguments.add(7_i64);

        assert_eq!(Expr::Placeholder(1).eval(&arguments).unwrap(), Value::Int(7));

        let err = Expr::Placeholder(2).eval(&arguments).unwrap_err();
        assert_eq!(err.code(), code::UNDEFINED_PARAMETER);
    }
}
