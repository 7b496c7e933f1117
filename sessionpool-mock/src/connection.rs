use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::sync::Arc;

use futures_core::future::BoxFuture;
use sessionpool_core::connection::Connection;
use sessionpool_core::rt;
use sessionpool_core::{
    Arguments, Columns, DatabaseError, Error, Outcome, QueryResult, Row, Value,
};

use crate::database::{Event, MockDatabase, State, Table};
use crate::error::{code, MockError};
use crate::statement::{self, Filter, Projection, Statement};

/// One session with a [`MockDatabase`].
///
/// Outside a transaction every statement commits immediately. Inside one, writes are kept
/// on the connection and only become visible to other connections on commit.
pub struct MockConnection {
    db: MockDatabase,
    id: u64,
    transaction: Option<Vec<Write>>,
    valid: bool,
}

/// A change recorded by an open transaction.
#[derive(Debug, Clone)]
enum Write {
    CreateTable {
        table: String,
        columns: Vec<String>,
    },
    Insert {
        table: String,
        row: Vec<Value>,
    },
    Delete {
        table: String,
        filter: Option<(usize, Value)>,
    },
}

impl MockConnection {
    pub(crate) fn new(db: MockDatabase, id: u64) -> Self {
        Self {
            db,
            id,
            transaction: None,
            valid: true,
        }
    }

    /// The id the mock store gave this connection; it tags every [`Event`] it journals.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` while a transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn database(&self) -> &MockDatabase {
        &self.db
    }

    fn journal(&self, event: Event) {
        self.db.shared.state.lock().journal.push(event);
    }

    fn check_valid(&self) -> Result<(), Error> {
        if self.valid {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection was terminated").into())
        }
    }

    /// Run a parsed statement against the committed tables plus this connection's own writes.
    fn execute(
        &mut self,
        state: &mut State,
        statement: Statement,
        arguments: &Arguments,
    ) -> Result<Outcome, MockError> {
        let (outcome, write) = {
            let view = self.view(&state.tables)?;

            match statement {
                Statement::CreateTable { table, columns } => {
                    if view.contains_key(&table) {
                        return Err(MockError::new(
                            code::DUPLICATE_TABLE,
                            format!("relation \"{table}\" already exists"),
                        ));
                    }

                    (
                        Outcome::new(Vec::new(), QueryResult::new("CREATE TABLE", 0)),
                        Some(Write::CreateTable { table, columns }),
                    )
                }

                Statement::Insert { table, values } => {
                    let existing = lookup(&view, &table)?;

                    if values.len() != existing.columns.len() {
                        return Err(MockError::syntax(format!(
                            "INSERT has {} expressions but \"{table}\" has {} columns",
                            values.len(),
                            existing.columns.len()
                        )));
                    }

                    let row = values
                        .iter()
                        .map(|expr| expr.eval(arguments))
                        .collect::<Result<Vec<_>, _>>()?;

                    (
                        Outcome::new(Vec::new(), QueryResult::new("INSERT", 1)),
                        Some(Write::Insert { table, row }),
                    )
                }

                Statement::Select {
                    projection,
                    table,
                    filter,
                } => {
                    let existing = lookup(&view, &table)?;
                    let filter = resolve_filter(existing, filter.as_ref(), arguments)?;

                    let matching = existing
                        .rows
                        .iter()
                        .filter(|row| matches_filter(row, filter.as_ref()));

                    let rows: Vec<Row> = match projection {
                        Projection::All => matching
                            .map(|row| Row::new(Arc::clone(&existing.columns), row.clone()))
                            .collect(),

                        Projection::Count => {
                            let count = matching.count() as i64;
                            let columns = Arc::new(Columns::new(["count"]));

                            vec![Row::new(columns, vec![Value::Int(count)])]
                        }

                        Projection::Columns(names) => {
                            let indices = names
                                .iter()
                                .map(|name| column_index(existing, name))
                                .collect::<Result<Vec<_>, _>>()?;

                            let columns = Arc::new(Columns::new(names));

                            matching
                                .map(|row| {
                                    let values = indices.iter().map(|&i| row[i].clone()).collect();
                                    Row::new(Arc::clone(&columns), values)
                                })
                                .collect()
                        }
                    };

                    let returned = rows.len() as u64;

                    (
                        Outcome::new(rows, QueryResult::new("SELECT", returned)),
                        None,
                    )
                }

                Statement::Echo(exprs) => {
                    let values = exprs
                        .iter()
                        .map(|expr| expr.eval(arguments))
                        .collect::<Result<Vec<_>, _>>()?;

                    let columns = Arc::new(Columns::new(vec!["?column?"; values.len()]));

                    (
                        Outcome::new(
                            vec![Row::new(columns, values)],
                            QueryResult::new("SELECT", 1),
                        ),
                        None,
                    )
                }

                Statement::Delete { table, filter } => {
                    let existing = lookup(&view, &table)?;
                    let filter = resolve_filter(existing, filter.as_ref(), arguments)?;

                    let deleted = existing
                        .rows
                        .iter()
                        .filter(|row| matches_filter(row, filter.as_ref()))
                        .count() as u64;

                    (
                        Outcome::new(Vec::new(), QueryResult::new("DELETE", deleted)),
                        Some(Write::Delete { table, filter }),
                    )
                }

                // handled before the state is locked
                Statement::Sleep(_) => (
                    Outcome::new(Vec::new(), QueryResult::new("SLEEP", 0)),
                    None,
                ),
            }
        };

        if let Some(write) = write {
            match &mut self.transaction {
                Some(writes) => writes.push(write),
                None => apply(&mut state.tables, &write)?,
            }
        }

        Ok(outcome)
    }

    /// The tables as this connection sees them.
    fn view<'s>(
        &self,
        tables: &'s HashMap<String, Table>,
    ) -> Result<Cow<'s, HashMap<String, Table>>, MockError> {
        match &self.transaction {
            Some(writes) if !writes.is_empty() => {
                let mut view = tables.clone();

                for write in writes {
                    apply(&mut view, write)?;
                }

                Ok(Cow::Owned(view))
            }

            _ => Ok(Cow::Borrowed(tables)),
        }
    }
}

fn lookup<'t>(tables: &'t HashMap<String, Table>, name: &str) -> Result<&'t Table, MockError> {
    tables.get(name).ok_or_else(|| {
        MockError::new(
            code::UNDEFINED_TABLE,
            format!("relation \"{name}\" does not exist"),
        )
    })
}

fn column_index(table: &Table, name: &str) -> Result<usize, MockError> {
    table.columns.index_of(name).ok_or_else(|| {
        MockError::new(
            code::UNDEFINED_COLUMN,
            format!("column \"{name}\" does not exist"),
        )
    })
}

fn resolve_filter(
    table: &Table,
    filter: Option<&Filter>,
    arguments: &Arguments,
) -> Result<Option<(usize, Value)>, MockError> {
    filter
        .map(|filter| {
            let index = column_index(table, &filter.column)?;
            let value = filter.value.eval(arguments)?;

            Ok((index, value))
        })
        .transpose()
}

fn matches_filter(row: &[Value], filter: Option<&(usize, Value)>) -> bool {
    match filter {
        // `NULL = NULL` is not true in SQL
        Some((_, Value::Null)) => false,
        Some((index, value)) => &row[*index] == value,
        None => true,
    }
}

fn apply(tables: &mut HashMap<String, Table>, write: &Write) -> Result<(), MockError> {
    match write {
        Write::CreateTable { table, columns } => {
            if tables.contains_key(table) {
                return Err(MockError::new(
                    code::DUPLICATE_TABLE,
                    format!("relation \"{table}\" already exists"),
                ));
            }

            tables.insert(
                table.clone(),
                Table {
                    columns: Arc::new(Columns::new(columns.iter().cloned())),
                    rows: Vec::new(),
                },
            );
        }

        Write::Insert { table, row } => {
            tables
                .get_mut(table)
                .ok_or_else(|| {
                    MockError::new(
                        code::UNDEFINED_TABLE,
                        format!("relation \"{table}\" does not exist"),
                    )
                })?
                .rows
                .push(row.clone());
        }

        Write::Delete { table, filter } => {
            tables
                .get_mut(table)
                .ok_or_else(|| {
                    MockError::new(
                        code::UNDEFINED_TABLE,
                        format!("relation \"{table}\" does not exist"),
                    )
                })?
                .rows
                .retain(|row| !matches_filter(row, filter.as_ref()));
        }
    }

    Ok(())
}

impl Connection for MockConnection {
    fn run<'c>(
        &'c mut self,
        sql: &'c str,
        arguments: Arguments,
    ) -> BoxFuture<'c, Result<Outcome, Error>> {
        Box::pin(async move {
            self.check_valid()?;

            self.journal(Event::Run {
                connection: self.id,
                sql: sql.to_owned(),
            });

            let statement = {
                let state = self.db.shared.state.lock();

                if let Some(error) = state.faults.statement_error(sql, &arguments) {
                    drop(state);

                    if error.is_fatal() {
                        self.valid = false;
                    }

                    return Err(error.into());
                }

                statement::parse(sql)?
            };

            if let Statement::Sleep(duration) = statement {
                rt::sleep(duration).await;
            }

            let db = self.db.clone();
            let mut state = db.shared.state.lock();

            Ok(self.execute(&mut state, statement, &arguments)?)
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.check_valid()?;

            if self.transaction.is_some() {
                return Err(MockError::new(
                    code::ACTIVE_SQL_TRANSACTION,
                    "there is already a transaction in progress",
                )
                .into());
            }

            self.transaction = Some(Vec::new());
            self.journal(Event::Begin {
                connection: self.id,
            });

            Ok(())
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.check_valid()?;

            // committing outside a transaction only warns in PostgreSQL
            let Some(writes) = self.transaction.take() else {
                return Ok(());
            };

            let mut state = self.db.shared.state.lock();

            if std::mem::take(&mut state.faults.fail_next_commit) {
                return Err(MockError::new(
                    code::SERIALIZATION_FAILURE,
                    "could not serialize access due to fault injection",
                )
                .into());
            }

            // apply to a copy so a conflicting write leaves the committed tables untouched
            let mut tables = state.tables.clone();
            for write in &writes {
                apply(&mut tables, write)?;
            }

            state.tables = tables;
            state.journal.push(Event::Commit {
                connection: self.id,
            });

            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.check_valid()?;

            if self.transaction.take().is_some() {
                self.journal(Event::Rollback {
                    connection: self.id,
                });
            }

            Ok(())
        })
    }

    fn close(self) -> BoxFuture<'static, Result<(), Error>> {
        Box::pin(async move {
            self.journal(Event::Close {
                connection: self.id,
            });

            Ok(())
        })
    }

    fn ping(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.check_valid()?;

            if std::mem::take(&mut self.db.shared.state.lock().faults.fail_next_ping) {
                self.valid = false;

                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "server closed the connection unexpectedly",
                )
                .into());
            }

            Ok(())
        })
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.db.shared.state.lock().open -= 1;
    }
}

impl Debug for MockConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("id", &self.id)
            .field("in_transaction", &self.in_transaction())
            .field("valid", &self.valid)
            .finish()
    }
}
