use std::fmt::{self, Display, Formatter};

use crate::row::Row;

/// Represents the execution result of a statement on the database server.
///
/// Returned from [`Session::execute`][crate::session::Session::execute].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    command: String,
    rows_affected: u64,
}

impl QueryResult {
    pub fn new(command: impl Into<String>, rows_affected: u64) -> Self {
        Self {
            command: command.into(),
            rows_affected,
        }
    }

    /// The command tag reported by the driver, e.g. `INSERT` or `SELECT`.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the number of rows changed, deleted, or inserted by the statement
    /// if it was an `UPDATE`, `DELETE` or `INSERT`. For `SELECT` statements, returns
    /// the number of rows returned.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

impl Display for QueryResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.command, self.rows_affected)
    }
}

impl Extend<QueryResult> for QueryResult {
    fn extend<T: IntoIterator<Item = QueryResult>>(&mut self, iter: T) {
        for elem in iter {
            self.rows_affected += elem.rows_affected;
            self.command = elem.command;
        }
    }
}

/// Everything a driver returns for one executed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub rows: Vec<Row>,
    pub result: QueryResult,
}

impl Outcome {
    pub fn new(rows: Vec<Row>, result: QueryResult) -> Self {
        Self { rows, result }
    }
}

impl Extend<Outcome> for Outcome {
    fn extend<T: IntoIterator<Item = Outcome>>(&mut self, iter: T) {
        for elem in iter {
            self.rows.extend(elem.rows);
            self.result.extend(Some(elem.result));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QueryResult;

    #[test]
    fn it_folds_results() {
        let mut result = QueryResult::default();
        result.extend([QueryResult::new("INSERT", 1), QueryResult::new("INSERT", 2)]);

        assert_eq!(result.rows_affected(), 3);
        assert_eq!(result.to_string(), "INSERT 3");
    }
}
