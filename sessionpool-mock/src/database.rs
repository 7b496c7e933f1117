use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sessionpool_core::{Arguments, Columns, Connector, Error, Value};

use crate::connection::MockConnection;
use crate::error::{code, MockError};

/// A handle to one in-memory database.
///
/// Cloning is cheap; every clone and every [`MockConnection`] opened from it share the same
/// committed tables, fault settings and journal.
#[derive(Clone, Default)]
pub struct MockDatabase {
    pub(crate) shared: Arc<Shared>,
}

#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    next_id: AtomicU64,
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) tables: HashMap<String, Table>,
    pub(crate) faults: Faults,
    pub(crate) journal: Vec<Event>,
    pub(crate) open: usize,
    pub(crate) peak_open: usize,
    pub(crate) connects: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub(crate) columns: Arc<Columns>,
    pub(crate) rows: Vec<Vec<Value>>,
}

type Predicate = Box<dyn Fn(&str, &Arguments) -> bool + Send + Sync>;

pub(crate) struct StatementFault {
    pub(crate) predicate: Predicate,
    pub(crate) fatal: bool,
}

#[derive(Default)]
pub(crate) struct Faults {
    /// Counts down on every connect; the connect that brings it to zero fails.
    pub(crate) connect_countdown: Option<usize>,
    pub(crate) statements: Vec<StatementFault>,
    pub(crate) fail_next_commit: bool,
    pub(crate) fail_next_ping: bool,
}

/// Something a [`MockConnection`] did, in the order it happened.
///
/// `connection` is the id the mock store assigned, see [`MockConnection::id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect { connection: u64 },
    Begin { connection: u64 },
    Run { connection: u64, sql: String },
    Commit { connection: u64 },
    Rollback { connection: u64 },
    Close { connection: u64 },
}

impl Event {
    pub fn connection(&self) -> u64 {
        match self {
            Event::Connect { connection }
            | Event::Begin { connection }
            | Event::Run { connection, .. }
            | Event::Commit { connection }
            | Event::Rollback { connection }
            | Event::Close { connection } => *connection,
        }
    }
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this database.
    pub async fn connect(&self) -> Result<MockConnection, Error> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let mut state = self.shared.state.lock();

        state.connects += 1;

        if let Some(remaining) = state.faults.connect_countdown.as_mut() {
            *remaining -= 1;

            if *remaining == 0 {
                state.faults.connect_countdown = None;

                return Err(MockError::new(
                    code::CONNECTION_FAILURE,
                    "connection refused by fault injection",
                )
                .into());
            }
        }

        state.open += 1;
        state.peak_open = state.peak_open.max(state.open);
        state.journal.push(Event::Connect { connection: id });

        drop(state);

        tracing::trace!(target: "sessionpool_mock", connection = id, "connected");

        Ok(MockConnection::new(self.clone(), id))
    }

    /// A connector for [`PoolOptions::connect`][sessionpool_core::PoolOptions::connect] that
    /// opens connections to this database.
    pub fn connector(&self) -> impl Connector<MockConnection> {
        let db = self.clone();

        move || {
            let db = db.clone();
            async move { db.connect().await }
        }
    }

    /// Make the `nth` connect from now on fail; `1` is the very next one.
    ///
    /// The failure is reported as a database error, which the pool does not retry.
    pub fn fail_connect(&self, nth: usize) {
        self.shared.state.lock().faults.connect_countdown = (nth > 0).then_some(nth);
    }

    /// Fail every statement for which `predicate(sql, arguments)` returns `true`.
    ///
    /// The connection stays usable and the error is reported with SQLSTATE `P0001`.
    pub fn fail_statements<F>(&self, predicate: F)
    where
        F: Fn(&str, &Arguments) -> bool + Send + Sync + 'static,
    {
        self.push_statement_fault(Box::new(predicate), false);
    }

    /// Like [`fail_statements`][Self::fail_statements], but the error is fatal: the
    /// connection reports itself invalid afterwards (SQLSTATE `57P01`).
    pub fn fail_statements_fatally<F>(&self, predicate: F)
    where
        F: Fn(&str, &Arguments) -> bool + Send + Sync + 'static,
    {
        self.push_statement_fault(Box::new(predicate), true);
    }

    fn push_statement_fault(&self, predicate: Predicate, fatal: bool) {
        self.shared
            .state
            .lock()
            .faults
            .statements
            .push(StatementFault { predicate, fatal });
    }

    /// Make the next `COMMIT` on any connection fail; its transaction is discarded.
    pub fn fail_next_commit(&self) {
        self.shared.state.lock().faults.fail_next_commit = true;
    }

    /// Make the next ping on any connection fail as if the server had hung up.
    ///
    /// The connection does not notice until it is pinged, so it still reports itself valid.
    pub fn fail_next_ping(&self) {
        self.shared.state.lock().faults.fail_next_ping = true;
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.shared.state.lock().faults = Faults::default();
    }

    /// Everything every connection did so far.
    pub fn journal(&self) -> Vec<Event> {
        self.shared.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.shared.state.lock().journal.clear();
    }

    /// Number of committed rows in `table`, or `None` if it does not exist.
    pub fn committed_rows(&self, table: &str) -> Option<usize> {
        self.shared
            .state
            .lock()
            .tables
            .get(&table.to_ascii_lowercase())
            .map(|table| table.rows.len())
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.shared.state.lock().open
    }

    /// The most connections that were ever open at once.
    pub fn peak_open_connections(&self) -> usize {
        self.shared.state.lock().peak_open
    }

    /// Connect attempts so far, including failed ones.
    pub fn connect_attempts(&self) -> u64 {
        self.shared.state.lock().connects
    }
}

impl Debug for MockDatabase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();

        f.debug_struct("MockDatabase")
            .field("tables", &state.tables.keys().collect::<Vec<_>>())
            .field("open", &state.open)
            .finish()
    }
}

impl Faults {
    /// The error for the first fault matching this statement, if any.
    pub(crate) fn statement_error(&self, sql: &str, arguments: &Arguments) -> Option<MockError> {
        let fault = self
            .statements
            .iter()
            .find(|fault| (fault.predicate)(sql, arguments))?;

        Some(if fault.fatal {
            MockError::new(
                code::ADMIN_SHUTDOWN,
                "terminating connection due to fault injection",
            )
            .fatal()
        } else {
            MockError::new(code::RAISE_EXCEPTION, "statement failed by fault injection")
        })
    }
}
