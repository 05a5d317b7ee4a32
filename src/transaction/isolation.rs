//! Isolation levels a unit of work can ask for.
//!
//! Only a unit that opens a physical transaction applies its level. Joined
//! and nested units inherit whatever the physical transaction was opened
//! with.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Every read sees the latest committed row, so two reads of the same
    /// row may disagree if another transaction commits in between.
    #[default]
    ReadCommitted,

    /// Reads come from a snapshot taken at begin.
    RepeatableRead,

    /// Snapshot reads, and commit fails if a row this transaction wrote was
    /// committed by someone else after begin.
    Serializable,
}

impl IsolationLevel {
    pub const ALL: [IsolationLevel; 3] = [
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// Whether reads are served from a begin-time snapshot.
    pub fn reads_snapshot(self) -> bool {
        !matches!(self, IsolationLevel::ReadCommitted)
    }

    /// Whether commit checks the write set against later committers.
    pub fn checks_write_conflicts(self) -> bool {
        // repeatable read behaves as snapshot isolation here, which also
        // refuses lost updates
        self.reads_snapshot()
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = String;

    /// Accepts the SQL spelling or the underscored constant name, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('_', " ").to_ascii_uppercase();
        IsolationLevel::ALL
            .into_iter()
            .find(|level| level.as_sql() == wanted)
            .ok_or_else(|| format!("unsupported isolation level '{}'", s))
    }
}
