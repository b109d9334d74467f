//! Controller leadership.

use parking_lot::RwLock;
use std::collections::HashSet;

/// Decides whether this controller is authoritative for a table.
pub trait LeadershipCheck: Send + Sync {
    /// Returns true if this controller may arbitrate segments of `table`.
    fn is_leader(&self, table: &str) -> bool;
}

/// A controller that leads every table.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysLeader;

impl LeadershipCheck for AlwaysLeader {
    fn is_leader(&self, _table: &str) -> bool {
        true
    }
}

/// Leadership over an explicit, changeable set of tables.
#[derive(Debug, Default)]
pub struct StaticLeadership {
    tables: RwLock<HashSet<String>>,
}

impl StaticLeadership {
    /// Creates a leadership set with the given tables.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: RwLock::new(tables.into_iter().map(Into::into).collect()),
        }
    }

    /// Takes over leadership of a table.
    pub fn acquire(&self, table: impl Into<String>) {
        self.tables.write().insert(table.into());
    }

    /// Gives up leadership of a table.
    pub fn release(&self, table: &str) {
        self.tables.write().remove(table);
    }
}

impl LeadershipCheck for StaticLeadership {
    fn is_leader(&self, table: &str) -> bool {
        self.tables.read().contains(table)
    }
}
