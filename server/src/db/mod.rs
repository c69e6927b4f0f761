//! Database module for PostgreSQL persistence.

mod accounts;
mod entries;
mod lists;
mod pool;

pub use accounts::*;
pub use entries::*;
pub use lists::*;
pub use pool::*;

use chrono::{DateTime, SecondsFormat, Utc};

/// Wire form of a stored timestamp, at the full precision of the column.
pub fn wire_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
