//! Sync cursor (the `since` watermark of the pull phase).
//!
//! The cursor records the most recent remote `updated` time that has been
//! merged locally. It only moves forward, except for an explicit reset when a
//! full resync starts.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Watermark of merged remote changes.
///
/// An unset cursor means nothing has been merged yet and the next pull asks
/// for every change since the epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    since: Option<DateTime<Utc>>,
}

impl SyncCursor {
    /// A cursor that has not seen anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cursor positioned at a known timestamp.
    pub fn at(since: DateTime<Utc>) -> Self {
        Self { since: Some(since) }
    }

    /// The watermark, if any change was merged.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    /// Timestamp to send with a changes-since request.
    pub fn query_from(&self) -> DateTime<Utc> {
        self.since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Move forward to `seen` if it is newer. Returns whether it moved.
    pub fn advance(&mut self, seen: DateTime<Utc>) -> bool {
        match self.since {
            Some(current) if current >= seen => false,
            _ => {
                self.since = Some(seen);
                true
            }
        }
    }

    /// Take the newer of the two watermarks.
    pub fn merge(&mut self, other: &SyncCursor) -> bool {
        match other.since {
            Some(seen) => self.advance(seen),
            None => false,
        }
    }

    /// Forget everything, used when a full resync starts.
    pub fn reset(&mut self) {
        self.since = None;
    }

    /// ISO-8601 rendering of the watermark as sent on the wire.
    pub fn to_iso8601(&self) -> String {
        self.query_from().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl Ord for SyncCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.since.cmp(&other.since)
    }
}

impl PartialOrd for SyncCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
