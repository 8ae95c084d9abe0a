// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::{
    io::{Read, Write},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::coding::{Decode, Encode};

/// An absolute expiry instant
///
/// Millisecond granularity, which is what the on-disk encoding keeps.
///
/// A key-value whose deadline has passed is logically absent for user reads;
/// compaction into the last level drops it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Deadline(Duration);

impl Deadline {
    /// A deadline at the given duration since the Unix epoch.
    #[must_use]
    pub fn from_unix(since_epoch: Duration) -> Self {
        Self(Duration::from_millis(
            u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX),
        ))
    }

    /// A deadline the given duration from now.
    #[must_use]
    pub fn after(duration: Duration) -> Self {
        Self::from_unix(Self::now() + duration)
    }

    fn now() -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }

    /// Duration since the Unix epoch.
    #[must_use]
    pub fn since_epoch(&self) -> Duration {
        self.0
    }

    /// Returns `true` if the deadline has passed.
    #[must_use]
    pub fn is_overdue(&self) -> bool {
        self.0 <= Self::now()
    }

    /// Time left until expiry, `None` if already overdue.
    #[must_use]
    pub fn time_left(&self) -> Option<Duration> {
        self.0.checked_sub(Self::now()).filter(|d| !d.is_zero())
    }

    /// The earlier of two optional deadlines.
    #[must_use]
    pub fn earlier_of(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl Encode for Deadline {
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        writer.write_u64::<LE>(u64::try_from(self.0.as_millis()).unwrap_or(u64::MAX))?;
        Ok(())
    }
}

impl Decode for Deadline {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let millis = reader.read_u64::<LE>()?;
        Ok(Self(Duration::from_millis(millis)))
    }
}

#[cfg(test)]
mod tests {
    use super::Deadline;
    use std::time::Duration;
    use test_log::test;

    #[test]
    fn deadline_overdue() {
        let past = Deadline::from_unix(Duration::from_secs(1));
        assert!(past.is_overdue());
        assert!(past.time_left().is_none());

        let future = Deadline::after(Duration::from_secs(3600));
        assert!(!future.is_overdue());
        assert!(future.time_left().is_some());
    }

    #[test]
    fn deadline_earlier_of() {
        let a = Deadline::from_unix(Duration::from_secs(10));
        let b = Deadline::from_unix(Duration::from_secs(20));

        assert_eq!(Some(a), Deadline::earlier_of(Some(a), Some(b)));
        assert_eq!(Some(b), Deadline::earlier_of(None, Some(b)));
        assert_eq!(None, Deadline::earlier_of(None, None));
    }
}
