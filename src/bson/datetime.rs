//! BSON UTC datetime: milliseconds since the Unix epoch, signed (pre-epoch values permitted).

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateTime {
    millis: i64,
}

impl DateTime {
    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    pub const fn millis(&self) -> i64 {
        self.millis
    }

    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            millis: dur.as_millis() as i64,
        }
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DateTime({}ms)", self.millis)
    }
}

impl From<i64> for DateTime {
    fn from(millis: i64) -> Self {
        Self { millis }
    }
}
