//! Read preference and server selection filtering.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// A single tag set: all tags in the set must match a server's tags for the set to apply.
pub type TagSet = HashMap<String, String>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPreference {
    pub mode: ReadPreferenceMode,
    #[serde(default)]
    pub tag_sets: Vec<TagSet>,
    #[serde(default)]
    pub max_staleness: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreferenceMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreference {
    pub fn primary() -> Self {
        Self::default()
    }

    pub fn secondary_preferred() -> Self {
        Self {
            mode: ReadPreferenceMode::SecondaryPreferred,
            ..Default::default()
        }
    }

    /// Whether this mode can ever be satisfied by a secondary.
    pub fn allows_secondary(&self) -> bool {
        !matches!(self.mode, ReadPreferenceMode::Primary)
    }
}

/// Criteria used to pick a server for an operation: either a read preference, or (for predicate
/// based selection, e.g. picking any data-bearing server for a handshake) a custom filter.
#[derive(Clone, Debug, Default)]
pub enum SelectionCriteria {
    #[default]
    Primary,
    ReadPreference(ReadPreference),
}

impl SelectionCriteria {
    pub fn read_preference(&self) -> ReadPreference {
        match self {
            SelectionCriteria::Primary => ReadPreference::primary(),
            SelectionCriteria::ReadPreference(rp) => rp.clone(),
        }
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(rp: ReadPreference) -> Self {
        SelectionCriteria::ReadPreference(rp)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn primary_never_allows_secondary() {
        assert!(!ReadPreference::primary().allows_secondary());
        assert!(ReadPreference::secondary_preferred().allows_secondary());
    }
}
