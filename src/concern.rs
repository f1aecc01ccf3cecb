//! Read and write concern: durability/visibility knobs attached to commands.

use serde::{Deserialize, Serialize};

use crate::bson::{document::Document, Bson};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadConcern {
    pub level: Option<ReadConcernLevel>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadConcernLevel {
    Local,
    Available,
    Majority,
    Linearizable,
    Snapshot,
}

impl ReadConcern {
    pub fn majority() -> Self {
        Self {
            level: Some(ReadConcernLevel::Majority),
        }
    }

    pub fn to_document(&self) -> Option<Document> {
        let level = self.level?;
        let name = match level {
            ReadConcernLevel::Local => "local",
            ReadConcernLevel::Available => "available",
            ReadConcernLevel::Majority => "majority",
            ReadConcernLevel::Linearizable => "linearizable",
            ReadConcernLevel::Snapshot => "snapshot",
        };
        let mut doc = Document::new();
        doc.insert("level".to_string(), Bson::String(name.to_string()));
        Some(doc)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteConcern {
    pub w: Option<Acknowledgment>,
    pub w_timeout: Option<std::time::Duration>,
    pub journal: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Acknowledgment {
    Nodes(i32),
    Majority,
    Tag(String),
}

impl WriteConcern {
    pub fn majority() -> Self {
        Self {
            w: Some(Acknowledgment::Majority),
            ..Default::default()
        }
    }

    /// An unacknowledged write concern (`w: 0`) suppresses the server reply and therefore any
    /// write errors; retryable writes are not attempted when this is in effect.
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self.w, Some(Acknowledgment::Nodes(0)))
    }

    pub fn to_document(&self) -> Option<Document> {
        if self.w.is_none() && self.w_timeout.is_none() && self.journal.is_none() {
            return None;
        }
        let mut doc = Document::new();
        match &self.w {
            Some(Acknowledgment::Nodes(n)) => {
                doc.insert("w".to_string(), Bson::Int32(*n));
            }
            Some(Acknowledgment::Majority) => {
                doc.insert("w".to_string(), Bson::String("majority".to_string()));
            }
            Some(Acknowledgment::Tag(tag)) => {
                doc.insert("w".to_string(), Bson::String(tag.clone()));
            }
            None => {}
        }
        if let Some(timeout) = self.w_timeout {
            doc.insert("wtimeout".to_string(), Bson::Int64(timeout.as_millis() as i64));
        }
        if let Some(j) = self.journal {
            doc.insert("j".to_string(), Bson::Boolean(j));
        }
        Some(doc)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unacknowledged_write_concern_is_detected() {
        let wc = WriteConcern {
            w: Some(Acknowledgment::Nodes(0)),
            ..Default::default()
        };
        assert!(!wc.is_acknowledged());
        assert!(WriteConcern::majority().is_acknowledged());
    }
}
