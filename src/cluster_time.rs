//! `$clusterTime` gossip: every command reply's cluster time is folded into the client's view,
//! and the highest one seen is attached to subsequent commands.

use std::cmp::Ordering;

use crate::bson::{document::Document, Bson, Timestamp};

#[derive(Debug, Clone)]
pub struct ClusterTime {
    pub cluster_time: Timestamp,
    pub signature: Document,
}

impl ClusterTime {
    pub fn from_document(doc: &Document) -> Option<Self> {
        let cluster_time = match doc.get("clusterTime")? {
            Bson::Timestamp(ts) => *ts,
            _ => return None,
        };
        let signature = match doc.get("signature") {
            Some(Bson::Document(d)) => d.clone(),
            _ => Document::new(),
        };
        Some(Self {
            cluster_time,
            signature,
        })
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("clusterTime", Bson::Timestamp(self.cluster_time));
        doc.insert("signature", Bson::Document(self.signature.clone()));
        doc
    }
}

impl PartialEq for ClusterTime {
    fn eq(&self, other: &Self) -> bool {
        self.cluster_time == other.cluster_time
    }
}

impl Eq for ClusterTime {}

impl Ord for ClusterTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cluster_time.cmp(&other.cluster_time)
    }
}

impl PartialOrd for ClusterTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Replaces `current` with `candidate` if `candidate` is strictly newer. Used both by the client
/// (gossiping the maximum cluster time it has observed) and by sessions (tracking their own
/// causally-consistent view).
pub fn advance(current: &mut Option<ClusterTime>, candidate: Option<ClusterTime>) {
    if let Some(candidate) = candidate {
        let is_newer = match current.as_ref() {
            Some(c) => candidate > *c,
            None => true,
        };
        if is_newer {
            *current = Some(candidate);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ts(time: u32, increment: u32) -> Timestamp {
        Timestamp { time, increment }
    }

    #[test]
    fn advance_keeps_the_newer_cluster_time() {
        let mut current = Some(ClusterTime {
            cluster_time: ts(5, 0),
            signature: Document::new(),
        });
        advance(
            &mut current,
            Some(ClusterTime {
                cluster_time: ts(3, 0),
                signature: Document::new(),
            }),
        );
        assert_eq!(current.as_ref().unwrap().cluster_time, ts(5, 0));

        advance(
            &mut current,
            Some(ClusterTime {
                cluster_time: ts(9, 0),
                signature: Document::new(),
            }),
        );
        assert_eq!(current.as_ref().unwrap().cluster_time, ts(9, 0));
    }
}
