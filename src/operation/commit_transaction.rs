use std::time::Duration;

use crate::{
    bson::{document::Document, Bson},
    cmap::StreamDescription,
    concern::WriteConcern,
    error::Result,
    operation::{Operation, Retryability},
};

#[derive(Clone, Debug)]
pub struct CommitTransaction {
    pub max_commit_time: Option<Duration>,
    pub write_concern: Option<WriteConcern>,
}

impl Operation for CommitTransaction {
    type Output = ();

    fn target_db(&self) -> &str {
        "admin"
    }

    fn build_command(&self) -> Document {
        let mut command = Document::new();
        command.insert("commitTransaction", Bson::Int32(1));
        if let Some(max_commit_time) = self.max_commit_time {
            command.insert("maxTimeMS", Bson::Int64(max_commit_time.as_millis() as i64));
        }
        if let Some(doc) = self.write_concern.as_ref().and_then(WriteConcern::to_document) {
            command.insert("writeConcern", Bson::Document(doc));
        }
        command
    }

    fn handle_response(&self, _reply: &Document, _description: &StreamDescription) -> Result<Self::Output> {
        Ok(())
    }

    fn is_write(&self) -> bool {
        true
    }

    /// A commit that fails with a retryable label is retried once.
    fn retryability(&self) -> Retryability {
        Retryability::Write
    }
}
