use crate::{
    bson::{document::Document, Bson},
    cmap::StreamDescription,
    error::Result,
    operation::{parse_cursor_reply, CursorSpec, Namespace, Operation, Retryability},
};

/// Drives an already-open cursor for its next batch. Always addressed to the server that owns
/// the cursor — the executor must not re-select for this operation.
#[derive(Clone, Debug)]
pub struct GetMore {
    pub namespace: Namespace,
    pub cursor_id: i64,
    pub batch_size: Option<i32>,
    pub max_time: Option<std::time::Duration>,
}

impl GetMore {
    pub fn new(namespace: Namespace, cursor_id: i64) -> Self {
        Self {
            namespace,
            cursor_id,
            batch_size: None,
            max_time: None,
        }
    }
}

impl Operation for GetMore {
    type Output = CursorSpec;

    fn target_db(&self) -> &str {
        &self.namespace.db
    }

    fn build_command(&self) -> Document {
        let mut command = Document::new();
        command.insert("getMore", Bson::Int64(self.cursor_id));
        command.insert("collection", Bson::String(self.namespace.collection.clone()));
        if let Some(batch_size) = self.batch_size {
            command.insert("batchSize", Bson::Int32(batch_size));
        }
        if let Some(max_time) = self.max_time {
            command.insert("maxTimeMS", Bson::Int64(max_time.as_millis() as i64));
        }
        command
    }

    fn handle_response(&self, reply: &Document, _description: &StreamDescription) -> Result<Self::Output> {
        parse_cursor_reply(reply, &self.namespace)
    }

    fn retryability(&self) -> Retryability {
        // getMore is never retried: it isn't idempotent with respect to which documents it
        // advances past.
        Retryability::None
    }
}
