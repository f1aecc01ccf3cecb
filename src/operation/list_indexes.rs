use crate::{
    bson::{document::Document, Bson},
    cmap::StreamDescription,
    error::Result,
    operation::{parse_cursor_reply, CursorSpec, Namespace, Operation, Retryability},
};

#[derive(Clone, Debug)]
pub struct ListIndexes {
    pub namespace: Namespace,
    pub batch_size: Option<i32>,
}

impl ListIndexes {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            batch_size: None,
        }
    }
}

impl Operation for ListIndexes {
    type Output = CursorSpec;

    fn target_db(&self) -> &str {
        &self.namespace.db
    }

    fn build_command(&self) -> Document {
        let mut command = Document::new();
        command.insert("listIndexes", Bson::String(self.namespace.collection.clone()));
        if let Some(batch_size) = self.batch_size {
            let mut cursor = Document::new();
            cursor.insert("batchSize", Bson::Int32(batch_size));
            command.insert("cursor", Bson::Document(cursor));
        }
        command
    }

    fn handle_response(&self, reply: &Document, _description: &StreamDescription) -> Result<Self::Output> {
        parse_cursor_reply(reply, &self.namespace)
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
