use crate::{
    bson::{document::Document, Bson},
    cmap::StreamDescription,
    error::Result,
    operation::{Namespace, Operation, Retryability},
};

/// Best-effort cleanup of one or more open cursors, fired from a cursor's `Drop` impl.
#[derive(Clone, Debug)]
pub struct KillCursors {
    pub namespace: Namespace,
    pub cursor_ids: Vec<i64>,
}

impl KillCursors {
    pub fn new(namespace: Namespace, cursor_ids: Vec<i64>) -> Self {
        Self { namespace, cursor_ids }
    }
}

impl Operation for KillCursors {
    type Output = ();

    fn target_db(&self) -> &str {
        &self.namespace.db
    }

    fn build_command(&self) -> Document {
        let mut command = Document::new();
        command.insert("killCursors", Bson::String(self.namespace.collection.clone()));
        command.insert(
            "cursors",
            Bson::Array(self.cursor_ids.iter().map(|id| Bson::Int64(*id)).collect()),
        );
        command
    }

    fn handle_response(&self, _reply: &Document, _description: &StreamDescription) -> Result<Self::Output> {
        Ok(())
    }

    fn retryability(&self) -> Retryability {
        Retryability::None
    }
}
