use crate::{
    bson::document::Document,
    cmap::StreamDescription,
    error::Result,
    operation::{Operation, Retryability},
    selection_criteria::SelectionCriteria,
};

/// An arbitrary, opaque command passed straight through to the server and returned verbatim, for
/// anything the core doesn't model explicitly.
#[derive(Clone, Debug)]
pub struct RunCommand {
    pub db: String,
    pub command: Document,
    pub selection_criteria: Option<SelectionCriteria>,
    pub retryability: Retryability,
}

impl RunCommand {
    pub fn new(db: impl Into<String>, command: Document) -> Self {
        Self {
            db: db.into(),
            command,
            selection_criteria: None,
            retryability: Retryability::None,
        }
    }
}

impl Operation for RunCommand {
    type Output = Document;

    fn target_db(&self) -> &str {
        &self.db
    }

    fn build_command(&self) -> Document {
        self.command.clone()
    }

    fn handle_response(&self, reply: &Document, _description: &StreamDescription) -> Result<Self::Output> {
        Ok(reply.clone())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        self.retryability
    }
}
