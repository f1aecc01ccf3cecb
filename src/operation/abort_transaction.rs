use crate::{
    bson::{document::Document, Bson},
    cmap::StreamDescription,
    concern::WriteConcern,
    error::Result,
    operation::{Operation, Retryability},
};

#[derive(Clone, Debug)]
pub struct AbortTransaction {
    pub write_concern: Option<WriteConcern>,
}

impl Operation for AbortTransaction {
    type Output = ();

    fn target_db(&self) -> &str {
        "admin"
    }

    fn build_command(&self) -> Document {
        let mut command = Document::new();
        command.insert("abortTransaction", Bson::Int32(1));
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

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }
}
