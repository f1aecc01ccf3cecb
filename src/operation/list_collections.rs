use crate::{
    bson::{document::Document, Bson},
    cmap::StreamDescription,
    error::Result,
    operation::{parse_cursor_reply, CursorSpec, Namespace, Operation, Retryability},
};

#[derive(Clone, Debug)]
pub struct ListCollections {
    pub db: String,
    pub filter: Option<Document>,
    pub name_only: bool,
}

impl ListCollections {
    pub fn new(db: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            filter: None,
            name_only: false,
        }
    }
}

impl Operation for ListCollections {
    type Output = CursorSpec;

    fn target_db(&self) -> &str {
        &self.db
    }

    fn build_command(&self) -> Document {
        let mut command = Document::new();
        command.insert("listCollections", Bson::Int32(1));
        if let Some(filter) = &self.filter {
            command.insert("filter", Bson::Document(filter.clone()));
        }
        command.insert("nameOnly", Bson::Boolean(self.name_only));
        command
    }

    fn handle_response(&self, reply: &Document, _description: &StreamDescription) -> Result<Self::Output> {
        parse_cursor_reply(reply, &Namespace::new(self.db.clone(), "$cmd.listCollections"))
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
