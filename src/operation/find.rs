use crate::{
    bson::{document::Document, Bson},
    cmap::StreamDescription,
    error::Result,
    operation::{parse_cursor_reply, CursorSpec, Namespace, Operation, Retryability},
    selection_criteria::SelectionCriteria,
};

/// A `find` command: the initial query that opens a cursor over a collection.
#[derive(Clone, Debug)]
pub struct Find {
    pub namespace: Namespace,
    pub filter: Document,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub batch_size: Option<i32>,
    pub selection_criteria: Option<SelectionCriteria>,
}

impl Find {
    pub fn new(namespace: Namespace, filter: Document) -> Self {
        Self {
            namespace,
            filter,
            sort: None,
            projection: None,
            limit: None,
            skip: None,
            batch_size: None,
            selection_criteria: None,
        }
    }
}

impl Operation for Find {
    type Output = CursorSpec;

    fn target_db(&self) -> &str {
        &self.namespace.db
    }

    fn build_command(&self) -> Document {
        let mut command = Document::new();
        command.insert("find", Bson::String(self.namespace.collection.clone()));
        command.insert("filter", Bson::Document(self.filter.clone()));
        if let Some(sort) = &self.sort {
            command.insert("sort", Bson::Document(sort.clone()));
        }
        if let Some(projection) = &self.projection {
            command.insert("projection", Bson::Document(projection.clone()));
        }
        if let Some(limit) = self.limit {
            command.insert("limit", Bson::Int64(limit));
        }
        if let Some(skip) = self.skip {
            command.insert("skip", Bson::Int64(skip));
        }
        if let Some(batch_size) = self.batch_size {
            command.insert("batchSize", Bson::Int32(batch_size));
        }
        command
    }

    fn handle_response(&self, reply: &Document, _description: &StreamDescription) -> Result<Self::Output> {
        parse_cursor_reply(reply, &self.namespace)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
