use crate::{
    bson::{document::Document, Bson},
    cmap::StreamDescription,
    error::Result,
    operation::{parse_cursor_reply, CursorSpec, Namespace, Operation, Retryability},
};

/// An `aggregate` command, run against either a collection or (when `namespace.collection` is
/// `"$cmd.aggregate"`) the database itself.
#[derive(Clone, Debug)]
pub struct Aggregate {
    pub namespace: Namespace,
    pub pipeline: Vec<Document>,
    pub batch_size: Option<i32>,
    pub allow_disk_use: Option<bool>,
}

impl Aggregate {
    pub fn new(namespace: Namespace, pipeline: Vec<Document>) -> Self {
        Self {
            namespace,
            pipeline,
            batch_size: None,
            allow_disk_use: None,
        }
    }

    fn aggregation_target(&self) -> Bson {
        if self.namespace.collection == "$cmd.aggregate" {
            Bson::Int32(1)
        } else {
            Bson::String(self.namespace.collection.clone())
        }
    }
}

impl Operation for Aggregate {
    type Output = CursorSpec;

    fn target_db(&self) -> &str {
        &self.namespace.db
    }

    fn build_command(&self) -> Document {
        let mut command = Document::new();
        command.insert("aggregate", self.aggregation_target());
        command.insert(
            "pipeline",
            Bson::Array(self.pipeline.iter().cloned().map(Bson::Document).collect()),
        );
        let mut cursor = Document::new();
        if let Some(batch_size) = self.batch_size {
            cursor.insert("batchSize", Bson::Int32(batch_size));
        }
        command.insert("cursor", Bson::Document(cursor));
        if let Some(allow_disk_use) = self.allow_disk_use {
            command.insert("allowDiskUse", Bson::Boolean(allow_disk_use));
        }
        command
    }

    fn handle_response(&self, reply: &Document, _description: &StreamDescription) -> Result<Self::Output> {
        parse_cursor_reply(reply, &self.namespace)
    }

    fn retryability(&self) -> Retryability {
        // A `$merge`/`$out` stage makes the pipeline a write; this core doesn't parse pipeline
        // stages, so callers building a write-aggregate must not mark it retry-read themselves.
        Retryability::Read
    }
}
