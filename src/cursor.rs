//! Drives a server-side cursor: buffers the current batch, issues `getMore` against the pinned
//! server once it's drained, and fires a best-effort `killCursors` if dropped before exhaustion.

use std::{collections::VecDeque, sync::Arc};

use crate::{
    bson::document::Document,
    error::Result,
    operation::{CursorSpec, GetMore, KillCursors, Namespace, Operation},
    options::ServerAddress,
};

/// A live cursor, pinned to the server that opened it. Yields documents batch by batch,
/// transparently issuing `getMore` as each batch is exhausted.
pub struct Cursor {
    executor: Arc<crate::executor::Executor>,
    address: ServerAddress,
    namespace: Namespace,
    id: i64,
    buffer: VecDeque<Document>,
    batch_size: Option<i32>,
    exhausted: bool,
}

impl Cursor {
    pub(crate) fn new(executor: Arc<crate::executor::Executor>, address: ServerAddress, spec: CursorSpec, batch_size: Option<i32>) -> Self {
        Self {
            executor,
            address,
            namespace: spec.namespace,
            id: spec.id,
            buffer: VecDeque::from(spec.initial_batch),
            batch_size,
            exhausted: spec.id == 0,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The cursor id the server assigned, or `0` once the cursor has been fully drained.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns the next document, fetching another batch from the pinned server via `getMore`
    /// once the current one is drained. `Ok(None)` means the cursor is exhausted.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        loop {
            if let Some(document) = self.buffer.pop_front() {
                return Ok(Some(document));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_more().await?;
        }
    }

    async fn fetch_more(&mut self) -> Result<()> {
        let get_more = GetMore {
            namespace: self.namespace.clone(),
            cursor_id: self.id,
            batch_size: self.batch_size,
            max_time: None,
        };
        let spec = self
            .executor
            .execute_pinned(&get_more, &self.address, None)
            .await?;
        self.id = spec.id;
        self.buffer.extend(spec.initial_batch);
        if self.id == 0 {
            self.exhausted = true;
        }
        Ok(())
    }

    /// Collects every remaining document, draining the cursor.
    pub async fn try_collect(mut self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        while let Some(document) = self.next().await? {
            documents.push(document);
        }
        Ok(documents)
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.id == 0 {
            return;
        }
        let executor = self.executor.clone();
        let address = self.address.clone();
        let kill_cursors = KillCursors {
            namespace: self.namespace.clone(),
            cursor_ids: vec![self.id],
        };
        tokio::spawn(async move {
            let _ = executor.execute_pinned(&kill_cursors, &address, None).await;
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{event::EventBroadcaster, options::ClientOptions};

    fn executor() -> Arc<crate::executor::Executor> {
        let options = ClientOptions::direct_single(ServerAddress::parse("localhost:27017"));
        crate::executor::Executor::new(options, EventBroadcaster::default())
    }

    fn doc(n: i32) -> Document {
        let mut d = Document::new();
        d.insert("n", crate::bson::Bson::Int32(n));
        d
    }

    #[tokio::test]
    async fn next_drains_the_initial_batch_before_touching_the_network() {
        let spec = CursorSpec {
            id: 0,
            namespace: Namespace::new("db", "coll"),
            initial_batch: vec![doc(1), doc(2)],
        };
        let mut cursor = Cursor::new(executor(), ServerAddress::parse("localhost:27017"), spec, None);

        assert_eq!(cursor.next().await.unwrap(), Some(doc(1)));
        assert_eq!(cursor.next().await.unwrap(), Some(doc(2)));
        assert_eq!(cursor.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn a_zero_id_spec_is_exhausted_from_construction() {
        let spec = CursorSpec {
            id: 0,
            namespace: Namespace::new("db", "coll"),
            initial_batch: vec![],
        };
        let cursor = Cursor::new(executor(), ServerAddress::parse("localhost:27017"), spec, None);
        assert_eq!(cursor.id(), 0);
        assert!(cursor.exhausted);
    }

    #[tokio::test]
    async fn try_collect_gathers_every_buffered_document() {
        let spec = CursorSpec {
            id: 0,
            namespace: Namespace::new("db", "coll"),
            initial_batch: vec![doc(1), doc(2), doc(3)],
        };
        let cursor = Cursor::new(executor(), ServerAddress::parse("localhost:27017"), spec, None);
        let documents = cursor.try_collect().await.unwrap();
        assert_eq!(documents, vec![doc(1), doc(2), doc(3)]);
    }

    #[tokio::test]
    async fn dropping_an_already_exhausted_cursor_fires_no_kill_cursors() {
        let spec = CursorSpec {
            id: 0,
            namespace: Namespace::new("db", "coll"),
            initial_batch: vec![],
        };
        // No panic and no background task spawned: id == 0 short-circuits Drop.
        drop(Cursor::new(executor(), ServerAddress::parse("localhost:27017"), spec, None));
    }
}
