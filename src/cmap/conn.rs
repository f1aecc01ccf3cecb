//! A single application connection: a handshaken [`Transport`] plus the bookkeeping the pool and
//! executor need.

use std::time::{Duration, Instant};

use crate::{
    bson::document::Document,
    error::Result,
    event::{Event, EventBroadcaster},
    options::ServerAddress,
    transport::Transport,
    wire::{self, compression::Compressor, header::next_request_id, message::Message},
};

/// The negotiated handshake facts about a connection's server, cached on the connection itself so
/// later operations don't have to re-derive them.
#[derive(Clone, Debug, Default)]
pub struct StreamDescription {
    pub max_wire_version: i32,
    pub max_bson_object_size: i64,
    pub max_message_size_bytes: i64,
    pub max_write_batch_size: i64,
    pub compressors: Vec<String>,
    pub service_id: Option<crate::bson::oid::ObjectId>,
    pub logical_session_timeout_minutes: Option<i64>,
}

/// A connection's generation, used by the pool to invalidate every connection opened before a
/// `clear()` without touching ones opened after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionGeneration {
    Normal(u32),
    /// Pinned-service (load balanced) connections are keyed by `serviceId`, not the pool-wide
    /// generation.
    Pinned { generation: u32, service_id: crate::bson::oid::ObjectId },
}

impl ConnectionGeneration {
    pub fn generation(self) -> u32 {
        match self {
            ConnectionGeneration::Normal(g) => g,
            ConnectionGeneration::Pinned { generation, .. } => generation,
        }
    }
}

pub struct Connection {
    pub id: u32,
    pub server_id: Option<i64>,
    pub address: ServerAddress,
    pub generation: ConnectionGeneration,
    pub time_created: Instant,
    pub ready_and_available_since: Option<Instant>,
    pub stream_description: Option<StreamDescription>,
    pub compressor: Option<Compressor>,
    pub pinned: bool,
    error: Option<crate::error::Error>,
    stream: Transport,
}

impl Connection {
    pub fn new(id: u32, address: ServerAddress, generation: ConnectionGeneration, stream: Transport) -> Self {
        Self {
            id,
            server_id: None,
            address,
            generation,
            time_created: Instant::now(),
            ready_and_available_since: None,
            stream_description: None,
            compressor: None,
            pinned: false,
            error: None,
            stream,
        }
    }

    pub fn has_errored(&self) -> bool {
        self.error.is_some()
    }

    pub fn mark_errored(&mut self, error: &crate::error::Error) {
        self.error = Some(error.clone());
    }

    /// Whether this connection has been idle in the pool longer than `max_idle_time`.
    pub fn is_idle(&self, max_idle_time: Option<Duration>) -> bool {
        match (max_idle_time, self.ready_and_available_since) {
            (Some(max_idle_time), Some(since)) => since.elapsed() >= max_idle_time,
            _ => false,
        }
    }

    /// Sends `command` as an `OP_MSG` (compressed if negotiated and the command isn't sensitive)
    /// and returns the decoded reply document. A command carrying an unacknowledged
    /// (`writeConcern: {w: 0}`) write concern is sent with the `moreToCome` bit set and its reply
    /// is never read: the server doesn't send one.
    pub async fn send_command(&mut self, mut command: Document, deadline: Option<Duration>) -> Result<Document> {
        let command_name = command.keys().next().cloned().unwrap_or_default();
        if !command.contains_key("$db") {
            command.insert("$db", crate::bson::Bson::String("admin".to_string()));
        }

        let unacknowledged = is_unacknowledged_write(&command);
        #[cfg(feature = "tracing-unstable")]
        tracing::trace!(command_name, connection_id = self.id, unacknowledged, "sending command");

        let mut message = Message::with_document(command);
        if unacknowledged {
            message.flags = message.flags.with_more_to_come(true);
        }
        let request_id = next_request_id();

        let frame = match self.compressor {
            Some(compressor) if !wire::is_sensitive_command(&command_name) => {
                wire::compression::wrap_request(request_id, &message, compressor)?
            }
            _ => wire::message::encode_request(request_id, &message),
        };

        if let Err(e) = self.stream.write_all(&frame, deadline).await {
            self.mark_errored(&e);
            return Err(e);
        }

        if unacknowledged {
            let mut ack = Document::new();
            ack.insert("ok", crate::bson::Bson::Double(1.0));
            return Ok(ack);
        }

        let mut header_bytes = [0u8; wire::header::HEADER_LEN];
        if let Err(e) = self.stream.read_exact(&mut header_bytes, deadline).await {
            self.mark_errored(&e);
            return Err(e);
        }
        let header = wire::header::Header::from_bytes(header_bytes);
        let body_len = (header.length as usize).saturating_sub(wire::header::HEADER_LEN);
        let mut body = vec![0u8; body_len];
        if let Err(e) = self.stream.read_exact(&mut body, deadline).await {
            self.mark_errored(&e);
            return Err(e);
        }

        let message = if header.op_code == wire::header::OP_COMPRESSED {
            let (_original_opcode, decompressed) = wire::compression::unwrap_reply(header, &body)?;
            Message::decode_body(&decompressed)?
        } else {
            wire::message::decode_frame(header, &body)?
        };

        message
            .command_document()
            .cloned()
            .ok_or_else(|| crate::error::Error::invalid_argument("reply carried no command document"))
    }

    pub fn emit_closed(&self, events: &EventBroadcaster, reason: crate::event::ConnectionClosedReason) {
        events.emit(Event::ConnectionClosed(crate::event::ConnectionClosedEvent {
            address: self.address.clone(),
            connection_id: self.id,
            reason,
        }));
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// True if `command` carries a `writeConcern: {w: 0, ...}`, the one write concern that suppresses
/// the server's reply entirely.
fn is_unacknowledged_write(command: &Document) -> bool {
    let Some(crate::bson::Bson::Document(write_concern)) = command.get("writeConcern") else {
        return false;
    };
    matches!(
        write_concern.get("w"),
        Some(crate::bson::Bson::Int32(0)) | Some(crate::bson::Bson::Int64(0))
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bson::Bson;

    #[test]
    fn w0_write_concern_is_detected_as_unacknowledged() {
        let mut wc = Document::new();
        wc.insert("w", Bson::Int32(0));
        let mut command = Document::new();
        command.insert("insert", Bson::String("coll".to_string()));
        command.insert("writeConcern", Bson::Document(wc));
        assert!(is_unacknowledged_write(&command));
    }

    #[test]
    fn absent_or_positive_write_concern_is_acknowledged() {
        let mut command = Document::new();
        command.insert("insert", Bson::String("coll".to_string()));
        assert!(!is_unacknowledged_write(&command));

        let mut wc = Document::new();
        wc.insert("w", Bson::String("majority".to_string()));
        command.insert("writeConcern", Bson::Document(wc));
        assert!(!is_unacknowledged_write(&command));
    }
}
