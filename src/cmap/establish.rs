//! Connection establishment: TCP/TLS connect, the `hello` handshake, compression negotiation, and
//! authentication.

use std::time::Duration;

use crate::{
    bson::{document::Document, Bson},
    cmap::conn::{Connection, ConnectionGeneration, StreamDescription},
    error::{Error, ErrorKind, Result},
    options::{ClientOptions, CompressorName, DriverInfo, ServerAddress},
    transport::Transport,
    wire::{self, compression::Compressor, header::next_request_id, message::Message},
};

/// Performs the initial `hello` handshake on a freshly connected [`Transport`] and, if
/// credentials are configured, authenticates, returning a ready-to-use [`Connection`].
pub async fn establish_connection(
    id: u32,
    address: ServerAddress,
    generation: ConnectionGeneration,
    options: &ClientOptions,
) -> Result<Connection> {
    #[cfg(feature = "rustls-tls")]
    let tls_config = if options.tls {
        Some(crate::transport::tls::TlsConfig::from_options(
            options.tls_allow_invalid_certificates,
            options.tls_ca_file.as_deref(),
        )?)
    } else {
        None
    };

    #[cfg(feature = "tracing-unstable")]
    let _span = tracing::trace_span!("connection handshake", connection_id = id, address = %address).entered();

    let mut stream = Transport::connect(
        &address,
        options.connect_timeout,
        #[cfg(feature = "rustls-tls")]
        tls_config.as_ref(),
    )
    .await?;

    let command = build_handshake_command(options);
    let reply = send_handshake(&mut stream, command, options.connect_timeout).await?;

    let stream_description = parse_stream_description(&reply)?;
    let compressor = negotiate_compressor(&stream_description.compressors, options);

    let mut connection = Connection::new(id, address, generation, stream);
    connection.stream_description = Some(stream_description);
    connection.compressor = compressor;

    if options.auth_mechanism.is_some() || options.auth_source.is_some() {
        #[cfg(feature = "tracing-unstable")]
        tracing::trace!("authenticating connection {}", id);
        authenticate(&mut connection, options).await.inspect_err(|error| {
            #[cfg(feature = "tracing-unstable")]
            tracing::warn!(%error, "authentication failed during handshake");
            let _ = error;
        })?;
    }

    Ok(connection)
}

fn build_handshake_command(options: &ClientOptions) -> Document {
    let mut command = Document::new();
    command.insert("hello", Bson::Int32(1));
    command.insert("helloOk", Bson::Boolean(true));

    let driver_info = DriverInfo::default();
    let mut client = Document::new();
    let mut driver = Document::new();
    driver.insert("name", Bson::String(driver_info.name));
    driver.insert("version", Bson::String(driver_info.version));
    client.insert("driver", Bson::Document(driver));

    let mut os = Document::new();
    os.insert("type", Bson::String(std::env::consts::OS.to_string()));
    client.insert("os", Bson::Document(os));

    if let Some(app_name) = &options.app_name {
        let mut application = Document::new();
        application.insert("name", Bson::String(app_name.clone()));
        client.insert("application", Bson::Document(application));
    }
    command.insert("client", Bson::Document(client));

    if !options.compressors.is_empty() {
        let names: Vec<Bson> = options
            .compressors
            .iter()
            .map(|c| Bson::String(compressor_name(*c).to_string()))
            .collect();
        command.insert("compression", Bson::Array(names));
    }

    if options.load_balanced {
        command.insert("loadBalanced", Bson::Boolean(true));
    }

    command.insert("$db", Bson::String("admin".to_string()));
    command
}

fn compressor_name(name: CompressorName) -> &'static str {
    match name {
        CompressorName::Snappy => "snappy",
        CompressorName::Zlib => "zlib",
        CompressorName::Zstd => "zstd",
    }
}

async fn send_handshake(stream: &mut Transport, command: Document, timeout: Duration) -> Result<Document> {
    // The handshake itself is always sent uncompressed and unauthenticated, so it goes straight
    // through the transport rather than `Connection::send_command`.
    let request_id = next_request_id();
    let frame = wire::message::encode_request(request_id, &Message::with_document(command));

    stream.write_all(&frame, Some(timeout)).await?;

    let mut header_bytes = [0u8; wire::header::HEADER_LEN];
    stream.read_exact(&mut header_bytes, Some(timeout)).await?;
    let header = wire::header::Header::from_bytes(header_bytes);
    let body_len = (header.length as usize).saturating_sub(wire::header::HEADER_LEN);
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body, Some(timeout)).await?;

    let message = wire::message::decode_frame(header, &body)?;
    let reply = message
        .command_document()
        .cloned()
        .ok_or_else(|| Error::invalid_argument("hello reply carried no command document"))?;

    let ok = matches!(reply.get("ok"), Some(Bson::Double(n)) if *n == 1.0)
        || matches!(reply.get("ok"), Some(Bson::Int32(1)));
    if !ok {
        return Err(Error::authentication("server rejected the handshake"));
    }
    Ok(reply)
}

fn parse_stream_description(reply: &Document) -> Result<StreamDescription> {
    let max_wire_version = match reply.get("maxWireVersion") {
        Some(Bson::Int32(v)) => *v,
        Some(Bson::Int64(v)) => *v as i32,
        _ => 0,
    };
    let max_bson_object_size = match reply.get("maxBsonObjectSize") {
        Some(Bson::Int32(v)) => *v as i64,
        Some(Bson::Int64(v)) => *v,
        _ => 16 * 1024 * 1024,
    };
    let max_message_size_bytes = match reply.get("maxMessageSizeBytes") {
        Some(Bson::Int32(v)) => *v as i64,
        Some(Bson::Int64(v)) => *v,
        _ => 48 * 1000 * 1000,
    };
    let max_write_batch_size = match reply.get("maxWriteBatchSize") {
        Some(Bson::Int32(v)) => *v as i64,
        Some(Bson::Int64(v)) => *v,
        _ => 100_000,
    };
    let compressors = match reply.get("compression") {
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|b| match b {
                Bson::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    let service_id = match reply.get("serviceId") {
        Some(Bson::ObjectId(id)) => Some(*id),
        _ => None,
    };
    let logical_session_timeout_minutes = match reply.get("logicalSessionTimeoutMinutes") {
        Some(Bson::Int32(v)) => Some(*v as i64),
        Some(Bson::Int64(v)) => Some(*v),
        _ => None,
    };

    Ok(StreamDescription {
        max_wire_version,
        max_bson_object_size,
        max_message_size_bytes,
        max_write_batch_size,
        compressors,
        service_id,
        logical_session_timeout_minutes,
    })
}

/// Picks the first of the client's preferred compressors that the server also advertised.
fn negotiate_compressor(server_compressors: &[String], options: &ClientOptions) -> Option<Compressor> {
    options.compressors.iter().find_map(|preferred| {
        let name = compressor_name(*preferred);
        if !server_compressors.iter().any(|s| s == name) {
            return None;
        }
        Some(match preferred {
            CompressorName::Snappy => Compressor::Snappy,
            CompressorName::Zlib => Compressor::Zlib {
                level: options.zlib_compression_level,
            },
            CompressorName::Zstd => Compressor::Zstd,
        })
    })
}

/// SCRAM/x.509 mechanism negotiation is out of scope for the core; this stub exists so the
/// establishment pipeline has a single place to wire a real authenticator in, and so that
/// misconfigured credentials fail fast rather than silently connecting unauthenticated.
async fn authenticate(_connection: &mut Connection, options: &ClientOptions) -> Result<()> {
    Err(ErrorKind::Authentication {
        message: format!(
            "authentication mechanism {:?} is not implemented by this core driver",
            options.auth_mechanism.as_deref().unwrap_or("default")
        ),
    }
    .into())
}
