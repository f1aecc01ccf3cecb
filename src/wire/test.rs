use super::*;
use crate::{bson::document::Document, doc};
use header::HEADER_LEN;

#[test]
fn round_trips_a_simple_command() {
    let cmd = doc! { "ping".to_string() => crate::bson::Bson::Int32(1) };
    let message = Message::with_document(cmd.clone());
    let request_id = 7;
    let frame = message::encode_request(request_id, &message);

    let header = Header::from_bytes(frame[0..HEADER_LEN].try_into().unwrap());
    assert_eq!(header.op_code, OP_MSG);
    assert_eq!(header.request_id, request_id);

    let decoded = message::decode_frame(header, &frame[HEADER_LEN..]).unwrap();
    assert_eq!(decoded.command_document(), Some(&cmd));
}

#[test]
fn rejects_wrong_opcode() {
    let header = Header {
        length: (HEADER_LEN + 4) as i32,
        request_id: 1,
        response_to: 0,
        op_code: 9999,
    };
    let err = message::decode_frame(header, &[0, 0, 0, 0]).unwrap_err();
    assert!(matches!(err, WireError::UnexpectedOpcode { .. }));
}

#[test]
fn kind_one_section_round_trips() {
    let identifier = "documents".to_string();
    let documents = vec![
        doc! { "_id".to_string() => crate::bson::Bson::Int32(1) },
        doc! { "_id".to_string() => crate::bson::Bson::Int32(2) },
    ];
    let message = Message {
        flags: MessageFlags::new(),
        sections: vec![Section::Sequence { identifier: identifier.clone(), documents: documents.clone() }],
        checksum: None,
    };
    let body = message.encode_body();
    let decoded = Message::decode_body(&body).unwrap();
    match &decoded.sections[0] {
        Section::Sequence { identifier: id, documents: docs } => {
            assert_eq!(id, &identifier);
            assert_eq!(docs, &documents);
        }
        _ => panic!("expected a Kind 1 section"),
    }
}

#[test]
fn checksum_detects_corruption() {
    let cmd: Document = doc! { "x".to_string() => crate::bson::Bson::Int32(1) };
    let message = Message {
        flags: MessageFlags::new().with_checksum_present(true),
        sections: vec![Section::Document(cmd)],
        checksum: None,
    };
    let mut body = message.encode_body();
    let last = body.len() - 1;
    body[last] ^= 0xFF;
    let err = Message::decode_body(&body).unwrap_err();
    assert_eq!(err, WireError::ChecksumMismatch);
}

#[test]
fn sensitive_commands_are_never_compressed() {
    assert!(is_sensitive_command("hello"));
    assert!(is_sensitive_command("saslStart"));
    assert!(!is_sensitive_command("find"));
    assert!(!is_sensitive_command("aggregate"));
}

#[cfg(feature = "snappy-compression")]
#[test]
fn compressed_frame_round_trips() {
    let cmd = doc! { "find".to_string() => crate::bson::Bson::String("coll".into()) };
    let message = Message::with_document(cmd.clone());
    let frame = compression::wrap_request(1, &message, Compressor::Snappy).unwrap();
    let header = Header::from_bytes(frame[0..HEADER_LEN].try_into().unwrap());
    assert_eq!(header.op_code, OP_COMPRESSED);
    let (original_opcode, body) = compression::unwrap_reply(header, &frame[HEADER_LEN..]).unwrap();
    assert_eq!(original_opcode, OP_MSG);
    let decoded = Message::decode_body(&body).unwrap();
    assert_eq!(decoded.command_document(), Some(&cmd));
}
