//! 借助外部编解码器收发投递内容。

use spark_amqp::{CodecError, EngineError};

use super::support::*;

#[test]
fn decoded_value_waits_for_whole_frame() {
    let mut connection = collected_connection();
    let (session, sender) = open_sender(&mut connection, "out", 1);
    let receiver = open_receiver(&mut connection, session, "in");

    let outgoing = connection.delivery(sender, &b"s"[..]).unwrap();
    let written = connection
        .send_encoded(outgoing, &Utf8Frames, "hello")
        .unwrap();
    assert_eq!(written, 7);
    let wire = connection.drain_outgoing(outgoing, usize::MAX).unwrap();

    let incoming = connection.delivery(receiver, &b"r"[..]).unwrap();
    assert_eq!(connection.recv_decoded(incoming, &Utf8Frames).unwrap(), None);

    connection.push_incoming(incoming, &wire[..4]).unwrap();
    assert_eq!(connection.recv_decoded(incoming, &Utf8Frames).unwrap(), None);
    assert_eq!(connection.pending(incoming).unwrap(), 4);

    connection.push_incoming(incoming, &wire[4..]).unwrap();
    assert_eq!(
        connection
            .recv_decoded(incoming, &Utf8Frames)
            .unwrap()
            .as_deref(),
        Some("hello")
    );
    assert_eq!(connection.pending(incoming).unwrap(), 0);
    assert_eq!(connection.session_ref(session).unwrap().incoming_bytes(), 0);
}

#[test]
fn truncated_complete_delivery_is_a_codec_error() {
    let mut connection = collected_connection();
    let session = open_session(&mut connection);
    let receiver = open_receiver(&mut connection, session, "in");
    let delivery = connection.delivery(receiver, &b"r"[..]).unwrap();
    connection.push_incoming(delivery, &[0x00, 0x05, b'h']).unwrap();
    connection.set_complete(delivery).unwrap();

    let err = connection
        .recv_decoded(delivery, &Utf8Frames)
        .unwrap_err();
    assert!(err.is_codec());
    assert!(matches!(
        err,
        EngineError::Codec(CodecError::Truncated {
            needed: 7,
            available: 3
        })
    ));
    assert_eq!(connection.pending(delivery).unwrap(), 3);
}

#[test]
fn malformed_payload_is_reported() {
    let mut connection = collected_connection();
    let session = open_session(&mut connection);
    let receiver = open_receiver(&mut connection, session, "in");
    let delivery = connection.delivery(receiver, &b"r"[..]).unwrap();
    connection
        .push_incoming(delivery, &[0x00, 0x02, 0xff, 0xfe])
        .unwrap();

    let err = connection
        .recv_decoded(delivery, &Utf8Frames)
        .unwrap_err();
    assert!(matches!(err, EngineError::Codec(CodecError::Invalid { .. })));
    assert_eq!(err.code(), "amqp.codec.failure");
}
