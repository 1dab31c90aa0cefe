//! Codec round-trip and malformed-input tests

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;

use super::{read_variable_int, write_variable_int, Decoder, Encoder};
use crate::protocol::{
    ConnAck, Connect, ConnectCode, DecodeError, FilterRequest, Packet, PubAck, PubComp, PubRec,
    PubRel, Publish, QoS, SubAck, Subscribe, UnsubAck, Unsubscribe, Will, SUBACK_FAILURE,
};

fn round_trip(packet: Packet) -> Packet {
    let encoder = Encoder::new();
    let decoder = Decoder::new();

    let mut buf = BytesMut::new();
    encoder.encode(&packet, &mut buf).expect("encode failed");

    let (decoded, consumed) = decoder
        .decode(&buf)
        .expect("decode failed")
        .expect("incomplete packet");
    assert_eq!(consumed, buf.len());
    decoded
}

#[test]
fn test_variable_int_round_trip() {
    for value in [0u32, 1, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152] {
        let mut buf = BytesMut::new();
        write_variable_int(&mut buf, value).unwrap();
        let (decoded, consumed) = read_variable_int(&buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, buf.len());
    }
}

#[test]
fn test_variable_int_too_long() {
    // five continuation bytes is never valid
    let buf = [0x80u8, 0x80, 0x80, 0x80, 0x01];
    assert_eq!(
        read_variable_int(&buf),
        Err(DecodeError::InvalidRemainingLength)
    );
}

#[test]
fn test_connect_round_trip() {
    let packet = Packet::Connect(Box::new(Connect {
        protocol_name: "MQTT".to_string(),
        protocol_level: 4,
        client_id: "test-client".to_string(),
        clean_session: true,
        keep_alive: 30,
        username: Some("admin".to_string()),
        password: Some(Bytes::from_static(b"secret")),
        will: Some(Will {
            topic: "last/will".to_string(),
            payload: Bytes::from_static(b"gone"),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
    }));

    assert_eq!(round_trip(packet.clone()), packet);
}

#[test]
fn test_connect_minimal() {
    let packet = Packet::Connect(Box::new(Connect {
        client_id: "c1".to_string(),
        ..Connect::default()
    }));

    assert_eq!(round_trip(packet.clone()), packet);
}

#[test]
fn test_connect_unknown_level_passes_through() {
    // the broker, not the codec, rejects unsupported levels
    let packet = Packet::Connect(Box::new(Connect {
        protocol_level: 9,
        client_id: "c1".to_string(),
        ..Connect::default()
    }));

    match round_trip(packet) {
        Packet::Connect(c) => assert_eq!(c.protocol_level, 9),
        other => panic!("expected CONNECT, got {:?}", other),
    }
}

#[test]
fn test_connect_password_without_username_rejected() {
    let decoder = Decoder::new();
    // flags byte 0x42: clean session + password without username
    let raw = [
        0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x42, 0x00, 0x3C, 0x00, 0x02, b'c',
        b'1',
    ];
    assert_eq!(decoder.decode(&raw), Err(DecodeError::InvalidFlags));
}

#[test]
fn test_connack_round_trip() {
    let packet = Packet::ConnAck(ConnAck {
        session_present: true,
        code: ConnectCode::Accepted,
    });
    assert_eq!(round_trip(packet.clone()), packet);

    let rejected = Packet::ConnAck(ConnAck {
        session_present: false,
        code: ConnectCode::IdentifierRejected,
    });
    assert_eq!(round_trip(rejected.clone()), rejected);
}

#[test]
fn test_publish_qos0_round_trip() {
    let packet = Packet::Publish(Publish {
        dup: false,
        qos: QoS::AtMostOnce,
        retain: true,
        topic: Arc::from("sensor/temp"),
        packet_id: None,
        payload: Bytes::from_static(b"21"),
    });
    assert_eq!(round_trip(packet.clone()), packet);
}

#[test]
fn test_publish_qos2_round_trip() {
    let packet = Packet::Publish(Publish {
        dup: true,
        qos: QoS::ExactlyOnce,
        retain: false,
        topic: Arc::from("a/b/c"),
        packet_id: Some(0x1234),
        payload: Bytes::from_static(b"payload"),
    });
    assert_eq!(round_trip(packet.clone()), packet);
}

#[test]
fn test_publish_qos0_has_no_packet_id_on_wire() {
    let encoder = Encoder::new();
    let mut buf = BytesMut::new();
    encoder
        .encode(
            &Packet::Publish(Publish {
                topic: Arc::from("t"),
                payload: Bytes::from_static(b"x"),
                ..Publish::default()
            }),
            &mut buf,
        )
        .unwrap();

    // fixed header (2) + topic length prefix (2) + topic (1) + payload (1)
    assert_eq!(buf.len(), 6);
}

#[test]
fn test_publish_wildcard_topic_rejected() {
    let decoder = Decoder::new();
    // PUBLISH QoS 0 with topic "a/+"
    let raw = [0x30, 0x05, 0x00, 0x03, b'a', b'/', b'+'];
    assert!(matches!(
        decoder.decode(&raw),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_publish_qos1_packet_id_zero_rejected() {
    let decoder = Decoder::new();
    let raw = [0x32, 0x05, 0x00, 0x01, b't', 0x00, 0x00];
    assert!(matches!(
        decoder.decode(&raw),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_publish_dup_on_qos0_rejected() {
    let decoder = Decoder::new();
    let raw = [0x38, 0x03, 0x00, 0x01, b't'];
    assert!(matches!(
        decoder.decode(&raw),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_ack_round_trips() {
    for packet in [
        Packet::PubAck(PubAck { packet_id: 7 }),
        Packet::PubRec(PubRec { packet_id: 8 }),
        Packet::PubRel(PubRel { packet_id: 9 }),
        Packet::PubComp(PubComp { packet_id: 10 }),
        Packet::UnsubAck(UnsubAck { packet_id: 11 }),
    ] {
        assert_eq!(round_trip(packet.clone()), packet);
    }
}

#[test]
fn test_pubrel_requires_reserved_flags() {
    let decoder = Decoder::new();
    // PUBREL with flags 0000 instead of the mandatory 0010
    let raw = [0x60, 0x02, 0x00, 0x01];
    assert_eq!(decoder.decode(&raw), Err(DecodeError::InvalidFlags));
}

#[test]
fn test_subscribe_round_trip() {
    let packet = Packet::Subscribe(Subscribe {
        packet_id: 42,
        filters: vec![
            FilterRequest {
                filter: "a/+/c".to_string(),
                qos: QoS::AtLeastOnce,
            },
            FilterRequest {
                filter: "d/#".to_string(),
                qos: QoS::ExactlyOnce,
            },
        ],
    });
    assert_eq!(round_trip(packet.clone()), packet);
}

#[test]
fn test_subscribe_empty_payload_rejected() {
    let decoder = Decoder::new();
    let raw = [0x82, 0x02, 0x00, 0x01];
    assert!(matches!(
        decoder.decode(&raw),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_suback_round_trip() {
    let packet = Packet::SubAck(SubAck {
        packet_id: 42,
        return_codes: vec![0x00, 0x01, 0x02, SUBACK_FAILURE],
    });
    assert_eq!(round_trip(packet.clone()), packet);
}

#[test]
fn test_unsubscribe_round_trip() {
    let packet = Packet::Unsubscribe(Unsubscribe {
        packet_id: 43,
        filters: vec!["a/b".to_string(), "c/#".to_string()],
    });
    assert_eq!(round_trip(packet.clone()), packet);
}

#[test]
fn test_empty_packets_round_trip() {
    for packet in [Packet::PingReq, Packet::PingResp, Packet::Disconnect] {
        assert_eq!(round_trip(packet.clone()), packet);
    }
}

#[test]
fn test_disconnect_with_payload_rejected() {
    let decoder = Decoder::new();
    let raw = [0xE0, 0x01, 0x00];
    assert!(matches!(
        decoder.decode(&raw),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_incomplete_packet_returns_none() {
    let decoder = Decoder::new();

    // empty and single-byte buffers
    assert_eq!(decoder.decode(&[]).unwrap(), None);
    assert_eq!(decoder.decode(&[0x30]).unwrap(), None);

    // header promises more bytes than buffered
    let raw = [0x30, 0x0A, 0x00, 0x03, b'a'];
    assert_eq!(decoder.decode(&raw).unwrap(), None);
}

#[test]
fn test_two_packets_in_one_buffer() {
    let encoder = Encoder::new();
    let decoder = Decoder::new();

    let mut buf = BytesMut::new();
    encoder.encode(&Packet::PingReq, &mut buf).unwrap();
    encoder
        .encode(&Packet::PubAck(PubAck { packet_id: 3 }), &mut buf)
        .unwrap();

    let (first, consumed) = decoder.decode(&buf).unwrap().unwrap();
    assert_eq!(first, Packet::PingReq);

    let (second, _) = decoder.decode(&buf[consumed..]).unwrap().unwrap();
    assert_eq!(second, Packet::PubAck(PubAck { packet_id: 3 }));
}

#[test]
fn test_packet_size_limit() {
    let decoder = Decoder::new().with_max_packet_size(16);
    // remaining length of 200 exceeds the 16-byte limit
    let raw = [0x30, 0xC8, 0x01, 0x00];
    assert_eq!(decoder.decode(&raw), Err(DecodeError::PacketTooLarge));
}

#[test]
fn test_invalid_utf8_topic_rejected() {
    let decoder = Decoder::new();
    let raw = [0x30, 0x04, 0x00, 0x02, 0xFF, 0xFE];
    assert_eq!(decoder.decode(&raw), Err(DecodeError::InvalidUtf8));
}

#[test]
fn test_reserved_packet_type_rejected() {
    let decoder = Decoder::new();
    let raw = [0xF0, 0x00];
    assert_eq!(decoder.decode(&raw), Err(DecodeError::InvalidPacketType(15)));
}
