//! MQTT v3.1.1 packet decoder

use std::sync::Arc;

use bytes::Bytes;

use super::{read_binary, read_string, read_variable_int, MAX_REMAINING_LENGTH};
use crate::protocol::{
    ConnAck, Connect, ConnectCode, DecodeError, FilterRequest, Packet, PubAck, PubComp, PubRec,
    PubRel, Publish, QoS, SubAck, Subscribe, UnsubAck, Unsubscribe, Will,
};

/// Incremental packet decoder
pub struct Decoder {
    /// Maximum accepted packet size
    max_packet_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_REMAINING_LENGTH,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_REMAINING_LENGTH);
        self
    }

    /// Decode a packet from the buffer
    ///
    /// Returns `Ok(None)` while the buffer does not yet hold a complete
    /// packet, `Ok(Some((packet, bytes_consumed)))` on success.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        // Fixed header
        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let payload_start = 1 + len_bytes;
        let payload = &buf[payload_start..total_len];

        let packet = match packet_type {
            1 => decode_connect(flags, payload)?,
            2 => decode_connack(flags, payload)?,
            3 => decode_publish(flags, payload)?,
            4 => Packet::PubAck(PubAck {
                packet_id: decode_ack(flags, payload, 0x00)?,
            }),
            5 => Packet::PubRec(PubRec {
                packet_id: decode_ack(flags, payload, 0x00)?,
            }),
            6 => Packet::PubRel(PubRel {
                packet_id: decode_ack(flags, payload, 0x02)?,
            }),
            7 => Packet::PubComp(PubComp {
                packet_id: decode_ack(flags, payload, 0x00)?,
            }),
            8 => decode_subscribe(flags, payload)?,
            9 => decode_suback(flags, payload)?,
            10 => decode_unsubscribe(flags, payload)?,
            11 => Packet::UnsubAck(UnsubAck {
                packet_id: decode_ack(flags, payload, 0x00)?,
            }),
            12 => decode_empty(flags, payload, Packet::PingReq)?,
            13 => decode_empty(flags, payload, Packet::PingResp)?,
            14 => decode_empty(flags, payload, Packet::Disconnect)?,
            _ => return Err(DecodeError::InvalidPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_connect(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    if flags != 0 {
        return Err(DecodeError::InvalidFlags);
    }

    let mut pos = 0;

    // Protocol name - structural check only, the broker validates the value
    // together with the level and answers with CONNACK 0x01 if unsupported
    let (protocol_name, len) = read_string(&payload[pos..])?;
    pos += len;

    if pos >= payload.len() {
        return Err(DecodeError::InsufficientData);
    }
    let protocol_level = payload[pos];
    pos += 1;

    if pos >= payload.len() {
        return Err(DecodeError::InsufficientData);
    }
    let connect_flags = payload[pos];
    pos += 1;

    // Reserved bit must be 0
    if (connect_flags & 0x01) != 0 {
        return Err(DecodeError::InvalidFlags);
    }

    let clean_session = (connect_flags & 0x02) != 0;
    let will_flag = (connect_flags & 0x04) != 0;
    let will_qos = (connect_flags >> 3) & 0x03;
    let will_retain = (connect_flags & 0x20) != 0;
    let password_flag = (connect_flags & 0x40) != 0;
    let username_flag = (connect_flags & 0x80) != 0;

    // [MQTT-3.1.2-22] password flag requires the username flag
    if !username_flag && password_flag {
        return Err(DecodeError::InvalidFlags);
    }

    if will_qos > 2 {
        return Err(DecodeError::InvalidQoS(will_qos));
    }

    // Will QoS and retain must be 0 when the will flag is 0
    if !will_flag && (will_qos != 0 || will_retain) {
        return Err(DecodeError::InvalidFlags);
    }

    if pos + 2 > payload.len() {
        return Err(DecodeError::InsufficientData);
    }
    let keep_alive = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
    pos += 2;

    let (client_id, len) = read_string(&payload[pos..])?;
    pos += len;

    let will = if will_flag {
        let (will_topic, len) = read_string(&payload[pos..])?;
        pos += len;

        let (will_payload, len) = read_binary(&payload[pos..])?;
        pos += len;

        Some(Will {
            topic: will_topic.to_string(),
            payload: Bytes::copy_from_slice(will_payload),
            // checked above
            qos: QoS::from_u8(will_qos).ok_or(DecodeError::InvalidQoS(will_qos))?,
            retain: will_retain,
        })
    } else {
        None
    };

    let username = if username_flag {
        let (s, len) = read_string(&payload[pos..])?;
        pos += len;
        Some(s.to_string())
    } else {
        None
    };

    let password = if password_flag {
        let (data, _len) = read_binary(&payload[pos..])?;
        Some(Bytes::copy_from_slice(data))
    } else {
        None
    };

    Ok(Packet::Connect(Box::new(Connect {
        protocol_name: protocol_name.to_string(),
        protocol_level,
        client_id: client_id.to_string(),
        clean_session,
        keep_alive,
        username,
        password,
        will,
    })))
}

fn decode_connack(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    if flags != 0 {
        return Err(DecodeError::InvalidFlags);
    }

    if payload.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let acknowledge_flags = payload[0];
    // Only bit 0 (session present) is valid
    if (acknowledge_flags & 0xFE) != 0 {
        return Err(DecodeError::InvalidFlags);
    }

    let session_present = (acknowledge_flags & 0x01) != 0;
    let code = ConnectCode::from_u8(payload[1])
        .ok_or(DecodeError::MalformedPacket("unknown connect return code"))?;

    Ok(Packet::ConnAck(ConnAck {
        session_present,
        code,
    }))
}

fn decode_publish(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    let dup = (flags & 0x08) != 0;
    let qos_bits = (flags >> 1) & 0x03;
    let retain = (flags & 0x01) != 0;

    let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

    // [MQTT-3.3.1-2] DUP must be 0 for QoS 0
    if qos == QoS::AtMostOnce && dup {
        return Err(DecodeError::MalformedPacket("DUP must be 0 for QoS 0"));
    }

    let mut pos = 0;

    let (topic, len) = read_string(&payload[pos..])?;
    pos += len;

    if topic.is_empty() {
        return Err(DecodeError::MalformedPacket("empty topic name"));
    }

    // Wildcards are never valid in a published topic
    if topic.contains('+') || topic.contains('#') {
        return Err(DecodeError::MalformedPacket("topic contains wildcard"));
    }

    let packet_id = if qos != QoS::AtMostOnce {
        if pos + 2 > payload.len() {
            return Err(DecodeError::InsufficientData);
        }
        let id = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
        if id == 0 {
            return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
        }
        pos += 2;
        Some(id)
    } else {
        None
    };

    let message_payload = Bytes::copy_from_slice(&payload[pos..]);

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic: Arc::from(topic),
        packet_id,
        payload: message_payload,
    }))
}

/// Decode the packet-identifier-only acknowledgment packets
/// (PUBACK/PUBREC/PUBREL/PUBCOMP/UNSUBACK share the shape)
fn decode_ack(flags: u8, payload: &[u8], expected_flags: u8) -> Result<u16, DecodeError> {
    if flags != expected_flags {
        return Err(DecodeError::InvalidFlags);
    }

    if payload.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    Ok(u16::from_be_bytes([payload[0], payload[1]]))
}

fn decode_subscribe(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    // SUBSCRIBE must have flags 0010
    if flags != 0x02 {
        return Err(DecodeError::InvalidFlags);
    }

    if payload.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let packet_id = u16::from_be_bytes([payload[0], payload[1]]);
    if packet_id == 0 {
        return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
    }

    let mut pos = 2;
    let mut filters = Vec::new();
    while pos < payload.len() {
        let (filter, len) = read_string(&payload[pos..])?;
        pos += len;

        // [MQTT-4.7.3-1] topic filters are at least one character long
        if filter.is_empty() {
            return Err(DecodeError::MalformedPacket("topic filter cannot be empty"));
        }

        if pos >= payload.len() {
            return Err(DecodeError::InsufficientData);
        }

        let qos_byte = payload[pos];
        pos += 1;

        // Upper six bits of the requested QoS byte are reserved
        if (qos_byte & 0xFC) != 0 {
            return Err(DecodeError::MalformedPacket("reserved QoS bits set"));
        }

        let qos = QoS::from_u8(qos_byte).ok_or(DecodeError::InvalidQoS(qos_byte))?;

        filters.push(FilterRequest {
            filter: filter.to_string(),
            qos,
        });
    }

    // [MQTT-3.8.3-3] SUBSCRIBE must carry at least one filter
    if filters.is_empty() {
        return Err(DecodeError::MalformedPacket(
            "SUBSCRIBE must have at least one topic",
        ));
    }

    Ok(Packet::Subscribe(Subscribe { packet_id, filters }))
}

fn decode_suback(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    if flags != 0 {
        return Err(DecodeError::InvalidFlags);
    }

    if payload.len() < 3 {
        return Err(DecodeError::InsufficientData);
    }

    let packet_id = u16::from_be_bytes([payload[0], payload[1]]);
    let mut return_codes = Vec::with_capacity(payload.len() - 2);

    for &code in &payload[2..] {
        match code {
            0x00..=0x02 | crate::protocol::SUBACK_FAILURE => return_codes.push(code),
            _ => return Err(DecodeError::MalformedPacket("unknown SUBACK return code")),
        }
    }

    Ok(Packet::SubAck(SubAck {
        packet_id,
        return_codes,
    }))
}

fn decode_unsubscribe(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    // UNSUBSCRIBE must have flags 0010
    if flags != 0x02 {
        return Err(DecodeError::InvalidFlags);
    }

    if payload.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let packet_id = u16::from_be_bytes([payload[0], payload[1]]);
    if packet_id == 0 {
        return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
    }

    let mut pos = 2;
    let mut filters = Vec::new();
    while pos < payload.len() {
        let (filter, len) = read_string(&payload[pos..])?;
        pos += len;

        if filter.is_empty() {
            return Err(DecodeError::MalformedPacket("topic filter cannot be empty"));
        }

        filters.push(filter.to_string());
    }

    if filters.is_empty() {
        return Err(DecodeError::MalformedPacket(
            "UNSUBSCRIBE must have at least one topic",
        ));
    }

    Ok(Packet::Unsubscribe(Unsubscribe { packet_id, filters }))
}

fn decode_empty(flags: u8, payload: &[u8], packet: Packet) -> Result<Packet, DecodeError> {
    if flags != 0 {
        return Err(DecodeError::InvalidFlags);
    }
    // PINGREQ/PINGRESP/DISCONNECT carry no payload in v3.1.1
    if !payload.is_empty() {
        return Err(DecodeError::MalformedPacket("unexpected payload"));
    }
    Ok(packet)
}
