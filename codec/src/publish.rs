// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use bytes::Bytes;
use std::io::Write;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketId, PacketType, Properties, PubTopic, QoS, VarIntError,
};

/// `PublishPacket` is used to transport application messages from the Client
/// to the Server, or from the Server to the Client.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Topic name length     |
/// |                       |
/// +-----------------------+
/// | Topic name ...        |
/// +-----------------------+
/// | Packet Identifier     |
/// |                       |
/// +-----------------------+
/// | Properties ...        |
/// +-----------------------+
/// | Msg payload ...       |
/// +-----------------------+
/// ```
///
/// Note that the packet identifier only appears in `QoS` 1 and `QoS` 2 packets.
///
/// Response of `PublishPacket`:
/// - `QoS` 0, no response
/// - `QoS` 1, `PublishAckPacket`
/// - `QoS` 2, `PublishReceivedPacket`
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishPacket {
    /// If the DUP flag is 0, this is the first occasion the sender has
    /// attempted to send this packet. If it is 1, this might be a
    /// re-delivery of an earlier attempt [MQTT-3.3.1-1].
    ///
    /// The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
    dup: bool,

    /// Level of assurance for delivery of this message.
    ///
    /// A PUBLISH packet MUST NOT have both QoS bits set to 1 [MQTT-3.3.1-4].
    qos: QoS,

    /// If the RETAIN flag is 1, the Server stores the message so it can be
    /// delivered to future subscribers of the topic [MQTT-3.3.1-5].
    retain: bool,

    /// The Topic Name identifies the information channel to which the payload
    /// is published. It MUST be present as the first field in the variable
    /// header [MQTT-3.3.2-1] and MUST NOT contain wildcard characters
    /// [MQTT-3.3.2-2].
    topic: PubTopic,

    /// Only present in PUBLISH packets where the QoS level is 1 or 2.
    ///
    /// Kept at 0 for QoS 0 packets.
    packet_id: PacketId,

    properties: Properties,

    /// Message body. A zero length payload is valid.
    ///
    /// Stored as shared bytes so a packet delivered to several subscribers
    /// is cloned without copying the payload.
    msg: Bytes,
}

impl PublishPacket {
    /// Create a new publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, msg: &[u8]) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        Ok(Self {
            qos,
            topic,
            msg: Bytes::copy_from_slice(msg),
            ..Self::default()
        })
    }

    /// Update `retain` flag.
    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    /// Get current `retain` flag.
    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Update `dup` flag.
    ///
    /// # Errors
    ///
    /// Returns error if `dup` flag is set on a `QoS` 0 packet.
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        // The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        self.dup = dup;
        Ok(self)
    }

    /// Get current `dup` flag.
    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    /// Update `qos` value.
    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        if qos == QoS::AtMostOnce {
            self.packet_id = PacketId::new(0);
            self.dup = false;
        }
        self.qos = qos;
        self
    }

    /// Get current `qos` value.
    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Update packet id.
    ///
    /// The packet id field is only present in publish packets where the
    /// `QoS` level is 1 or 2.
    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    /// Get current packet id.
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Update topic value.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn set_topic(&mut self, topic: &str) -> Result<&mut Self, EncodeError> {
        self.topic = PubTopic::new(topic)?;
        Ok(self)
    }

    /// Get current topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    /// Get a mutable reference to property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Get a reference to property list.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a reference to message payload.
    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length =
            self.topic.bytes() + self.properties.bytes() + self.msg.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += PacketId::bytes();
        }

        let packet_type = PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        };
        FixedHeader::new(packet_type, remaining_length)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;

        let (dup, qos, retain) =
            if let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() {
                (dup, qos, retain)
            } else {
                return Err(DecodeError::InvalidPacketType);
            };

        let body_start = ba.offset();

        let topic = PubTopic::decode(ba)?;

        // A PUBLISH packet MUST NOT contain a packet identifier if its QoS
        // value is set to 0 [MQTT-2.2.1-2].
        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            // A non-zero packet identifier is required for QoS 1 and 2
            // packets [MQTT-2.2.1-3].
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = Properties::decode(ba)?;
        properties.validate_unique()?;

        // The payload spans the rest of the packet; a zero length payload
        // is valid.
        let header_len = ba.offset() - body_start;
        if fixed_header.remaining_length() < header_len {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let msg_len = fixed_header.remaining_length() - header_len;

        let msg = Bytes::copy_from_slice(ba.read_bytes(msg_len)?);
        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(v)?;

        // Write variable header
        self.topic.encode(v)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(v)?;
        }
        self.properties.encode(v)?;

        // Write payload
        v.write_all(&self.msg)?;

        Ok(v.len() - old_len)
    }
}

impl Packet for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = self.get_fixed_header()?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_qos0_encode() {
        let packet = PublishPacket::new("hello", QoS::AtMostOnce, b"msg").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(
            &buf,
            &[0x30, 0x0b, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o', 0x00, b'm', b's', b'g']
        );
    }

    #[test]
    fn test_publish_qos1_round_trip() {
        let mut packet = PublishPacket::new("test/topic", QoS::AtLeastOnce, b"payload").unwrap();
        packet.set_packet_id(PacketId::new(17));
        packet.set_retain(true);

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.packet_id(), PacketId::new(17));
        assert_eq!(decoded.message(), b"payload");
        assert!(decoded.retain());
    }

    #[test]
    fn test_publish_qos1_zero_packet_id() {
        let buf = [
            0x32, 0x0a, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o', 0x00, 0x00, 0x00,
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketId)
        );
    }

    #[test]
    fn test_publish_empty_payload() {
        let packet = PublishPacket::new("hello", QoS::AtMostOnce, b"").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert!(decoded.message().is_empty());
    }

    #[test]
    fn test_publish_dup_on_qos0() {
        let mut packet = PublishPacket::new("hello", QoS::AtMostOnce, b"msg").unwrap();
        assert!(packet.set_dup(true).is_err());

        let mut packet = PublishPacket::new("hello", QoS::AtLeastOnce, b"msg").unwrap();
        assert!(packet.set_dup(true).is_ok());
    }
}
