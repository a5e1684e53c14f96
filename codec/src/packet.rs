// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{
    AuthPacket, ByteArray, ConnectAckPacket, ConnectPacket, DecodeError, DecodePacket,
    DisconnectPacket, EncodeError, EncodePacket, FixedHeader, PacketType, PingRequestPacket,
    PingResponsePacket, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, SubscribeAckPacket, SubscribePacket,
    UnsubscribeAckPacket, UnsubscribePacket,
};

/// One decoded MQTT control packet of any type.
///
/// The packet codec itself is a pair of free operations: [`MqttPacket::decode`]
/// turns one framed packet into the matching variant, and
/// [`EncodePacket::encode`] writes a variant back out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MqttPacket {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl MqttPacket {
    /// Get packet type of inner packet.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        use crate::Packet;
        match self {
            Self::Connect(packet) => packet.packet_type(),
            Self::ConnectAck(packet) => packet.packet_type(),
            Self::Publish(packet) => packet.packet_type(),
            Self::PublishAck(packet) => packet.packet_type(),
            Self::PublishReceived(packet) => packet.packet_type(),
            Self::PublishRelease(packet) => packet.packet_type(),
            Self::PublishComplete(packet) => packet.packet_type(),
            Self::Subscribe(packet) => packet.packet_type(),
            Self::SubscribeAck(packet) => packet.packet_type(),
            Self::Unsubscribe(packet) => packet.packet_type(),
            Self::UnsubscribeAck(packet) => packet.packet_type(),
            Self::PingRequest(packet) => packet.packet_type(),
            Self::PingResponse(packet) => packet.packet_type(),
            Self::Disconnect(packet) => packet.packet_type(),
            Self::Auth(packet) => packet.packet_type(),
        }
    }

    /// Decode one complete packet from `ba`.
    ///
    /// `ba` is expected to start at a packet boundary. The decoder of the
    /// dispatched packet type MUST consume exactly `remaining_length` bytes
    /// of body; trailing or missing bytes are malformed [MQTT-2.1.1].
    ///
    /// # Errors
    ///
    /// Returns error if bytes in `ba` do not form a valid packet.
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if ba.remaining_bytes() < fixed_header.remaining_length() {
            return Err(DecodeError::InvalidRemainingLength);
        }
        ba.reset_offset();

        let packet = match fixed_header.packet_type() {
            PacketType::Connect => Self::Connect(ConnectPacket::decode(ba)?),
            PacketType::ConnectAck => Self::ConnectAck(ConnectAckPacket::decode(ba)?),
            PacketType::Publish { .. } => Self::Publish(PublishPacket::decode(ba)?),
            PacketType::PublishAck => Self::PublishAck(PublishAckPacket::decode(ba)?),
            PacketType::PublishReceived => {
                Self::PublishReceived(PublishReceivedPacket::decode(ba)?)
            }
            PacketType::PublishRelease => Self::PublishRelease(PublishReleasePacket::decode(ba)?),
            PacketType::PublishComplete => {
                Self::PublishComplete(PublishCompletePacket::decode(ba)?)
            }
            PacketType::Subscribe => Self::Subscribe(SubscribePacket::decode(ba)?),
            PacketType::SubscribeAck => Self::SubscribeAck(SubscribeAckPacket::decode(ba)?),
            PacketType::Unsubscribe => Self::Unsubscribe(UnsubscribePacket::decode(ba)?),
            PacketType::UnsubscribeAck => Self::UnsubscribeAck(UnsubscribeAckPacket::decode(ba)?),
            PacketType::PingRequest => Self::PingRequest(PingRequestPacket::decode(ba)?),
            PacketType::PingResponse => Self::PingResponse(PingResponsePacket::decode(ba)?),
            PacketType::Disconnect => Self::Disconnect(DisconnectPacket::decode(ba)?),
            PacketType::Auth => Self::Auth(AuthPacket::decode(ba)?),
        };

        // The decoder must consume exactly the announced body.
        if ba.offset() != fixed_header.bytes() + fixed_header.remaining_length() {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(packet)
    }
}

impl EncodePacket for MqttPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        match self {
            Self::Connect(packet) => packet.encode(buf),
            Self::ConnectAck(packet) => packet.encode(buf),
            Self::Publish(packet) => packet.encode(buf),
            Self::PublishAck(packet) => packet.encode(buf),
            Self::PublishReceived(packet) => packet.encode(buf),
            Self::PublishRelease(packet) => packet.encode(buf),
            Self::PublishComplete(packet) => packet.encode(buf),
            Self::Subscribe(packet) => packet.encode(buf),
            Self::SubscribeAck(packet) => packet.encode(buf),
            Self::Unsubscribe(packet) => packet.encode(buf),
            Self::UnsubscribeAck(packet) => packet.encode(buf),
            Self::PingRequest(packet) => packet.encode(buf),
            Self::PingResponse(packet) => packet.encode(buf),
            Self::Disconnect(packet) => packet.encode(buf),
            Self::Auth(packet) => packet.encode(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketId, QoS};

    #[test]
    fn test_mqtt_packet_dispatch() {
        let publish = PublishPacket::new("hello", QoS::AtMostOnce, b"msg").unwrap();
        let mut buf = Vec::new();
        publish.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let packet = MqttPacket::decode(&mut ba).unwrap();
        assert_eq!(packet, MqttPacket::Publish(publish));
    }

    #[test]
    fn test_mqtt_packet_round_trip() {
        let packets = vec![
            MqttPacket::PublishAck(PublishAckPacket::new(PacketId::new(1))),
            MqttPacket::PingRequest(PingRequestPacket::new()),
            MqttPacket::PingResponse(PingResponsePacket::new()),
            MqttPacket::Disconnect(DisconnectPacket::new()),
        ];
        for packet in packets {
            let mut buf = Vec::new();
            packet.encode(&mut buf).unwrap();
            let mut ba = ByteArray::new(&buf);
            let decoded = MqttPacket::decode(&mut ba).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_mqtt_packet_trailing_bytes() {
        // PINGRESP with a lying remaining length.
        let buf = [0xd0, 0x01, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            MqttPacket::decode(&mut ba),
            Err(DecodeError::InvalidRemainingLength)
        );
    }

    #[test]
    fn test_mqtt_packet_truncated_body() {
        // SUBACK announcing 5 body bytes with only 3 available.
        let buf = [0x90, 0x05, 0x00, 0x02, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            MqttPacket::decode(&mut ba),
            Err(DecodeError::InvalidRemainingLength)
        );
    }
}
