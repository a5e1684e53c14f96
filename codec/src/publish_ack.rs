// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketId, PacketType, Properties, ReasonCode, VarIntError,
};

/// Acknowledge packet for Publish message in `QoS` 1.
///
/// Basic packet structure:
/// ```txt
///  7                  0
/// +--------------------+
/// | Fixed header       |
/// |                    |
/// +--------------------+
/// | Packet id          |
/// |                    |
/// +--------------------+
/// | Reason Code        |
/// +--------------------+
/// | Property Length    |
/// +--------------------+
/// | Properties ...     |
/// +--------------------+
/// ```
///
/// The Reason Code and Property Length can be omitted if the Reason Code
/// is 0x00 (Success) and there are no Properties. In this case the PUBACK
/// has a Remaining Length of 2.
///
/// This type of packet does not contain a payload.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishAckPacket {
    packet_id: PacketId,

    /// Byte 3 in the variable header is the PUBACK Reason Code. If the
    /// Remaining Length is 2, there is no Reason Code and the value
    /// of 0x00 (Success) is used.
    reason_code: ReasonCode,

    /// If the Remaining Length is less than 4 there is no Property Length
    /// and properties are empty.
    properties: Properties,
}

/// The Client or Server sending the PUBACK packet MUST use one of the PUBACK
/// Reason Codes [MQTT-3.4.2-1].
pub const PUBLISH_ACK_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoMatchingSubscribers,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketIdentifierInUse,
    ReasonCode::QuotaExceeded,
    ReasonCode::PayloadFormatInvalid,
];

impl PublishAckPacket {
    /// Create a new publish ack packet with `packet_id`.
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        Self {
            packet_id,
            ..Self::default()
        }
    }

    /// Update packet id.
    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    /// Get current packet id.
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Update reason code.
    ///
    /// # Errors
    ///
    /// Returns error if `reason_code` is not in the `PUBLISH_ACK_REASONS` list.
    pub fn set_reason_code(&mut self, reason_code: ReasonCode) -> Result<&mut Self, EncodeError> {
        if !PUBLISH_ACK_REASONS.contains(&reason_code) {
            return Err(EncodeError::InvalidReasonCode);
        }
        self.reason_code = reason_code;
        Ok(self)
    }

    /// Get current reason code.
    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        self.reason_code
    }

    /// Get a reference to property list.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a mutable reference to property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut packet_bytes = PacketId::bytes();
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            packet_bytes += ReasonCode::bytes();
        }
        if !self.properties.is_empty() {
            packet_bytes += self.properties.bytes();
        }
        FixedHeader::new(PacketType::PublishAck, packet_bytes)
    }
}

impl EncodePacket for PublishAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            self.reason_code.encode(buf)?;
        }
        if !self.properties.is_empty() {
            self.properties.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for PublishAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PublishAck {
            return Err(DecodeError::InvalidPacketType);
        }
        if fixed_header.remaining_length() < PacketId::bytes() {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let packet_id = PacketId::decode(ba)?;

        let remaining = fixed_header.remaining_length() - PacketId::bytes();
        let reason_code = if remaining >= ReasonCode::bytes() {
            ReasonCode::decode(ba)?
        } else {
            ReasonCode::default()
        };
        if !PUBLISH_ACK_REASONS.contains(&reason_code) {
            log::error!("publish_ack: Invalid reason code {:?}", reason_code);
            return Err(DecodeError::InvalidReasonCode);
        }

        let properties = if remaining > ReasonCode::bytes() {
            let properties = Properties::decode(ba)?;
            properties.validate_unique()?;
            properties
        } else {
            Properties::new()
        };

        Ok(Self {
            packet_id,
            reason_code,
            properties,
        })
    }
}

impl Packet for PublishAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PublishAck
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
    fn test_publish_ack_short_form() {
        let packet = PublishAckPacket::new(PacketId::new(9));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        // Reason code and properties are omitted on success.
        assert_eq!(&buf, &[0x40, 0x02, 0x00, 0x09]);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishAckPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.packet_id(), PacketId::new(9));
        assert_eq!(decoded.reason_code(), ReasonCode::Success);
        assert!(decoded.properties().is_empty());
    }

    #[test]
    fn test_publish_ack_with_reason() {
        let mut packet = PublishAckPacket::new(PacketId::new(9));
        packet.set_reason_code(ReasonCode::QuotaExceeded).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x40, 0x03, 0x00, 0x09, 0x97]);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishAckPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::QuotaExceeded);
    }

    #[test]
    fn test_publish_ack_invalid_reason() {
        let buf = [0x40, 0x03, 0x00, 0x09, 0x8d];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishAckPacket::decode(&mut ba),
            Err(DecodeError::InvalidReasonCode)
        );
    }
}
