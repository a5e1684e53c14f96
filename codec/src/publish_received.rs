// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketId, PacketType, Properties, ReasonCode, VarIntError,
};

/// PUBREC packet is the response to a Publish packet with `QoS` 2.
///
/// It is the second packet of the `QoS` 2 protocol exchange.
/// The receiver replies with a `PublishReleasePacket`.
///
/// Packet structure is identical to PUBACK:
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
/// is 0x00 (Success) and there are no Properties.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReceivedPacket {
    packet_id: PacketId,
    reason_code: ReasonCode,
    properties: Properties,
}

/// The Client or Server sending the PUBREC packet MUST use one of the PUBREC
/// Reason Codes [MQTT-3.5.2-1].
pub const PUBLISH_RECEIVED_REASONS: &[ReasonCode] = &[
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

impl PublishReceivedPacket {
    /// Create a new publish received packet with `packet_id`.
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
    /// Returns error if `reason_code` is not in the `PUBLISH_RECEIVED_REASONS` list.
    pub fn set_reason_code(&mut self, reason_code: ReasonCode) -> Result<&mut Self, EncodeError> {
        if !PUBLISH_RECEIVED_REASONS.contains(&reason_code) {
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
        FixedHeader::new(PacketType::PublishReceived, packet_bytes)
    }
}

impl EncodePacket for PublishReceivedPacket {
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

impl DecodePacket for PublishReceivedPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PublishReceived {
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
        if !PUBLISH_RECEIVED_REASONS.contains(&reason_code) {
            log::error!("publish_received: Invalid reason code {:?}", reason_code);
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

impl Packet for PublishReceivedPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PublishReceived
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
    fn test_publish_received_round_trip() {
        let packet = PublishReceivedPacket::new(PacketId::new(5));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x50, 0x02, 0x00, 0x05]);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishReceivedPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }
}
