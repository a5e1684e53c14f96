// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketId, PacketType, Properties, ReasonCode, VarIntError,
};

/// The UNSUBACK packet is sent by the Server to the Client to confirm receipt
/// of an UNSUBSCRIBE packet.
///
/// The payload contains a list of Reason Codes, one for each topic filter of
/// the acknowledged UNSUBSCRIBE packet, in the same order [MQTT-3.11.3-1].
///
/// Basic struct of packet:
/// ```txt
///  7                      0
/// +------------------------+
/// | Fixed header           |
/// |                        |
/// +------------------------+
/// | Packet id              |
/// |                        |
/// +------------------------+
/// | Properties ...         |
/// +------------------------+
/// | Reason code 0          |
/// +------------------------+
/// | ...                    |
/// +------------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsubscribeAckPacket {
    /// `packet_id` field is identical in the corresponding UNSUBSCRIBE packet.
    packet_id: PacketId,

    properties: Properties,

    /// A list of acknowledgement, one per unsubscribed topic filter.
    reasons: Vec<ReasonCode>,
}

/// Valid reason codes in UNSUBACK packets [MQTT-3.11.3-2].
pub const UNSUBSCRIBE_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoSubscriptionExisted,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::PacketIdentifierInUse,
];

impl UnsubscribeAckPacket {
    /// Create a new unsubscribe ack packet with one `reason_code`.
    #[must_use]
    pub fn new(packet_id: PacketId, reason_code: ReasonCode) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            reasons: vec![reason_code],
        }
    }

    /// Create a new unsubscribe ack packet with a list of reason codes.
    #[must_use]
    pub fn with_reasons(packet_id: PacketId, reasons: Vec<ReasonCode>) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            reasons,
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

    /// Get a mutable reference to property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Get a reference to property list.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a reference to reason code list.
    #[must_use]
    pub fn reasons(&self) -> &[ReasonCode] {
        &self.reasons
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let remaining_length = PacketId::bytes()
            + self.properties.bytes()
            + self.reasons.len() * ReasonCode::bytes();
        FixedHeader::new(PacketType::UnsubscribeAck, remaining_length)
    }
}

impl EncodePacket for UnsubscribeAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        self.properties.encode(buf)?;
        for reason in &self.reasons {
            reason.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for UnsubscribeAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::UnsubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let body_start = ba.offset();
        let packet_id = PacketId::decode(ba)?;

        let properties = Properties::decode(ba)?;
        properties.validate_unique()?;

        let consumed = ba.offset() - body_start;
        if fixed_header.remaining_length() < consumed {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let reasons_count = fixed_header.remaining_length() - consumed;
        let mut reasons = Vec::with_capacity(reasons_count);
        for _ in 0..reasons_count {
            let reason = ReasonCode::decode(ba)?;
            if !UNSUBSCRIBE_REASONS.contains(&reason) {
                log::error!("unsubscribe_ack: Invalid reason code {:?}", reason);
                return Err(DecodeError::InvalidReasonCode);
            }
            reasons.push(reason);
        }

        Ok(Self {
            packet_id,
            properties,
            reasons,
        })
    }
}

impl Packet for UnsubscribeAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubscribeAck
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
    fn test_unsubscribe_ack_round_trip() {
        let packet = UnsubscribeAckPacket::with_reasons(
            PacketId::new(7),
            vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted],
        );
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0xb0, 0x05, 0x00, 0x07, 0x00, 0x00, 0x11]);

        let mut ba = ByteArray::new(&buf);
        let decoded = UnsubscribeAckPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }
}
