// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketType, Properties, ReasonCode, VarIntError,
};

/// The DISCONNECT packet is the final MQTT Control Packet sent from the
/// Client or the Server. It indicates the reason why the network connection
/// is being closed.
///
/// The Client or Server MAY send a DISCONNECT packet before closing the
/// network connection.
///
/// Basic packet structure:
/// ```txt
///  7                  0
/// +--------------------+
/// | Fixed header       |
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
/// is 0x00 (Normal disconnection) and there are no Properties. In this case
/// the DISCONNECT has a Remaining Length of 0.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisconnectPacket {
    /// Reason for closing this connection.
    reason_code: ReasonCode,

    properties: Properties,
}

/// Valid reason codes in DISCONNECT packets.
pub const DISCONNECT_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::DisconnectWithWillMessage,
    ReasonCode::UnspecifiedError,
    ReasonCode::MalformedPacket,
    ReasonCode::ProtocolError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::ServerBusy,
    ReasonCode::ServerShuttingDown,
    ReasonCode::BadAuthenticationMethod,
    ReasonCode::KeepAliveTimeout,
    ReasonCode::SessionTakenOver,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::TopicNameInvalid,
    ReasonCode::ReceiveMaximumExceeded,
    ReasonCode::TopicAliasInvalid,
    ReasonCode::PacketTooLarge,
    ReasonCode::MessageRateTooHigh,
    ReasonCode::QuotaExceeded,
    ReasonCode::AdministrativeAction,
    ReasonCode::PayloadFormatInvalid,
    ReasonCode::RetainNotSupported,
    ReasonCode::QoSNotSupported,
    ReasonCode::UseAnotherServer,
    ReasonCode::ServerMoved,
    ReasonCode::SharedSubscriptionNotSupported,
    ReasonCode::ConnectionRateExceeded,
    ReasonCode::MaximumConnectTime,
    ReasonCode::SubscriptionIdentifiersNotSupported,
    ReasonCode::WildcardSubscriptionsNotSupported,
];

impl DisconnectPacket {
    /// Create a new disconnect packet with normal disconnection reason.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new disconnect packet with `reason_code`.
    #[must_use]
    pub fn with_reason(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::new(),
        }
    }

    /// Update reason code.
    ///
    /// # Errors
    ///
    /// Returns error if `reason_code` is not in the `DISCONNECT_REASONS` list.
    pub fn set_reason_code(&mut self, reason_code: ReasonCode) -> Result<&mut Self, EncodeError> {
        if !DISCONNECT_REASONS.contains(&reason_code) {
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

    /// Get a mutable reference to property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Get a reference to property list.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut packet_bytes = 0;
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            packet_bytes += ReasonCode::bytes();
        }
        if !self.properties.is_empty() {
            packet_bytes += self.properties.bytes();
        }
        FixedHeader::new(PacketType::Disconnect, packet_bytes)
    }
}

impl EncodePacket for DisconnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            self.reason_code.encode(buf)?;
        }
        if !self.properties.is_empty() {
            self.properties.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for DisconnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Disconnect {
            return Err(DecodeError::InvalidPacketType);
        }

        let remaining = fixed_header.remaining_length();
        let reason_code = if remaining >= ReasonCode::bytes() {
            ReasonCode::decode(ba)?
        } else {
            ReasonCode::default()
        };
        if !DISCONNECT_REASONS.contains(&reason_code) {
            log::error!("disconnect: Invalid reason code {:?}", reason_code);
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
            reason_code,
            properties,
        })
    }
}

impl Packet for DisconnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Disconnect
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
    fn test_disconnect_short_form() {
        let packet = DisconnectPacket::new();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0xe0, 0x00]);

        let mut ba = ByteArray::new(&buf);
        let decoded = DisconnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::Success);
    }

    #[test]
    fn test_disconnect_with_reason() {
        let packet = DisconnectPacket::with_reason(ReasonCode::KeepAliveTimeout);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0xe0, 0x01, 0x8d]);

        let mut ba = ByteArray::new(&buf);
        let decoded = DisconnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::KeepAliveTimeout);
    }
}
