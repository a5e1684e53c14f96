// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketType, Properties, ReasonCode, VarIntError,
};

/// An AUTH packet is sent from Client to Server or Server to Client as part
/// of an extended authentication exchange, such as challenge / response
/// authentication.
///
/// It is a Protocol Error for the Client or Server to send an AUTH packet if
/// the CONNECT packet did not contain the same Authentication Method.
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
/// is 0x00 (Success) and there are no Properties. In this case the AUTH
/// has a Remaining Length of 0.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthPacket {
    reason_code: ReasonCode,

    properties: Properties,
}

/// Valid reason codes in AUTH packets [MQTT-3.15.2-1].
pub const AUTH_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::ContinueAuthentication,
    ReasonCode::ReAuthenticate,
];

impl AuthPacket {
    /// Create a new auth packet with success reason.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update reason code.
    ///
    /// # Errors
    ///
    /// Returns error if `reason_code` is not in the `AUTH_REASONS` list.
    pub fn set_reason_code(&mut self, reason_code: ReasonCode) -> Result<&mut Self, EncodeError> {
        if !AUTH_REASONS.contains(&reason_code) {
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
        FixedHeader::new(PacketType::Auth, packet_bytes)
    }
}

impl EncodePacket for AuthPacket {
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

impl DecodePacket for AuthPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Auth {
            return Err(DecodeError::InvalidPacketType);
        }

        let remaining = fixed_header.remaining_length();
        let reason_code = if remaining >= ReasonCode::bytes() {
            ReasonCode::decode(ba)?
        } else {
            ReasonCode::default()
        };
        if !AUTH_REASONS.contains(&reason_code) {
            log::error!("auth: Invalid reason code {:?}", reason_code);
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

impl Packet for AuthPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Auth
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
    fn test_auth_round_trip() {
        let mut packet = AuthPacket::new();
        packet
            .set_reason_code(ReasonCode::ContinueAuthentication)
            .unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0xf0, 0x01, 0x18]);

        let mut ba = ByteArray::new(&buf);
        let decoded = AuthPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }
}
