// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS, VarInt, VarIntError,
};

/// Trait shared by all control packet structs.
pub trait Packet {
    /// Get packet type of current packet.
    fn packet_type(&self) -> PacketType;

    /// Get byte length of the whole packet, including the fixed header.
    ///
    /// # Errors
    ///
    /// Returns error if the remaining length would overflow a variable byte integer.
    fn bytes(&self) -> Result<usize, VarIntError>;
}

/// Control packet type, the upper nibble of the first byte in a packet.
///
/// The lower nibble contains packet flags. The flags are fixed for every
/// packet type except PUBLISH, which carries the dup/QoS/retain bits there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Request to connect to broker.
    Connect,

    /// Broker reply to connect request.
    ConnectAck,

    /// Publish message.
    Publish { dup: bool, qos: QoS, retain: bool },

    /// Publish acknowledgement, QoS 1 reply.
    PublishAck,

    /// Publish received, first QoS 2 reply.
    PublishReceived,

    /// Publish release, QoS 2 reply to publish-received.
    PublishRelease,

    /// Publish complete, final packet of the QoS 2 exchange.
    PublishComplete,

    /// Client subscribe request.
    Subscribe,

    /// Subscribe acknowledgement.
    SubscribeAck,

    /// Unsubscribe request.
    Unsubscribe,

    /// Unsubscribe acknowledgement.
    UnsubscribeAck,

    /// Client ping request.
    PingRequest,

    /// Server ping response.
    PingResponse,

    /// Connection is closing.
    Disconnect,

    /// Authentication exchange.
    Auth,
}

impl Default for PacketType {
    fn default() -> Self {
        Self::Connect
    }
}

impl PacketType {
    /// Get byte length used in packet.
    #[must_use]
    #[inline]
    pub const fn bytes() -> usize {
        1
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        let type_bits = match packet_type {
            PacketType::Connect => 1,
            PacketType::ConnectAck => 2,
            PacketType::Publish { .. } => 3,
            PacketType::PublishAck => 4,
            PacketType::PublishReceived => 5,
            PacketType::PublishRelease => 6,
            PacketType::PublishComplete => 7,
            PacketType::Subscribe => 8,
            PacketType::SubscribeAck => 9,
            PacketType::Unsubscribe => 10,
            PacketType::UnsubscribeAck => 11,
            PacketType::PingRequest => 12,
            PacketType::PingResponse => 13,
            PacketType::Disconnect => 14,
            PacketType::Auth => 15,
        };

        let flags_bits = match packet_type {
            PacketType::Publish { dup, qos, retain } => {
                let dup = if dup { 0b0000_1000 } else { 0b0000_0000 };
                let qos = match qos {
                    QoS::AtMostOnce => 0b0000_0000,
                    QoS::AtLeastOnce => 0b0000_0010,
                    QoS::ExactOnce => 0b0000_0100,
                };
                let retain = if retain { 0b0000_0001 } else { 0b0000_0000 };
                dup | qos | retain
            }
            PacketType::PublishRelease | PacketType::Subscribe | PacketType::Unsubscribe => {
                // Reserved, MUST be set to this value [MQTT-2.1.3-1].
                0b0000_0010
            }
            _ => 0b0000_0000,
        };
        (type_bits << 4) | flags_bits
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let type_bits = (v & 0b1111_0000) >> 4;
        let flag = v & 0b0000_1111;

        // Where a flag bit is marked as "Reserved", it is reserved for future use
        // and MUST be set to the value listed [MQTT-2.1.3-1].
        match type_bits {
            1 if flag == 0b0000_0000 => Ok(Self::Connect),
            2 if flag == 0b0000_0000 => Ok(Self::ConnectAck),
            3 => {
                let dup = (flag & 0b0000_1000) == 0b0000_1000;
                let retain = (flag & 0b0000_0001) == 0b0000_0001;
                let qos = match flag & 0b0000_0110 {
                    0b0000_0000 => QoS::AtMostOnce,
                    0b0000_0010 => QoS::AtLeastOnce,
                    0b0000_0100 => QoS::ExactOnce,
                    _ => return Err(DecodeError::InvalidQoS),
                };

                // The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
                if dup && qos == QoS::AtMostOnce {
                    return Err(DecodeError::InvalidPacketFlags);
                }

                Ok(Self::Publish { dup, qos, retain })
            }
            4 if flag == 0b0000_0000 => Ok(Self::PublishAck),
            5 if flag == 0b0000_0000 => Ok(Self::PublishReceived),
            6 if flag == 0b0000_0010 => Ok(Self::PublishRelease),
            7 if flag == 0b0000_0000 => Ok(Self::PublishComplete),
            8 if flag == 0b0000_0010 => Ok(Self::Subscribe),
            9 if flag == 0b0000_0000 => Ok(Self::SubscribeAck),
            10 if flag == 0b0000_0010 => Ok(Self::Unsubscribe),
            11 if flag == 0b0000_0000 => Ok(Self::UnsubscribeAck),
            12 if flag == 0b0000_0000 => Ok(Self::PingRequest),
            13 if flag == 0b0000_0000 => Ok(Self::PingResponse),
            14 if flag == 0b0000_0000 => Ok(Self::Disconnect),
            15 if flag == 0b0000_0000 => Ok(Self::Auth),
            1..=15 => {
                log::error!("header: Got invalid packet flag {:#b} for type {}", flag, type_bits);
                Err(DecodeError::InvalidPacketFlags)
            }
            _ => {
                log::error!("header: Got invalid packet type {:#b}", type_bits);
                Err(DecodeError::InvalidPacketType)
            }
        }
    }
}

/// Fixed header part of a mqtt control packet. It consists of at least two bytes.
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-------+-------+
/// | Type  | Flags |
/// +-------+-------+
/// | Remaining Len |
/// +-------+-------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedHeader {
    packet_type: PacketType,

    /// `Remaining Length` uses variable length encoding method. The 7th bit
    /// in a byte is used to indicate whether more bytes follow. The maximum
    /// number of bytes in the `Remaining Length` field is 4.
    remaining_length: VarInt,
}

impl FixedHeader {
    /// Create a new fixed header.
    ///
    /// # Errors
    ///
    /// Returns error if `remaining_length` is out of the variable byte integer range.
    pub fn new(packet_type: PacketType, remaining_length: usize) -> Result<Self, VarIntError> {
        let remaining_length = VarInt::from(remaining_length)?;
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }

    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    #[must_use]
    pub const fn remaining_length(&self) -> usize {
        self.remaining_length.value()
    }

    /// Get byte length of the whole fixed header.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        PacketType::bytes() + self.remaining_length.bytes()
    }
}

impl DecodePacket for FixedHeader {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let flag = ba.read_byte()?;

        let packet_type = PacketType::try_from(flag)?;
        let remaining_length = VarInt::decode(ba)?;

        Ok(Self {
            packet_type,
            remaining_length,
        })
    }
}

impl EncodePacket for FixedHeader {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let packet_type: u8 = self.packet_type.into();
        v.push(packet_type);

        self.remaining_length.encode(v)?;

        Ok(PacketType::bytes() + self.remaining_length.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_from_u8() {
        assert_eq!(PacketType::try_from(0x10), Ok(PacketType::Connect));
        assert_eq!(PacketType::try_from(0x20), Ok(PacketType::ConnectAck));
        assert_eq!(
            PacketType::try_from(0x3d),
            Ok(PacketType::Publish {
                dup: true,
                qos: QoS::ExactOnce,
                retain: true
            })
        );
        assert_eq!(PacketType::try_from(0x62), Ok(PacketType::PublishRelease));
        assert_eq!(PacketType::try_from(0x82), Ok(PacketType::Subscribe));
        assert_eq!(PacketType::try_from(0xc0), Ok(PacketType::PingRequest));
        assert_eq!(PacketType::try_from(0xd0), Ok(PacketType::PingResponse));

        // Reserved flag bits must match exactly.
        assert_eq!(
            PacketType::try_from(0x11),
            Err(DecodeError::InvalidPacketFlags)
        );
        assert_eq!(
            PacketType::try_from(0x60),
            Err(DecodeError::InvalidPacketFlags)
        );
        assert_eq!(
            PacketType::try_from(0x80),
            Err(DecodeError::InvalidPacketFlags)
        );

        // dup with QoS 0 is malformed.
        assert_eq!(
            PacketType::try_from(0x38),
            Err(DecodeError::InvalidPacketFlags)
        );

        // QoS bits set to 3 is malformed.
        assert_eq!(PacketType::try_from(0x36), Err(DecodeError::InvalidQoS));

        // Type 0 is reserved.
        assert_eq!(
            PacketType::try_from(0x00),
            Err(DecodeError::InvalidPacketType)
        );
    }

    #[test]
    fn test_fixed_header_round_trip() {
        let header = FixedHeader::new(PacketType::Subscribe, 321).unwrap();
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x82, 0xc1, 0x02]);

        let mut ba = ByteArray::new(&buf);
        let decoded = FixedHeader::decode(&mut ba).unwrap();
        assert_eq!(decoded, header);
    }
}
