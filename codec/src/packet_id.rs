// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// Packet identifier.
///
/// A non-zero two byte integer that correlates a request with its
/// acknowledgement for SUBSCRIBE, UNSUBSCRIBE and PUBLISH (where QoS > 0)
/// packets. QoS 0 PUBLISH packets carry no identifier; value 0 acts as the
/// "not present" marker in decoded packet structs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(u16);

impl PacketId {
    /// Create a new `PacketId`.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get inner u16 value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Get byte length in packet.
    #[must_use]
    #[inline]
    pub const fn bytes() -> usize {
        2
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PacketId {
    fn from(value: u16) -> Self {
        Self::new(value)
    }
}

impl DecodePacket for PacketId {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let value = ba.read_u16()?;
        Ok(Self(value))
    }
}

impl EncodePacket for PacketId {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0)?;
        Ok(Self::bytes())
    }
}
