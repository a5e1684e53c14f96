// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::{utils, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// Binary Data is represented by a Two Byte Integer length which indicates
/// the number of data bytes, followed by that number of bytes.
///
/// Thus, the length of Binary Data is limited to the range of 0 to 65,535 Bytes.
/// ```text
/// +-------------------+
/// | Binary Length     |
/// |                   |
/// +-------------------+
/// | Bytes             |
/// |                   |
/// +-------------------+
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryData(Vec<u8>);

impl BinaryData {
    /// Create an empty binary data.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Convert byte slice into binary data.
    ///
    /// # Errors
    ///
    /// Returns error if byte slice is larger than 64KB.
    pub fn from_slice(data: &[u8]) -> Result<Self, EncodeError> {
        utils::validate_two_bytes_data(data)?;
        Ok(Self(data.to_vec()))
    }

    /// Get byte length used in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    /// Returns true if binary data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Clear binary data.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl AsRef<[u8]> for BinaryData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl DecodePacket for BinaryData {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let data = ba.read_bytes(len as usize)?;
        Ok(Self(data.to_vec()))
    }
}

impl EncodePacket for BinaryData {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(&self.0)?;
        Ok(self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_data() {
        let data = BinaryData::from_slice(&[0x01, 0x02]).unwrap();
        let mut buf = Vec::new();
        data.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x00, 0x02, 0x01, 0x02]);

        let mut ba = ByteArray::new(&buf);
        let decoded = BinaryData::decode(&mut ba).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_binary_data_too_large() {
        let data = vec![0x42; usize::from(u16::MAX) + 1];
        assert_eq!(
            BinaryData::from_slice(&data),
            Err(EncodeError::TooManyData)
        );
    }
}
