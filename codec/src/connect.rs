// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::utils::StringError;
use crate::{
    BinaryData, ByteArray, ConnectFlags, DecodeError, DecodePacket, EncodeError, EncodePacket,
    FixedHeader, Packet, PacketType, Properties, ProtocolLevel, PubTopic, QoS, StringData,
    U16Data, VarIntError, PROTOCOL_NAME,
};

/// `ConnectPacket` is the first packet sent from the Client to the Server
/// after a network connection is established [MQTT-3.1.0-1].
///
/// Basic struct of `ConnectPacket` is as below:
/// ```txt
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// |                            |
/// +----------------------------+
/// | Protocol name length       |
/// |                            |
/// +----------------------------+
/// | Protocol name "MQTT"       |
/// +----------------------------+
/// | Protocol level             |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// |                            |
/// +----------------------------+
/// | Properties                 |
/// +----------------------------+
/// | Client id                  |
/// +----------------------------+
/// | Will Properties            |
/// +----------------------------+
/// | Will topic                 |
/// +----------------------------+
/// | Will payload               |
/// +----------------------------+
/// | Username                   |
/// +----------------------------+
/// | Password                   |
/// +----------------------------+
/// ```
///
/// The payload fields after client id are optional; their presence is
/// determined by the flags in the variable header. These fields, if present,
/// MUST appear in the order Client Identifier, Will Properties, Will Topic,
/// Will Payload, User Name, Password [MQTT-3.1.3-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectPacket {
    /// Protocol name can only be `MQTT` in specification.
    protocol_name: StringData,

    protocol_level: ProtocolLevel,

    connect_flags: ConnectFlags,

    /// Time interval measured in seconds.
    ///
    /// It is the maximum time interval that is permitted to elapse between
    /// the point at which the Client finishes transmitting one MQTT Control
    /// Packet and the point it starts sending the next. If Keep Alive is
    /// non-zero and in the absence of sending any other MQTT Control Packets,
    /// the Client MUST send a PINGREQ packet [MQTT-3.1.2-20].
    ///
    /// If the Server returns a Server Keep Alive on the CONNACK packet,
    /// the Client MUST use that value instead of the value it sent as the
    /// Keep Alive [MQTT-3.1.2-21].
    ///
    /// A Keep Alive value of 0 has the effect of turning off the keep alive
    /// mechanism.
    keep_alive: U16Data,

    properties: Properties,

    /// Client identifier, the first field in the payload.
    ///
    /// The ClientID identifies the Client to the Server and MUST be present
    /// [MQTT-3.1.3-3]. A zero length value asks the Server to assign one;
    /// the assignment comes back in the Assigned Client Identifier property
    /// of the CONNACK packet [MQTT-3.1.3-7].
    client_id: StringData,

    /// If the Will Flag is set to 1, the Will Properties is the next field
    /// in the payload.
    ///
    /// It defines the application message properties to be sent with the
    /// will message, and properties which define when to publish it.
    will_properties: Properties,

    /// Topic of the will message, present iff the will flag is set.
    will_topic: Option<PubTopic>,

    /// Payload of the will message, present iff the will flag is set.
    will_message: BinaryData,

    /// Present iff the username flag is set. A valid UTF-8 string.
    username: StringData,

    /// Present iff the password flag is set. 0 to 64KB of binary data.
    password: BinaryData,
}

impl ConnectPacket {
    /// Create a new connect packet with `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is an invalid string.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        let protocol_name = StringData::from(PROTOCOL_NAME)?;
        let client_id = StringData::from(client_id)?;
        Ok(Self {
            protocol_name,
            keep_alive: U16Data::new(60),
            client_id,
            ..Self::default()
        })
    }

    /// Get current mqtt protocol level.
    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    /// Get current connect flags.
    #[must_use]
    #[inline]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    /// Update keep-alive value, in seconds.
    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = U16Data::new(keep_alive);
        self
    }

    /// Get current keep-alive value, in seconds.
    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive.value()
    }

    /// Update clean-start flag.
    pub fn set_clean_start(&mut self, clean_start: bool) -> &mut Self {
        self.connect_flags.set_clean_start(clean_start);
        self
    }

    /// Get clean-start flag.
    #[must_use]
    pub const fn clean_start(&self) -> bool {
        self.connect_flags.clean_start()
    }

    /// Update will-retain flag.
    pub fn set_will_retain(&mut self, will_retain: bool) -> &mut Self {
        self.connect_flags.set_will_retain(will_retain);
        self
    }

    /// Update will-qos value.
    pub fn set_will_qos(&mut self, qos: QoS) -> &mut Self {
        self.connect_flags.set_will_qos(qos);
        self
    }

    /// Update will flag.
    pub fn set_will(&mut self, will: bool) -> &mut Self {
        self.connect_flags.set_will(will);
        self
    }

    /// Get current will flag.
    #[must_use]
    pub const fn will(&self) -> bool {
        self.connect_flags.will()
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

    /// Update client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is an invalid string.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, EncodeError> {
        self.client_id = StringData::from(client_id)?;
        Ok(self)
    }

    /// Get current client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    /// Update username value.
    ///
    /// # Errors
    ///
    /// Returns error if `username` is an invalid string.
    pub fn set_username(&mut self, username: Option<&str>) -> Result<&mut Self, StringError> {
        if let Some(username) = username {
            self.username = StringData::from(username)?;
            self.connect_flags.set_has_username(true);
        } else {
            self.connect_flags.set_has_username(false);
            self.username = StringData::new();
        }
        Ok(self)
    }

    /// Get current username value.
    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_ref()
    }

    /// Update password value.
    ///
    /// # Errors
    ///
    /// Returns error if `password` is larger than 64KB.
    pub fn set_password(&mut self, password: Option<&[u8]>) -> Result<&mut Self, EncodeError> {
        match password {
            Some(password) => {
                self.connect_flags.set_has_password(true);
                self.password = BinaryData::from_slice(password)?;
            }
            None => {
                self.connect_flags.set_has_password(false);
                self.password.clear();
            }
        }
        Ok(self)
    }

    /// Get current password value.
    #[must_use]
    pub fn password(&self) -> &[u8] {
        self.password.as_ref()
    }

    /// Get a mutable reference to will property list.
    pub fn will_properties_mut(&mut self) -> &mut Properties {
        &mut self.will_properties
    }

    /// Get a reference to will property list.
    #[must_use]
    pub const fn will_properties(&self) -> &Properties {
        &self.will_properties
    }

    /// Update will topic.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcard characters.
    pub fn set_will_topic(&mut self, topic: &str) -> Result<&mut Self, EncodeError> {
        if topic.is_empty() {
            self.will_topic = None;
        } else {
            self.will_topic = Some(PubTopic::new(topic)?);
        }
        Ok(self)
    }

    /// Get current will topic.
    #[must_use]
    pub fn will_topic(&self) -> Option<&str> {
        self.will_topic.as_ref().map(AsRef::as_ref)
    }

    /// Update will message bytes.
    ///
    /// # Errors
    ///
    /// Returns error if `message` is larger than 64KB.
    pub fn set_will_message(&mut self, message: &[u8]) -> Result<&mut Self, EncodeError> {
        self.will_message = BinaryData::from_slice(message)?;
        Ok(self)
    }

    /// Get will message bytes.
    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        self.will_message.as_ref()
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.protocol_name.bytes()
            + ProtocolLevel::bytes()
            + ConnectFlags::bytes()
            + U16Data::bytes()
            + self.properties.bytes()
            + self.client_id.bytes();

        if self.connect_flags.will() {
            remaining_length += self.will_properties.bytes();
            if let Some(will_topic) = &self.will_topic {
                remaining_length += will_topic.bytes();
            }
            remaining_length += self.will_message.bytes();
        }
        if self.connect_flags.has_username() {
            remaining_length += self.username.bytes();
        }
        if self.connect_flags.has_password() {
            remaining_length += self.password.bytes();
        }

        FixedHeader::new(PacketType::Connect, remaining_length)
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(v)?;

        // Write variable header
        self.protocol_name.encode(v)?;
        self.protocol_level.encode(v)?;
        self.connect_flags.encode(v)?;
        self.keep_alive.encode(v)?;
        self.properties.encode(v)?;

        // Write payload
        self.client_id.encode(v)?;

        if self.connect_flags.will() {
            self.will_properties.encode(v)?;
            if let Some(will_topic) = &self.will_topic {
                will_topic.encode(v)?;
            }
            self.will_message.encode(v)?;
        }
        if self.connect_flags.has_username() {
            self.username.encode(v)?;
        }
        if self.connect_flags.has_password() {
            self.password.encode(v)?;
        }

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        // The protocol name MUST be the UTF-8 String "MQTT" [MQTT-3.1.2-1].
        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;

        let connect_flags = ConnectFlags::decode(ba)?;

        // If the User Name Flag is set to 0, the Password Flag MUST be set
        // to 0 as well [MQTT-3.1.2-22].
        if !connect_flags.has_username() && connect_flags.has_password() {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let keep_alive = U16Data::decode(ba)?;

        let properties = Properties::decode(ba)?;
        properties.validate_unique()?;

        let client_id = StringData::decode(ba).map_err(|_err| DecodeError::InvalidClientId)?;
        if client_id.is_empty() && !connect_flags.clean_start() {
            // Resuming a session requires a stable client id.
            return Err(DecodeError::InvalidClientId);
        }

        let will_properties = if connect_flags.will() {
            let will_properties = Properties::decode(ba)?;
            will_properties.validate_unique()?;
            will_properties
        } else {
            Properties::new()
        };

        let will_topic = if connect_flags.will() {
            Some(PubTopic::decode(ba)?)
        } else {
            None
        };
        let will_message = if connect_flags.will() {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        let username = if connect_flags.has_username() {
            StringData::decode(ba)?
        } else {
            StringData::new()
        };

        let password = if connect_flags.has_password() {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        Ok(Self {
            protocol_name,
            protocol_level,
            connect_flags,
            keep_alive,
            properties,
            client_id,
            will_properties,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl Packet for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = self.get_fixed_header()?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, U32Data};

    #[test]
    fn test_connect_encode_variable_header() {
        let mut packet = ConnectPacket::new("hello_world").unwrap();
        packet.set_clean_start(true).set_keep_alive(10);
        packet
            .properties_mut()
            .push(Property::SessionExpiryInterval(U32Data::new(10)));
        packet
            .set_will(true)
            .set_will_qos(QoS::AtLeastOnce)
            .set_will_topic("will/topic")
            .unwrap()
            .set_will_message(b"gone")
            .unwrap();
        packet.set_username(Some("user")).unwrap();
        packet.set_password(Some(b"pass")).unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let fixed_header = FixedHeader::decode(&mut ByteArray::new(&buf)).unwrap();
        let variable_header = &buf[fixed_header.bytes()..];
        assert_eq!(
            &variable_header[..16],
            &[
                0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0xce, 0x00, 0x0a, 0x05, 0x11, 0x00,
                0x00, 0x00, 0x0a,
            ]
        );
    }

    #[test]
    fn test_connect_round_trip() {
        let mut packet = ConnectPacket::new("tern-client").unwrap();
        packet.set_clean_start(true).set_keep_alive(30);
        packet.set_username(Some("user")).unwrap();
        packet.set_password(Some(b"secret")).unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.client_id(), "tern-client");
        assert_eq!(decoded.username(), "user");
        assert_eq!(decoded.password(), b"secret");
    }

    #[test]
    fn test_connect_decode() {
        let buf: Vec<u8> = vec![
            0x10, 0x15, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x05, 0x02, 0x00, 0x3c, 0x00, 0x00,
            0x08, 0x77, 0x76, 0x50, 0x54, 0x58, 0x63, 0x43, 0x77,
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.client_id(), "wvPTXcCw");
        assert!(packet.clean_start());
        assert_eq!(packet.keep_alive(), 60);
    }

    #[test]
    fn test_connect_decode_password_without_username() {
        let buf: Vec<u8> = vec![
            0x10, 0x15, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x05, 0x42, 0x00, 0x3c, 0x00, 0x00,
            0x08, 0x77, 0x76, 0x50, 0x54, 0x58, 0x63, 0x43, 0x77,
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidConnectFlags)
        );
    }
}
