// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{
    BinaryData, BoolData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket,
    PubTopic, QoS, StringData, StringPairData, U16Data, U32Data, VarInt,
};

/// Property types which may occur more than once in a property list.
pub const MULTIPLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
];

/// Identifier of a property, the first byte of its wire form.
///
/// The identifier is encoded as a Variable Byte Integer; all defined
/// identifiers fit into a single byte.
#[allow(clippy::module_name_repetitions)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// Get byte length used in packet.
    #[must_use]
    #[inline]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// A property is a pair of identifier and typed value.
///
/// The identifier dictates the shape of the value; there are seven shapes in
/// total: byte, two byte integer, four byte integer, variable byte integer,
/// UTF-8 string, binary data and UTF-8 string pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Byte. Used in PUBLISH, Will Properties.
    ///
    /// - 0 indicates that the payload is unspecified bytes.
    /// - 1 indicates that the payload is UTF-8 encoded character data.
    ///
    /// It is a Protocol Error to include the Payload Format Indicator more than once.
    PayloadFormatIndicator(BoolData),

    /// Four Byte Integer. Used in PUBLISH, Will Properties.
    ///
    /// Lifetime of the message in seconds. If absent, the message does not expire.
    MessageExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in PUBLISH, Will Properties.
    ///
    /// Describes the content of the message; the value is defined by the
    /// sending and receiving application.
    ContentType(StringData),

    /// UTF-8 Encoded String. Used in PUBLISH, Will Properties.
    ///
    /// Topic Name for a response message. Its presence identifies the
    /// message as a request.
    ResponseTopic(PubTopic),

    /// Binary Data. Used in PUBLISH, Will Properties.
    ///
    /// Used by the sender of a request message to identify which request the
    /// response message is for when it is received.
    CorrelationData(BinaryData),

    /// Variable Byte Integer. Used in PUBLISH, SUBSCRIBE.
    ///
    /// Identifier of the subscription, in range 1 to 268,435,455. A value
    /// of 0 is a Protocol Error.
    SubscriptionIdentifier(VarInt),

    /// Four Byte Integer. Used in CONNECT, CONNACK, DISCONNECT.
    ///
    /// Session Expiry Interval in seconds. If absent the session ends when
    /// the network connection is closed; 0xFFFFFFFF means the session does
    /// not expire.
    SessionExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in CONNACK.
    ///
    /// The Client Identifier assigned by the Server because a zero length
    /// Client Identifier was found in the CONNECT packet.
    AssignedClientIdentifier(StringData),

    /// Two Byte Integer. Used in CONNACK.
    ///
    /// Keep Alive time assigned by the Server. If present, the Client MUST
    /// use this value instead of the value it sent on CONNECT [MQTT-3.2.2-21].
    ServerKeepAlive(U16Data),

    /// UTF-8 Encoded String. Used in CONNECT, CONNACK, AUTH.
    ///
    /// Name of the authentication method used for extended authentication.
    AuthenticationMethod(StringData),

    /// Binary Data. Used in CONNECT, CONNACK, AUTH.
    ///
    /// Contents are defined by the authentication method.
    AuthenticationData(BinaryData),

    /// Byte. Used in CONNECT.
    ///
    /// Whether Reason String or User Properties are sent in case of failures.
    RequestProblemInformation(BoolData),

    /// Four Byte Integer. Used in Will Properties.
    ///
    /// Delay in seconds before the Server publishes the Will Message.
    WillDelayInterval(U32Data),

    /// Byte. Used in CONNECT.
    ///
    /// Whether the Server may return Response Information in the CONNACK.
    RequestResponseInformation(BoolData),

    /// UTF-8 Encoded String. Used in CONNACK.
    ///
    /// Basis for creating a Response Topic.
    ResponseInformation(StringData),

    /// UTF-8 Encoded String. Used in CONNACK, DISCONNECT.
    ///
    /// Identifies another Server the Client can use.
    ServerReference(StringData),

    /// UTF-8 Encoded String. Used in CONNACK, PUBACK, PUBREC, PUBREL,
    /// PUBCOMP, SUBACK, UNSUBACK, DISCONNECT, AUTH.
    ///
    /// Human readable diagnostic string, not to be parsed by the receiver.
    ReasonString(StringData),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// Limits the number of QoS 1 and QoS 2 publications the sender is
    /// willing to process concurrently. Defaults to 65,535 when absent;
    /// 0 is a Protocol Error.
    ReceiveMaximum(U16Data),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// Highest value the sender will accept as a Topic Alias. Defaults to 0.
    TopicAliasMaximum(U16Data),

    /// Two Byte Integer. Used in PUBLISH.
    ///
    /// Integer value used to identify the topic instead of the topic name.
    /// 0 is a Protocol Error.
    TopicAlias(U16Data),

    /// Byte. Used in CONNACK.
    ///
    /// Highest QoS the Server supports; 2 when absent.
    MaximumQoS(QoS),

    /// Byte. Used in CONNACK.
    ///
    /// Whether the Server supports retained messages; supported when absent.
    RetainAvailable(BoolData),

    /// UTF-8 String Pair. Used in all packets which carry properties.
    ///
    /// May appear multiple times to represent multiple name-value pairs; the
    /// same name is allowed to appear more than once.
    UserProperty(StringPairData),

    /// Four Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// Maximum packet size the sender is willing to accept; no limit when
    /// absent. 0 is a Protocol Error.
    MaximumPacketSize(U32Data),

    /// Byte. Used in CONNACK.
    ///
    /// Whether the Server supports Wildcard Subscriptions; supported when absent.
    WildcardSubscriptionAvailable(BoolData),

    /// Byte. Used in CONNACK.
    ///
    /// Whether the Server supports Subscription Identifiers; supported when absent.
    SubscriptionIdentifierAvailable(BoolData),

    /// Byte. Used in CONNACK.
    ///
    /// Whether the Server supports Shared Subscriptions; supported when absent.
    SharedSubscriptionAvailable(BoolData),
}

impl Property {
    /// Get type of the property.
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(_) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    /// Get byte length used in packets, including the identifier byte.
    #[allow(clippy::match_same_arms)]
    #[must_use]
    pub fn bytes(&self) -> usize {
        let value_bytes = match self {
            Self::AssignedClientIdentifier(value) => value.bytes(),
            Self::AuthenticationData(value) => value.bytes(),
            Self::AuthenticationMethod(value) => value.bytes(),
            Self::ContentType(value) => value.bytes(),
            Self::CorrelationData(value) => value.bytes(),
            Self::MaximumPacketSize(..) => U32Data::bytes(),
            Self::MaximumQoS(..) => QoS::bytes(),
            Self::MessageExpiryInterval(..) => U32Data::bytes(),
            Self::PayloadFormatIndicator(..) => BoolData::bytes(),
            Self::ReasonString(value) => value.bytes(),
            Self::ReceiveMaximum(..) => U16Data::bytes(),
            Self::RequestProblemInformation(..) => BoolData::bytes(),
            Self::RequestResponseInformation(..) => BoolData::bytes(),
            Self::ResponseInformation(value) => value.bytes(),
            Self::ResponseTopic(value) => value.bytes(),
            Self::RetainAvailable(..) => BoolData::bytes(),
            Self::ServerKeepAlive(..) => U16Data::bytes(),
            Self::ServerReference(value) => value.bytes(),
            Self::SessionExpiryInterval(..) => U32Data::bytes(),
            Self::SharedSubscriptionAvailable(..) => BoolData::bytes(),
            Self::SubscriptionIdentifier(value) => value.bytes(),
            Self::SubscriptionIdentifierAvailable(..) => BoolData::bytes(),
            Self::TopicAlias(..) => U16Data::bytes(),
            Self::TopicAliasMaximum(..) => U16Data::bytes(),
            Self::UserProperty(value) => value.bytes(),
            Self::WildcardSubscriptionAvailable(..) => BoolData::bytes(),
            Self::WillDelayInterval(..) => U32Data::bytes(),
        };

        PropertyType::bytes() + value_bytes
    }
}

impl Property {
    /// The receive maximum used when the property is absent.
    #[must_use]
    pub const fn default_receive_maximum() -> u16 {
        u16::MAX
    }

    /// The topic alias maximum used when the property is absent.
    #[must_use]
    pub const fn default_topic_alias_maximum() -> u16 {
        0
    }

    /// The maximum QoS used when the property is absent.
    #[must_use]
    pub const fn default_maximum_qos() -> QoS {
        QoS::ExactOnce
    }
}

impl DecodePacket for Property {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let property_type_byte = ba.read_byte()?;
        let property_type = PropertyType::try_from(property_type_byte)?;
        match property_type {
            PropertyType::PayloadFormatIndicator => {
                let on = BoolData::decode(ba)?;
                Ok(Self::PayloadFormatIndicator(on))
            }
            PropertyType::MessageExpiryInterval => {
                let interval = U32Data::decode(ba)?;
                Ok(Self::MessageExpiryInterval(interval))
            }
            PropertyType::ContentType => {
                let content_type = StringData::decode(ba)?;
                Ok(Self::ContentType(content_type))
            }
            PropertyType::ResponseTopic => {
                let topic = PubTopic::decode(ba)?;
                Ok(Self::ResponseTopic(topic))
            }
            PropertyType::CorrelationData => {
                let data = BinaryData::decode(ba)?;
                Ok(Self::CorrelationData(data))
            }
            PropertyType::SubscriptionIdentifier => {
                let id = VarInt::decode(ba)?;
                if id.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::SubscriptionIdentifier(id))
            }
            PropertyType::SessionExpiryInterval => {
                let interval = U32Data::decode(ba)?;
                Ok(Self::SessionExpiryInterval(interval))
            }
            PropertyType::AssignedClientIdentifier => {
                let client_id = StringData::decode(ba)?;
                Ok(Self::AssignedClientIdentifier(client_id))
            }
            PropertyType::ServerKeepAlive => {
                let keep_alive = U16Data::decode(ba)?;
                Ok(Self::ServerKeepAlive(keep_alive))
            }
            PropertyType::AuthenticationMethod => {
                let method = StringData::decode(ba)?;
                Ok(Self::AuthenticationMethod(method))
            }
            PropertyType::AuthenticationData => {
                let data = BinaryData::decode(ba)?;
                Ok(Self::AuthenticationData(data))
            }
            PropertyType::RequestProblemInformation => {
                let on = BoolData::decode(ba)?;
                Ok(Self::RequestProblemInformation(on))
            }
            PropertyType::WillDelayInterval => {
                let interval = U32Data::decode(ba)?;
                Ok(Self::WillDelayInterval(interval))
            }
            PropertyType::RequestResponseInformation => {
                let on = BoolData::decode(ba)?;
                Ok(Self::RequestResponseInformation(on))
            }
            PropertyType::ResponseInformation => {
                let info = StringData::decode(ba)?;
                Ok(Self::ResponseInformation(info))
            }
            PropertyType::ServerReference => {
                let reference = StringData::decode(ba)?;
                Ok(Self::ServerReference(reference))
            }
            PropertyType::ReasonString => {
                let reason = StringData::decode(ba)?;
                Ok(Self::ReasonString(reason))
            }
            PropertyType::ReceiveMaximum => {
                let max = U16Data::decode(ba)?;
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::ReceiveMaximum(max))
            }
            PropertyType::TopicAliasMaximum => {
                let max = U16Data::decode(ba)?;
                Ok(Self::TopicAliasMaximum(max))
            }
            PropertyType::TopicAlias => {
                let alias = U16Data::decode(ba)?;
                if alias.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::TopicAlias(alias))
            }
            PropertyType::MaximumQoS => {
                let qos = QoS::decode(ba)?;
                if qos == QoS::ExactOnce {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumQoS(qos))
            }
            PropertyType::RetainAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::RetainAvailable(available))
            }
            PropertyType::UserProperty => {
                let pair = StringPairData::decode(ba)?;
                Ok(Self::UserProperty(pair))
            }
            PropertyType::MaximumPacketSize => {
                let max = U32Data::decode(ba)?;
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumPacketSize(max))
            }
            PropertyType::WildcardSubscriptionAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::WildcardSubscriptionAvailable(available))
            }
            PropertyType::SubscriptionIdentifierAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::SubscriptionIdentifierAvailable(available))
            }
            PropertyType::SharedSubscriptionAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::SharedSubscriptionAvailable(available))
            }
        }
    }
}

impl EncodePacket for Property {
    #[allow(clippy::match_same_arms)]
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        // All defined identifiers fit into a single byte of their
        // variable byte integer encoding.
        let property_type_byte = self.property_type() as u8;
        buf.push(property_type_byte);
        let value_bytes = match self {
            Self::AssignedClientIdentifier(client_id) => client_id.encode(buf)?,
            Self::AuthenticationData(data) => data.encode(buf)?,
            Self::AuthenticationMethod(method) => method.encode(buf)?,
            Self::ContentType(content_type) => content_type.encode(buf)?,
            Self::CorrelationData(data) => data.encode(buf)?,
            Self::MaximumPacketSize(max) => max.encode(buf)?,
            Self::MaximumQoS(qos) => qos.encode(buf)?,
            Self::MessageExpiryInterval(interval) => interval.encode(buf)?,
            Self::PayloadFormatIndicator(on) => on.encode(buf)?,
            Self::ReasonString(reason) => reason.encode(buf)?,
            Self::ReceiveMaximum(max) => max.encode(buf)?,
            Self::RequestProblemInformation(on) => on.encode(buf)?,
            Self::RequestResponseInformation(on) => on.encode(buf)?,
            Self::ResponseInformation(info) => info.encode(buf)?,
            Self::ResponseTopic(topic) => topic.encode(buf)?,
            Self::RetainAvailable(available) => available.encode(buf)?,
            Self::ServerKeepAlive(keep_alive) => keep_alive.encode(buf)?,
            Self::ServerReference(reference) => reference.encode(buf)?,
            Self::SessionExpiryInterval(interval) => interval.encode(buf)?,
            Self::SharedSubscriptionAvailable(available) => available.encode(buf)?,
            Self::SubscriptionIdentifier(id) => id.encode(buf)?,
            Self::SubscriptionIdentifierAvailable(available) => available.encode(buf)?,
            Self::TopicAlias(alias) => alias.encode(buf)?,
            Self::TopicAliasMaximum(value) => value.encode(buf)?,
            Self::UserProperty(pair) => pair.encode(buf)?,
            Self::WildcardSubscriptionAvailable(available) => available.encode(buf)?,
            Self::WillDelayInterval(interval) => interval.encode(buf)?,
        };
        Ok(PropertyType::bytes() + value_bytes)
    }
}

/// A list of properties, prefixed on the wire by its total byte length
/// encoded as a Variable Byte Integer.
///
/// Properties whose value equals the protocol default are simply never
/// inserted; the list encodes exactly what it holds.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl AsRef<[Property]> for Properties {
    fn as_ref(&self) -> &[Property] {
        self.0.as_ref()
    }
}

impl Properties {
    /// Create an empty property list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get byte length used in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let value_bytes = self.value_bytes();
        // Property lists fit a variable byte integer by construction.
        let len = VarInt::from(value_bytes).unwrap_or_default();
        len.bytes() + value_bytes
    }

    /// Get byte length of the encoded properties, without the length prefix.
    #[must_use]
    fn value_bytes(&self) -> usize {
        self.0.iter().map(Property::bytes).sum()
    }

    /// Get number of properties in list.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether property list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get a reference to property list.
    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    /// Clear property list.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Push a property to the back of the list.
    pub fn push(&mut self, v: Property) {
        self.0.push(v);
    }

    /// Get the first property with the given type.
    #[must_use]
    pub fn find(&self, property_type: PropertyType) -> Option<&Property> {
        self.0.iter().find(|p| p.property_type() == property_type)
    }

    /// Get server keep alive value, if present.
    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        match self.find(PropertyType::ServerKeepAlive) {
            Some(Property::ServerKeepAlive(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get assigned client identifier, if present.
    #[must_use]
    pub fn assigned_client_id(&self) -> Option<&str> {
        match self.find(PropertyType::AssignedClientIdentifier) {
            Some(Property::AssignedClientIdentifier(value)) => Some(value.as_ref()),
            _ => None,
        }
    }

    /// Get topic alias maximum value, if present.
    #[must_use]
    pub fn topic_alias_maximum(&self) -> Option<u16> {
        match self.find(PropertyType::TopicAliasMaximum) {
            Some(Property::TopicAliasMaximum(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Check that no non-repeatable property occurs more than once.
    ///
    /// # Errors
    ///
    /// Returns error if a property other than User Property or Subscription
    /// Identifier is duplicated.
    pub fn validate_unique(&self) -> Result<(), DecodeError> {
        for (index, property) in self.0.iter().enumerate() {
            let property_type = property.property_type();
            if MULTIPLE_PROPERTIES.contains(&property_type) {
                continue;
            }
            if self.0[index + 1..]
                .iter()
                .any(|other| other.property_type() == property_type)
            {
                log::error!("property: duplicated {:?}", property_type);
                return Err(DecodeError::DuplicatedProperty);
            }
        }
        Ok(())
    }
}

impl DecodePacket for Properties {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let byte_length = VarInt::decode(ba)?;
        let mut remaining = byte_length.value();
        let mut properties = Vec::new();
        while remaining > 0 {
            let property = Property::decode(ba)?;
            let bytes = property.bytes();
            if bytes > remaining {
                return Err(DecodeError::InvalidRemainingLength);
            }
            remaining -= bytes;
            properties.push(property);
        }

        Ok(Self(properties))
    }
}

impl EncodePacket for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let len = VarInt::from(self.value_bytes())?;
        let mut bytes_written = len.bytes();
        len.encode(buf)?;
        for property in &self.0 {
            bytes_written += property.encode(buf)?;
        }

        Ok(bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_encode_byte_length_prefix() {
        let mut properties = Properties::new();
        properties.push(Property::SessionExpiryInterval(U32Data::new(10)));
        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x05, 0x11, 0x00, 0x00, 0x00, 0x0a]);
        assert_eq!(properties.bytes(), buf.len());
    }

    #[test]
    fn test_properties_decode() {
        let buf = [0x03, 0x22, 0x00, 0x0a];
        let mut ba = ByteArray::new(&buf);
        let properties = Properties::decode(&mut ba).unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties.topic_alias_maximum(), Some(10));
    }

    #[test]
    fn test_properties_decode_empty() {
        let buf = [0x00];
        let mut ba = ByteArray::new(&buf);
        let properties = Properties::decode(&mut ba).unwrap();
        assert!(properties.is_empty());
    }

    #[test]
    fn test_properties_decode_unknown_identifier() {
        let buf = [0x02, 0x7b, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyType)
        );
    }

    #[test]
    fn test_properties_validate_unique() {
        let mut properties = Properties::new();
        properties.push(Property::ServerKeepAlive(U16Data::new(30)));
        properties.push(Property::ServerKeepAlive(U16Data::new(60)));
        assert_eq!(
            properties.validate_unique(),
            Err(DecodeError::DuplicatedProperty)
        );

        let mut properties = Properties::new();
        properties.push(Property::UserProperty(
            StringPairData::from("a", "b").unwrap(),
        ));
        properties.push(Property::UserProperty(
            StringPairData::from("a", "c").unwrap(),
        ));
        assert!(properties.validate_unique().is_ok());
    }

    #[test]
    fn test_properties_round_trip() {
        let mut properties = Properties::new();
        properties.push(Property::ContentType(StringData::from("text/plain").unwrap()));
        properties.push(Property::UserProperty(
            StringPairData::from("key", "value").unwrap(),
        ));
        properties.push(Property::SubscriptionIdentifier(VarInt::from(200).unwrap()));

        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert_eq!(decoded, properties);
    }
}
