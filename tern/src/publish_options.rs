// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use codec::{PublishPacket, QoS};

/// Hook applied to a publish packet after its standard fields are filled in.
///
/// Used to set properties this struct has no dedicated field for.
pub type PublishModifier = Box<dyn FnOnce(&mut PublishPacket) + Send>;

/// Options of an outgoing publish message.
#[derive(Default)]
pub struct PublishOptions {
    qos: QoS,
    retain: bool,
    response_topic: Option<String>,
    content_type: Option<String>,
    topic_alias: Option<u16>,
    message_expiry_interval: Option<u32>,
    user_properties: Vec<(String, String)>,
    modifier: Option<PublishModifier>,
}

impl std::fmt::Debug for PublishOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PublishOptions")
            .field("qos", &self.qos)
            .field("retain", &self.retain)
            .field("response_topic", &self.response_topic)
            .field("content_type", &self.content_type)
            .field("topic_alias", &self.topic_alias)
            .field("message_expiry_interval", &self.message_expiry_interval)
            .field("user_properties", &self.user_properties)
            .field("modifier", &self.modifier.as_ref().map(|_| "..."))
            .finish()
    }
}

impl PublishOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create options with only quality of service set.
    #[must_use]
    pub fn with_qos(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_response_topic(&mut self, topic: Option<&str>) -> &mut Self {
        self.response_topic = topic.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn response_topic(&self) -> Option<&str> {
        self.response_topic.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: Option<&str>) -> &mut Self {
        self.content_type = content_type.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Update topic alias. A value of 0 is not permitted [MQTT-3.3.2-8].
    pub fn set_topic_alias(&mut self, topic_alias: Option<u16>) -> &mut Self {
        self.topic_alias = topic_alias;
        self
    }

    #[must_use]
    pub const fn topic_alias(&self) -> Option<u16> {
        self.topic_alias
    }

    pub fn set_message_expiry_interval(&mut self, interval: Option<u32>) -> &mut Self {
        self.message_expiry_interval = interval;
        self
    }

    #[must_use]
    pub const fn message_expiry_interval(&self) -> Option<u32> {
        self.message_expiry_interval
    }

    /// Append a user property pair.
    pub fn add_user_property(&mut self, key: &str, value: &str) -> &mut Self {
        self.user_properties.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn user_properties(&self) -> &[(String, String)] {
        &self.user_properties
    }

    /// Install a hook invoked with the built publish packet before it is sent.
    pub fn set_modifier(&mut self, modifier: PublishModifier) -> &mut Self {
        self.modifier = Some(modifier);
        self
    }

    /// Take the modifier hook out of the options.
    pub(crate) fn take_modifier(&mut self) -> Option<PublishModifier> {
        self.modifier.take()
    }
}
