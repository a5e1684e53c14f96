// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::time::Duration;

use codec::utils::random_string;
use codec::QoS;

/// Self signed certificate configuration.
#[derive(Clone, Debug)]
pub struct SelfSignedTls {
    /// Root CA certificate in pem format, generated with `openssl` or
    /// other tools.
    pub root_ca_pem: String,
}

#[derive(Clone, Debug)]
pub enum TlsType {
    /// Server certificate is signed by a public Root CA, like `Let's Encrypt`.
    CASigned,

    /// Server certificate is signed by a self generated root certificate.
    SelfSigned(SelfSignedTls),
}

/// Plain TCP connection.
#[derive(Clone, Debug)]
pub struct MqttConnect {}

/// TLS over TCP connection.
#[derive(Clone, Debug)]
pub struct MqttsConnect {
    /// Server name used for certificate verification.
    pub domain: String,
    pub tls_type: TlsType,
}

/// WebSocket connection.
#[derive(Clone, Debug)]
pub struct WsConnect {
    /// Url path, like `/mqtt`.
    pub path: String,
}

/// Secure WebSocket connection.
#[derive(Clone, Debug)]
pub struct WssConnect {
    pub domain: String,
    pub tls_type: TlsType,
    pub path: String,
}

/// Transport layer protocol used to reach the server.
#[derive(Clone, Debug)]
pub enum ConnectType {
    Mqtt(MqttConnect),
    Mqtts(MqttsConnect),
    Ws(WsConnect),
    Wss(WssConnect),
}

/// A message the Server publishes on behalf of the client after an abnormal
/// disconnect.
#[derive(Clone, Debug)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub delay_interval: Option<u32>,
    pub message_expiry_interval: Option<u32>,
    pub payload_format_indicator: bool,
}

impl LastWill {
    /// Create a new last will message for `topic`.
    #[must_use]
    pub fn new(topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
            content_type: None,
            response_topic: None,
            correlation_data: None,
            delay_interval: None,
            message_expiry_interval: None,
            payload_format_indicator: false,
        }
    }
}

/// Options used to connect to a server.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    hostname: String,
    port: u16,
    connect_type: ConnectType,
    client_id: String,
    keep_alive: Duration,
    clean_start: bool,
    username: Option<String>,
    password: Option<Vec<u8>>,
    receive_maximum: u16,
    session_expiry_interval: Option<u32>,
    authentication_method: Option<String>,
    authentication_data: Option<Vec<u8>>,
    last_will: Option<LastWill>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 1883,
            connect_type: ConnectType::Mqtt(MqttConnect {}),
            client_id: random_string(8),
            keep_alive: Duration::from_secs(60),
            clean_start: true,
            username: None,
            password: None,
            receive_maximum: u16::MAX,
            session_expiry_interval: None,
            authentication_method: None,
            authentication_data: None,
            last_will: None,
        }
    }
}

impl ConnectOptions {
    /// Create connect options for a plain TCP connection to `hostname:port`.
    #[must_use]
    pub fn new(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn set_connect_type(&mut self, connect_type: ConnectType) -> &mut Self {
        self.connect_type = connect_type;
        self
    }

    #[must_use]
    pub const fn connect_type(&self) -> &ConnectType {
        &self.connect_type
    }

    /// Update client identifier.
    ///
    /// An empty client id asks the server to assign one; the assignment is
    /// available from the session once connected.
    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Update keep-alive interval. Zero disables the keep-alive mechanism.
    ///
    /// The server may override this value in its CONNACK.
    pub fn set_keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn set_clean_start(&mut self, clean_start: bool) -> &mut Self {
        self.clean_start = clean_start;
        self
    }

    #[must_use]
    pub const fn clean_start(&self) -> bool {
        self.clean_start
    }

    pub fn set_username(&mut self, username: Option<&str>) -> &mut Self {
        self.username = username.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_password(&mut self, password: Option<&[u8]>) -> &mut Self {
        self.password = password.map(<[u8]>::to_vec);
        self
    }

    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    /// Update the number of unacknowledged QoS 1 and QoS 2 publishes the
    /// client is willing to process concurrently.
    pub fn set_receive_maximum(&mut self, receive_maximum: u16) -> &mut Self {
        self.receive_maximum = receive_maximum;
        self
    }

    #[must_use]
    pub const fn receive_maximum(&self) -> u16 {
        self.receive_maximum
    }

    pub fn set_session_expiry_interval(&mut self, interval: Option<u32>) -> &mut Self {
        self.session_expiry_interval = interval;
        self
    }

    #[must_use]
    pub const fn session_expiry_interval(&self) -> Option<u32> {
        self.session_expiry_interval
    }

    /// Update extended authentication method, passed through to the server.
    pub fn set_authentication_method(&mut self, method: Option<&str>) -> &mut Self {
        self.authentication_method = method.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn authentication_method(&self) -> Option<&str> {
        self.authentication_method.as_deref()
    }

    /// Update extended authentication data, passed through to the server.
    pub fn set_authentication_data(&mut self, data: Option<&[u8]>) -> &mut Self {
        self.authentication_data = data.map(<[u8]>::to_vec);
        self
    }

    #[must_use]
    pub fn authentication_data(&self) -> Option<&[u8]> {
        self.authentication_data.as_deref()
    }

    pub fn set_last_will(&mut self, last_will: Option<LastWill>) -> &mut Self {
        self.last_will = last_will;
        self
    }

    #[must_use]
    pub const fn last_will(&self) -> Option<&LastWill> {
        self.last_will.as_ref()
    }
}
