// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::time::Duration;

use codec::{PublishPacket, QoS, ReasonCode, SubscribeTopic, TopicFilter};
use tokio::sync::{mpsc, oneshot, watch};

use crate::commands::ClientToSessionCmd;
use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};
use crate::publish_options::PublishOptions;
use crate::session::{Session, SessionState};
use crate::status::SessionStatus;

/// Asynchronous MQTT v5 client.
///
/// A client handle is a cheap view onto a [`Session`] task; it can be cloned
/// freely and used from any task. All session state lives in the session,
/// which must be driven by awaiting [`Session::run_loop`], typically in a
/// spawned task:
///
/// ```no_run
/// use tern::{AsyncClient, ConnectOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), tern::Error> {
///     let (client, session) = AsyncClient::new();
///     tokio::spawn(session.run_loop());
///
///     client.connect(ConnectOptions::new("localhost", 1883)).await?;
///     client.publish("greeting", codec::QoS::AtMostOnce, b"hello").await?;
///     client.disconnect().await
/// }
/// ```
#[derive(Clone)]
pub struct AsyncClient {
    sender: mpsc::UnboundedSender<ClientToSessionCmd>,
    state_rx: watch::Receiver<SessionState>,
}

impl AsyncClient {
    /// Create a new disconnected client and its session engine.
    #[must_use]
    pub fn new() -> (Self, Session) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let session = Session::new(receiver, state_tx);
        (Self { sender, state_rx }, session)
    }

    fn send_cmd(&self, cmd: ClientToSessionCmd) -> Result<(), Error> {
        self.sender.send(cmd).map_err(|_err| {
            Error::new(ErrorKind::InvalidSessionStatus, "Session task is gone")
        })
    }

    /// Connect to the server described in `options`.
    ///
    /// Completes when a CONNACK with success reason code arrives.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails, the handshake window elapses,
    /// or the server rejects the request (`ErrorKind::ConnAckRejected`).
    pub async fn connect(&self, options: ConnectOptions) -> Result<(), Error> {
        let (resp, receiver) = oneshot::channel();
        self.send_cmd(ClientToSessionCmd::Connect {
            options: Box::new(options),
            resp,
        })?;
        receiver
            .await
            .map_err(|_err| Error::new(ErrorKind::Cancelled, "Session dropped request"))?
    }

    /// Publish `payload` to `topic` with default options.
    ///
    /// Completes with the acknowledgement reason code; QoS 0 publishes
    /// complete with success as soon as the packet is written.
    ///
    /// # Errors
    ///
    /// Returns error if the session is not connected or the connection is
    /// lost before the acknowledgement arrives.
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
    ) -> Result<ReasonCode, Error> {
        self.publish_with_options(topic, payload, PublishOptions::with_qos(qos))
            .await
    }

    /// Publish `payload` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the session is not connected or the connection is
    /// lost before the acknowledgement arrives.
    pub async fn publish_with_options(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<ReasonCode, Error> {
        let (resp, receiver) = oneshot::channel();
        self.send_cmd(ClientToSessionCmd::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            options,
            resp,
        })?;
        receiver
            .await
            .map_err(|_err| Error::new(ErrorKind::Cancelled, "Session dropped request"))?
    }

    /// Subscribe a single topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is an invalid filter or the session is not
    /// connected.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<Vec<ReasonCode>, Error> {
        let topic = SubscribeTopic::new(topic, qos)?;
        self.subscribe_topics(vec![topic]).await
    }

    /// Subscribe a list of topic filters.
    ///
    /// Completes with one reason code per filter, in request order.
    ///
    /// # Errors
    ///
    /// Returns error if the session is not connected or the connection is
    /// lost before the acknowledgement arrives.
    pub async fn subscribe_topics(
        &self,
        topics: Vec<SubscribeTopic>,
    ) -> Result<Vec<ReasonCode>, Error> {
        let (resp, receiver) = oneshot::channel();
        self.send_cmd(ClientToSessionCmd::Subscribe { topics, resp })?;
        receiver
            .await
            .map_err(|_err| Error::new(ErrorKind::Cancelled, "Session dropped request"))?
    }

    /// Unsubscribe a list of topic filters.
    ///
    /// # Errors
    ///
    /// Returns error if the session is not connected or the connection is
    /// lost before the acknowledgement arrives.
    pub async fn unsubscribe(&self, topics: Vec<String>) -> Result<Vec<ReasonCode>, Error> {
        let (resp, receiver) = oneshot::channel();
        self.send_cmd(ClientToSessionCmd::Unsubscribe { topics, resp })?;
        receiver
            .await
            .map_err(|_err| Error::new(ErrorKind::Cancelled, "Session dropped request"))?
    }

    /// Register local interest in inbound publish messages matching `filter`.
    ///
    /// The returned receiver yields every matching publish packet received
    /// from the server. The stream is finite: it terminates when the
    /// connection is lost, and is not restarted by a reconnect. Registering
    /// a filter does not subscribe it at the server; use
    /// [`AsyncClient::subscribe`] for that.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    pub async fn subscribe_filter(
        &self,
        filter: &str,
    ) -> Result<mpsc::UnboundedReceiver<PublishPacket>, Error> {
        let filter = TopicFilter::parse(filter)?;
        let (resp, receiver) = oneshot::channel();
        self.send_cmd(ClientToSessionCmd::SubscribeFilter { filter, resp })?;
        receiver
            .await
            .map_err(|_err| Error::new(ErrorKind::Cancelled, "Session dropped request"))
    }

    /// Send DISCONNECT and close the connection.
    ///
    /// # Errors
    ///
    /// Returns error if the session task is gone.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let (resp, receiver) = oneshot::channel();
        self.send_cmd(ClientToSessionCmd::Disconnect { resp })?;
        receiver
            .await
            .map_err(|_err| Error::new(ErrorKind::Cancelled, "Session dropped request"))?
    }

    /// Whether the session has completed its handshake.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().status == SessionStatus::Connected
    }

    /// Whether the session has sent CONNECT and is waiting for CONNACK.
    #[must_use]
    pub fn is_handshaking(&self) -> bool {
        self.state_rx.borrow().status == SessionStatus::Handshaking
    }

    /// The client id in use.
    ///
    /// This can be assigned by the server if the requested id was empty.
    #[must_use]
    pub fn assigned_client_id(&self) -> String {
        self.state_rx.borrow().client_id.clone()
    }

    /// The keep alive value in use.
    ///
    /// The server is allowed to specify a different keep alive in its CONNACK
    /// than the requested value; this reflects what is actually used.
    #[must_use]
    pub fn negotiated_keep_alive(&self) -> Duration {
        self.state_rx.borrow().keep_alive
    }
}
