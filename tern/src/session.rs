// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::time::Duration;

use codec::{
    BinaryData, BoolData, ByteArray, ConnectAckPacket, ConnectPacket, DisconnectPacket,
    EncodePacket, MqttPacket, PacketId, PingRequestPacket, Property, PubTopic, PublishAckPacket,
    PublishCompletePacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS,
    ReasonCode, StringData, StringPairData, SubscribeAckPacket, SubscribePacket, SubscribeTopic,
    TopicFilter, U16Data, U32Data, UnsubscribeAckPacket, UnsubscribePacket,
};
use indexmap::{IndexMap, IndexSet};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::commands::ClientToSessionCmd;
use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};
use crate::packet_id::PacketIdAllocator;
use crate::publish_options::PublishOptions;
use crate::status::SessionStatus;
use crate::stream::Stream;

/// Time window for transport connect plus CONNACK arrival.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of session state observable from client handles.
#[derive(Debug, Default, Clone)]
pub(crate) struct SessionState {
    pub status: SessionStatus,

    /// Client id in use, taking a server assignment into account.
    pub client_id: String,

    /// Keep alive in use, taking a server override into account.
    pub keep_alive: Duration,
}

/// A publish waiting for its terminal acknowledgement.
///
/// The packet is kept so a later connection can retransmit it; the handle
/// resolves once, at the terminal acknowledgement or at teardown.
struct InFlightPublish {
    packet: PublishPacket,
    resp: Option<oneshot::Sender<Result<ReasonCode, Error>>>,
}

/// A subscribe request waiting for SUBACK.
struct InFlightSubscribe {
    packet: SubscribePacket,
    resp: Option<oneshot::Sender<Result<Vec<ReasonCode>, Error>>>,
}

/// An unsubscribe request waiting for UNSUBACK.
struct InFlightUnsubscribe {
    packet: UnsubscribePacket,
    resp: Option<oneshot::Sender<Result<Vec<ReasonCode>, Error>>>,
}

/// Local subscribers interested in publish messages matching one filter.
///
/// Requests for the same filter share a single entry.
struct FilterSubscription {
    filter: TopicFilter,
    senders: Vec<mpsc::UnboundedSender<PublishPacket>>,
}

/// Client side session engine.
///
/// All session state lives in this struct and is mutated only by the task
/// driving [`Session::run_loop`]; client handles talk to it through a
/// command channel. Suspension happens only at transport reads, writes and
/// timer waits.
pub struct Session {
    receiver: mpsc::UnboundedReceiver<ClientToSessionCmd>,
    state_tx: watch::Sender<SessionState>,
    status: SessionStatus,

    options: ConnectOptions,
    stream: Option<Stream>,
    recv_buf: Vec<u8>,

    allocator: PacketIdAllocator,

    /// Handles waiting for CONNACK.
    pending_connectors: Vec<oneshot::Sender<Result<(), Error>>>,

    /// QoS 1/2 publishes waiting for PUBACK or PUBCOMP, in send order.
    publishing_packets: IndexMap<u16, InFlightPublish>,

    /// Subscribe requests waiting for SUBACK, in send order.
    subscribing_packets: IndexMap<u16, InFlightSubscribe>,

    /// Unsubscribe requests waiting for UNSUBACK, in send order.
    unsubscribing_packets: IndexMap<u16, InFlightUnsubscribe>,

    /// Local dispatch table for inbound publish messages.
    publish_waiters: Vec<FilterSubscription>,

    /// Packet ids of inbound QoS 2 publishes waiting for PUBREL.
    incoming_qos2: IndexSet<u16>,

    client_id: String,
    keep_alive_used: Duration,

    ping_deadline: Option<Instant>,
    keep_alive_deadline: Option<Instant>,
    handshake_deadline: Option<Instant>,
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}

fn cancelled() -> Error {
    Error::new(ErrorKind::Cancelled, "Connection closed")
}

impl Session {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<ClientToSessionCmd>,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            receiver,
            state_tx,
            status: SessionStatus::Idle,
            options: ConnectOptions::default(),
            stream: None,
            recv_buf: Vec::with_capacity(4096),
            allocator: PacketIdAllocator::new(),
            pending_connectors: Vec::new(),
            publishing_packets: IndexMap::new(),
            subscribing_packets: IndexMap::new(),
            unsubscribing_packets: IndexMap::new(),
            publish_waiters: Vec::new(),
            incoming_qos2: IndexSet::new(),
            client_id: String::new(),
            keep_alive_used: Duration::ZERO,
            ping_deadline: None,
            keep_alive_deadline: None,
            handshake_deadline: None,
        }
    }

    /// Drive the session until every client handle is dropped.
    pub async fn run_loop(mut self) {
        loop {
            if self.is_online() && self.stream.is_some() {
                self.run_connected().await;
            } else {
                match self.receiver.recv().await {
                    Some(cmd) => self.handle_offline_command(cmd).await,
                    None => break,
                }
            }
        }
    }

    const fn is_online(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Connected | SessionStatus::Handshaking
        )
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        let _ = self.state_tx.send(SessionState {
            status,
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive_used,
        });
    }

    async fn handle_offline_command(&mut self, cmd: ClientToSessionCmd) {
        match cmd {
            ClientToSessionCmd::Connect { options, resp } => {
                self.options = *options;
                self.pending_connectors.push(resp);
                self.start_connect().await;
            }
            ClientToSessionCmd::Publish { resp, .. } => {
                let _ = resp.send(Err(Error::new(
                    ErrorKind::InvalidSessionStatus,
                    "Not connected",
                )));
            }
            ClientToSessionCmd::Subscribe { resp, .. }
            | ClientToSessionCmd::Unsubscribe { resp, .. } => {
                let _ = resp.send(Err(Error::new(
                    ErrorKind::InvalidSessionStatus,
                    "Not connected",
                )));
            }
            ClientToSessionCmd::SubscribeFilter { filter, resp } => {
                let receiver = self.register_filter(filter);
                let _ = resp.send(receiver);
            }
            ClientToSessionCmd::Disconnect { resp } => {
                let _ = resp.send(Ok(()));
            }
        }
    }

    /// Establish the transport connection and send CONNECT.
    async fn start_connect(&mut self) {
        self.set_status(SessionStatus::Connecting);
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        self.handshake_deadline = Some(deadline);

        match timeout_at(deadline, Stream::connect(&self.options)).await {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
            }
            Ok(Err(err)) => {
                log::warn!("session: transport connect failed: {err}");
                self.teardown(Some(err)).await;
                return;
            }
            Err(_elapsed) => {
                self.teardown(Some(Error::new(
                    ErrorKind::HandshakeTimeout,
                    "Transport connect timed out",
                )))
                .await;
                return;
            }
        }

        self.client_id = self.options.client_id().to_string();
        self.keep_alive_used = self.options.keep_alive();

        let packet = match self.build_connect_packet() {
            Ok(packet) => packet,
            Err(err) => {
                self.teardown(Some(err)).await;
                return;
            }
        };
        if let Err(err) = self.send(packet).await {
            self.teardown(Some(err)).await;
            return;
        }
        self.set_status(SessionStatus::Handshaking);
    }

    fn build_connect_packet(&self) -> Result<ConnectPacket, Error> {
        let options = &self.options;
        let mut packet = ConnectPacket::new(options.client_id())?;
        packet.set_clean_start(options.clean_start());
        let keep_alive = u16::try_from(options.keep_alive().as_secs()).unwrap_or(u16::MAX);
        packet.set_keep_alive(keep_alive);

        if let Some(interval) = options.session_expiry_interval() {
            packet
                .properties_mut()
                .push(Property::SessionExpiryInterval(U32Data::new(interval)));
        }
        if options.receive_maximum() != Property::default_receive_maximum() {
            packet
                .properties_mut()
                .push(Property::ReceiveMaximum(U16Data::new(
                    options.receive_maximum(),
                )));
        }
        if let Some(method) = options.authentication_method() {
            packet
                .properties_mut()
                .push(Property::AuthenticationMethod(StringData::from(method)?));
        }
        if let Some(data) = options.authentication_data() {
            packet
                .properties_mut()
                .push(Property::AuthenticationData(BinaryData::from_slice(data)?));
        }

        if let Some(will) = options.last_will() {
            packet
                .set_will(true)
                .set_will_qos(will.qos)
                .set_will_retain(will.retain);
            packet.set_will_topic(&will.topic)?;
            packet.set_will_message(&will.payload)?;

            let properties = packet.will_properties_mut();
            if let Some(interval) = will.delay_interval {
                properties.push(Property::WillDelayInterval(U32Data::new(interval)));
            }
            if let Some(interval) = will.message_expiry_interval {
                properties.push(Property::MessageExpiryInterval(U32Data::new(interval)));
            }
            if will.payload_format_indicator {
                properties.push(Property::PayloadFormatIndicator(BoolData::new(true)));
            }
            if let Some(content_type) = &will.content_type {
                properties.push(Property::ContentType(StringData::from(content_type)?));
            }
            if let Some(topic) = &will.response_topic {
                properties.push(Property::ResponseTopic(PubTopic::new(topic)?));
            }
            if let Some(data) = &will.correlation_data {
                properties.push(Property::CorrelationData(BinaryData::from_slice(data)?));
            }
        }

        packet.set_username(options.username())?;
        packet.set_password(options.password())?;

        Ok(packet)
    }

    /// Serve commands, inbound packets and timers until teardown.
    async fn run_connected(&mut self) {
        loop {
            if !self.is_online() {
                return;
            }
            let ping_at = self.ping_deadline.unwrap_or_else(far_future);
            let keep_alive_at = self.keep_alive_deadline.unwrap_or_else(far_future);
            let handshake_at = self.handshake_deadline.unwrap_or_else(far_future);
            let Some(stream) = self.stream.as_mut() else {
                return;
            };

            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        // Every client handle is gone; close the connection.
                        let _ = self.send(DisconnectPacket::new()).await;
                        self.teardown(None).await;
                        return;
                    }
                },
                read_result = stream.read_buf(&mut self.recv_buf) => match read_result {
                    Ok(0) => {
                        log::info!("session: connection closed by peer");
                        self.teardown(None).await;
                    }
                    Ok(_n) => {
                        if let Err(err) = self.process_recv_buf().await {
                            self.send_error_disconnect(&err).await;
                            self.teardown(Some(err)).await;
                        }
                    }
                    Err(err) => {
                        log::warn!("session: read failed: {err}");
                        self.teardown(Some(err)).await;
                    }
                },
                _ = sleep_until(ping_at), if self.ping_deadline.is_some() => {
                    log::debug!("session: sending ping request");
                    if let Err(err) = self.send(PingRequestPacket::new()).await {
                        self.teardown(Some(err)).await;
                    } else {
                        self.ping_deadline = Some(Instant::now() + self.keep_alive_used / 2);
                    }
                },
                _ = sleep_until(keep_alive_at), if self.keep_alive_deadline.is_some() => {
                    log::warn!("session: no packet within keep alive window");
                    self.teardown(Some(Error::new(
                        ErrorKind::KeepAliveTimeout,
                        "No packet received within keep alive window",
                    ))).await;
                },
                _ = sleep_until(handshake_at), if self.handshake_deadline.is_some() => {
                    log::warn!("session: connack did not arrive in time");
                    self.teardown(Some(Error::new(
                        ErrorKind::HandshakeTimeout,
                        "No CONNACK within handshake window",
                    ))).await;
                },
            }
        }
    }

    /// Extract and dispatch every complete packet in the receive buffer.
    async fn process_recv_buf(&mut self) -> Result<(), Error> {
        loop {
            if !self.is_online() {
                self.recv_buf.clear();
                return Ok(());
            }
            let Some(frame_len) = packet_frame_len(&self.recv_buf)? else {
                return Ok(());
            };
            let frame: Vec<u8> = self.recv_buf.drain(..frame_len).collect();
            let mut ba = ByteArray::new(&frame);
            let packet = MqttPacket::decode(&mut ba)?;
            self.refresh_keep_alive();
            self.handle_packet(packet).await?;
        }
    }

    /// The keep-alive loss window restarts on every inbound packet.
    fn refresh_keep_alive(&mut self) {
        if self.keep_alive_deadline.is_some() {
            self.keep_alive_deadline = Some(Instant::now() + self.keep_alive_used);
        }
    }

    async fn handle_packet(&mut self, packet: MqttPacket) -> Result<(), Error> {
        match packet {
            MqttPacket::ConnectAck(packet) => self.on_connect_ack(packet).await,
            MqttPacket::Publish(packet) => self.on_publish(packet).await,
            MqttPacket::PublishAck(packet) => self.on_publish_ack(&packet),
            MqttPacket::PublishReceived(packet) => self.on_publish_received(packet).await,
            MqttPacket::PublishRelease(packet) => self.on_publish_release(packet).await,
            MqttPacket::PublishComplete(packet) => self.on_publish_complete(&packet),
            MqttPacket::SubscribeAck(packet) => self.on_subscribe_ack(packet),
            MqttPacket::UnsubscribeAck(packet) => self.on_unsubscribe_ack(packet),
            MqttPacket::PingResponse(_packet) => {
                log::debug!("session: got ping response");
                Ok(())
            }
            MqttPacket::Disconnect(packet) => {
                log::info!(
                    "session: server closed connection, reason: {:?}",
                    packet.reason_code()
                );
                self.teardown(None).await;
                Ok(())
            }
            MqttPacket::Connect(_)
            | MqttPacket::Subscribe(_)
            | MqttPacket::Unsubscribe(_)
            | MqttPacket::PingRequest(_)
            | MqttPacket::Auth(_) => Err(Error::new(
                ErrorKind::ProtocolError,
                "Unexpected packet from server",
            )),
        }
    }

    async fn on_connect_ack(&mut self, packet: ConnectAckPacket) -> Result<(), Error> {
        if self.status != SessionStatus::Handshaking {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "CONNACK outside of handshake",
            ));
        }
        self.handshake_deadline = None;

        if packet.reason_code() != ReasonCode::Success {
            log::warn!(
                "session: server rejected connect request: {:?}",
                packet.reason_code()
            );
            let err = Error::from_string(
                ErrorKind::ConnAckRejected(packet.reason_code()),
                format!("Connect request rejected: {:?}", packet.reason_code()),
            );
            self.teardown(Some(err)).await;
            return Ok(());
        }

        // A server keep alive overrides the requested value [MQTT-3.2.2-21];
        // an assigned client identifier replaces an empty requested one.
        if let Some(server_keep_alive) = packet.properties().server_keep_alive() {
            if server_keep_alive > 0 {
                self.keep_alive_used = Duration::from_secs(u64::from(server_keep_alive));
            }
        }
        if let Some(assigned) = packet.properties().assigned_client_id() {
            if !assigned.is_empty() {
                self.client_id = assigned.to_string();
            }
        }

        if self.keep_alive_used > Duration::ZERO {
            self.ping_deadline = Some(Instant::now() + self.keep_alive_used / 2);
            self.keep_alive_deadline = Some(Instant::now() + self.keep_alive_used);
        }

        self.set_status(SessionStatus::Connected);
        log::info!("session: connected, client id: {}", self.client_id);
        for resp in self.pending_connectors.drain(..) {
            let _ = resp.send(Ok(()));
        }
        Ok(())
    }

    async fn on_publish(&mut self, packet: PublishPacket) -> Result<(), Error> {
        if self.status != SessionStatus::Connected {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "PUBLISH before CONNACK",
            ));
        }
        match packet.qos() {
            QoS::AtMostOnce => self.deliver_publish(&packet),
            QoS::AtLeastOnce => {
                let ack = PublishAckPacket::new(packet.packet_id());
                self.deliver_publish(&packet);
                self.send_or_teardown(ack).await;
            }
            QoS::ExactOnce => {
                let packet_id = packet.packet_id();
                // A duplicate of an id still waiting for PUBREL has been
                // delivered already.
                if self.incoming_qos2.insert(packet_id.value()) {
                    self.deliver_publish(&packet);
                }
                let received = PublishReceivedPacket::new(packet_id);
                self.send_or_teardown(received).await;
            }
        }
        Ok(())
    }

    /// Hand a copy of `packet` to every matching filter subscriber.
    fn deliver_publish(&mut self, packet: &PublishPacket) {
        for waiter in &mut self.publish_waiters {
            if waiter.filter.is_match(packet.topic()) {
                waiter
                    .senders
                    .retain(|sender| sender.send(packet.clone()).is_ok());
            }
        }
        self.publish_waiters.retain(|waiter| !waiter.senders.is_empty());
    }

    fn on_publish_ack(&mut self, packet: &PublishAckPacket) -> Result<(), Error> {
        let packet_id = packet.packet_id();
        if let Some(mut in_flight) = self.publishing_packets.shift_remove(&packet_id.value()) {
            log::debug!(
                "session: publish to `{}` acknowledged",
                in_flight.packet.topic()
            );
            if let Some(resp) = in_flight.resp.take() {
                let _ = resp.send(Ok(packet.reason_code()));
            }
        } else {
            log::warn!("session: PUBACK with unknown packet id: {packet_id}");
        }
        Ok(())
    }

    async fn on_publish_received(&mut self, packet: PublishReceivedPacket) -> Result<(), Error> {
        let packet_id = packet.packet_id();
        if !self.publishing_packets.contains_key(&packet_id.value()) {
            log::warn!("session: PUBREC with unknown packet id: {packet_id}");
            return Ok(());
        }

        if packet.reason_code().is_error() {
            if let Some(mut in_flight) = self.publishing_packets.shift_remove(&packet_id.value())
            {
                if let Some(resp) = in_flight.resp.take() {
                    let _ = resp.send(Ok(packet.reason_code()));
                }
            }
            return Ok(());
        }

        // The entry stays in flight until PUBCOMP releases the id.
        let release = PublishReleasePacket::new(packet_id);
        self.send_or_teardown(release).await;
        Ok(())
    }

    async fn on_publish_release(&mut self, packet: PublishReleasePacket) -> Result<(), Error> {
        let packet_id = packet.packet_id();
        let mut complete = PublishCompletePacket::new(packet_id);
        if !self.incoming_qos2.shift_remove(&packet_id.value()) {
            log::warn!("session: PUBREL with unknown packet id: {packet_id}");
            let _ = complete.set_reason_code(ReasonCode::PacketIdentifierNotFound);
        }
        self.send_or_teardown(complete).await;
        Ok(())
    }

    fn on_publish_complete(&mut self, packet: &PublishCompletePacket) -> Result<(), Error> {
        let packet_id = packet.packet_id();
        if let Some(mut in_flight) = self.publishing_packets.shift_remove(&packet_id.value()) {
            if let Some(resp) = in_flight.resp.take() {
                let _ = resp.send(Ok(packet.reason_code()));
            }
        } else {
            log::warn!("session: PUBCOMP with unknown packet id: {packet_id}");
        }
        Ok(())
    }

    fn on_subscribe_ack(&mut self, packet: SubscribeAckPacket) -> Result<(), Error> {
        let packet_id = packet.packet_id();
        if let Some(mut in_flight) = self.subscribing_packets.shift_remove(&packet_id.value()) {
            log::debug!(
                "session: subscription {:?} acknowledged",
                in_flight.packet.topics()
            );
            if let Some(resp) = in_flight.resp.take() {
                let _ = resp.send(Ok(packet.reasons().to_vec()));
            }
        } else {
            log::warn!("session: SUBACK with unknown packet id: {packet_id}");
        }
        Ok(())
    }

    fn on_unsubscribe_ack(&mut self, packet: UnsubscribeAckPacket) -> Result<(), Error> {
        let packet_id = packet.packet_id();
        if let Some(mut in_flight) = self.unsubscribing_packets.shift_remove(&packet_id.value()) {
            log::debug!(
                "session: topics {:?} unsubscribe acknowledged",
                in_flight.packet.topics()
            );
            if let Some(resp) = in_flight.resp.take() {
                let _ = resp.send(Ok(packet.reasons().to_vec()));
            }
        } else {
            log::warn!("session: UNSUBACK with unknown packet id: {packet_id}");
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: ClientToSessionCmd) {
        match cmd {
            ClientToSessionCmd::Connect { resp, .. } => {
                if self.status == SessionStatus::Connected {
                    let _ = resp.send(Ok(()));
                } else {
                    self.pending_connectors.push(resp);
                }
            }
            ClientToSessionCmd::Publish {
                topic,
                payload,
                options,
                resp,
            } => self.handle_publish(&topic, &payload, options, resp).await,
            ClientToSessionCmd::Subscribe { topics, resp } => {
                self.handle_subscribe(topics, resp).await;
            }
            ClientToSessionCmd::Unsubscribe { topics, resp } => {
                self.handle_unsubscribe(&topics, resp).await;
            }
            ClientToSessionCmd::SubscribeFilter { filter, resp } => {
                let receiver = self.register_filter(filter);
                let _ = resp.send(receiver);
            }
            ClientToSessionCmd::Disconnect { resp } => {
                let _ = self.send(DisconnectPacket::new()).await;
                self.teardown(None).await;
                let _ = resp.send(Ok(()));
            }
        }
    }

    async fn handle_publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        mut options: PublishOptions,
        resp: oneshot::Sender<Result<ReasonCode, Error>>,
    ) {
        if self.status != SessionStatus::Connected {
            let _ = resp.send(Err(Error::new(
                ErrorKind::InvalidSessionStatus,
                "Not connected",
            )));
            return;
        }

        let mut packet = match Self::build_publish_packet(topic, payload, &mut options) {
            Ok(packet) => packet,
            Err(err) => {
                let _ = resp.send(Err(err));
                return;
            }
        };

        if packet.qos() == QoS::AtMostOnce {
            match self.send(packet).await {
                Ok(()) => {
                    let _ = resp.send(Ok(ReasonCode::Success));
                }
                Err(err) => {
                    let _ = resp.send(Err(err.clone()));
                    self.teardown(Some(err)).await;
                }
            }
            return;
        }

        let Some(packet_id) = self.allocate_packet_id() else {
            let _ = resp.send(Err(Error::new(
                ErrorKind::PacketIdExhausted,
                "All packet identifiers in flight",
            )));
            return;
        };
        packet.set_packet_id(packet_id);

        match self.send(packet.clone()).await {
            Ok(()) => {
                self.publishing_packets.insert(
                    packet_id.value(),
                    InFlightPublish {
                        packet,
                        resp: Some(resp),
                    },
                );
            }
            Err(err) => {
                let _ = resp.send(Err(err.clone()));
                self.teardown(Some(err)).await;
            }
        }
    }

    fn build_publish_packet(
        topic: &str,
        payload: &[u8],
        options: &mut PublishOptions,
    ) -> Result<PublishPacket, Error> {
        let mut packet = PublishPacket::new(topic, options.qos(), payload)?;
        packet.set_retain(options.retain());

        let properties = packet.properties_mut();
        if let Some(response_topic) = options.response_topic() {
            properties.push(Property::ResponseTopic(PubTopic::new(response_topic)?));
        }
        if let Some(content_type) = options.content_type() {
            properties.push(Property::ContentType(StringData::from(content_type)?));
        }
        if let Some(topic_alias) = options.topic_alias() {
            properties.push(Property::TopicAlias(U16Data::new(topic_alias)));
        }
        if let Some(interval) = options.message_expiry_interval() {
            properties.push(Property::MessageExpiryInterval(U32Data::new(interval)));
        }
        for (key, value) in options.user_properties() {
            properties.push(Property::UserProperty(StringPairData::from(key, value)?));
        }

        if let Some(modifier) = options.take_modifier() {
            modifier(&mut packet);
        }
        Ok(packet)
    }

    async fn handle_subscribe(
        &mut self,
        topics: Vec<SubscribeTopic>,
        resp: oneshot::Sender<Result<Vec<ReasonCode>, Error>>,
    ) {
        if self.status != SessionStatus::Connected {
            let _ = resp.send(Err(Error::new(
                ErrorKind::InvalidSessionStatus,
                "Not connected",
            )));
            return;
        }
        let Some(packet_id) = self.allocate_packet_id() else {
            let _ = resp.send(Err(Error::new(
                ErrorKind::PacketIdExhausted,
                "All packet identifiers in flight",
            )));
            return;
        };
        let packet = match SubscribePacket::with_topics(packet_id, topics) {
            Ok(packet) => packet,
            Err(err) => {
                let _ = resp.send(Err(err.into()));
                return;
            }
        };

        match self.send(packet.clone()).await {
            Ok(()) => {
                self.subscribing_packets.insert(
                    packet_id.value(),
                    InFlightSubscribe {
                        packet,
                        resp: Some(resp),
                    },
                );
            }
            Err(err) => {
                let _ = resp.send(Err(err.clone()));
                self.teardown(Some(err)).await;
            }
        }
    }

    async fn handle_unsubscribe(
        &mut self,
        topics: &[String],
        resp: oneshot::Sender<Result<Vec<ReasonCode>, Error>>,
    ) {
        if self.status != SessionStatus::Connected {
            let _ = resp.send(Err(Error::new(
                ErrorKind::InvalidSessionStatus,
                "Not connected",
            )));
            return;
        }
        let mut filters = Vec::with_capacity(topics.len());
        for topic in topics {
            match codec::SubTopic::new(topic) {
                Ok(filter) => filters.push(filter),
                Err(err) => {
                    let _ = resp.send(Err(err.into()));
                    return;
                }
            }
        }
        let Some(packet_id) = self.allocate_packet_id() else {
            let _ = resp.send(Err(Error::new(
                ErrorKind::PacketIdExhausted,
                "All packet identifiers in flight",
            )));
            return;
        };
        let packet = match UnsubscribePacket::with_topics(packet_id, filters) {
            Ok(packet) => packet,
            Err(err) => {
                let _ = resp.send(Err(err.into()));
                return;
            }
        };

        match self.send(packet.clone()).await {
            Ok(()) => {
                self.unsubscribing_packets.insert(
                    packet_id.value(),
                    InFlightUnsubscribe {
                        packet,
                        resp: Some(resp),
                    },
                );
            }
            Err(err) => {
                let _ = resp.send(Err(err.clone()));
                self.teardown(Some(err)).await;
            }
        }
    }

    fn register_filter(
        &mut self,
        filter: TopicFilter,
    ) -> mpsc::UnboundedReceiver<PublishPacket> {
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(entry) = self
            .publish_waiters
            .iter_mut()
            .find(|entry| entry.filter == filter)
        {
            entry.senders.push(sender);
        } else {
            self.publish_waiters.push(FilterSubscription {
                filter,
                senders: vec![sender],
            });
        }
        receiver
    }

    /// An identifier must be unique across all in-flight request kinds.
    fn allocate_packet_id(&mut self) -> Option<PacketId> {
        let publishing = &self.publishing_packets;
        let subscribing = &self.subscribing_packets;
        let unsubscribing = &self.unsubscribing_packets;
        self.allocator.allocate(|id| {
            publishing.contains_key(&id)
                || subscribing.contains_key(&id)
                || unsubscribing.contains_key(&id)
        })
    }

    async fn send<P: EncodePacket>(&mut self, packet: P) -> Result<(), Error> {
        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::new(
                ErrorKind::InvalidSessionStatus,
                "Stream is closed",
            ));
        };
        stream.write_all(&buf).await
    }

    /// Send an acknowledgement packet; write errors cost the connection.
    async fn send_or_teardown<P: EncodePacket>(&mut self, packet: P) {
        if let Err(err) = self.send(packet).await {
            log::warn!("session: write failed: {err}");
            self.teardown(Some(err)).await;
        }
    }

    /// The peer violated the protocol; tell it why before closing.
    async fn send_error_disconnect(&mut self, err: &Error) {
        let reason = match err.kind() {
            ErrorKind::MalformedPacket => ReasonCode::MalformedPacket,
            ErrorKind::ProtocolError => ReasonCode::ProtocolError,
            _ => return,
        };
        let _ = self.send(DisconnectPacket::with_reason(reason)).await;
    }

    /// Close the transport and resolve every pending handle exactly once.
    async fn teardown(&mut self, reason: Option<Error>) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close().await;
        }
        self.ping_deadline = None;
        self.keep_alive_deadline = None;
        self.handshake_deadline = None;
        self.recv_buf.clear();

        let err = reason.unwrap_or_else(cancelled);

        for resp in self.pending_connectors.drain(..) {
            let _ = resp.send(Err(err.clone()));
        }
        for in_flight in self.publishing_packets.values_mut() {
            if let Some(resp) = in_flight.resp.take() {
                let _ = resp.send(Err(err.clone()));
            }
        }
        for in_flight in self.subscribing_packets.values_mut() {
            if let Some(resp) = in_flight.resp.take() {
                let _ = resp.send(Err(err.clone()));
            }
        }
        for in_flight in self.unsubscribing_packets.values_mut() {
            if let Some(resp) = in_flight.resp.take() {
                let _ = resp.send(Err(err.clone()));
            }
        }
        // Entries survive transport loss unless a clean start was
        // negotiated, keeping their identifiers reserved for retry by a
        // later connection.
        if self.options.clean_start() {
            self.publishing_packets.clear();
            self.subscribing_packets.clear();
            self.unsubscribing_packets.clear();
        }
        self.incoming_qos2.clear();

        // Filter subscription streams are finite; they end here.
        self.publish_waiters.clear();

        self.set_status(SessionStatus::Disconnected);
    }
}

/// Byte length of the first complete packet in `buf`, if any.
///
/// Returns `None` when more bytes are needed to complete the fixed header
/// or the body.
fn packet_frame_len(buf: &[u8]) -> Result<Option<usize>, Error> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    for index in 1..=4 {
        let Some(&byte) = buf.get(index) else {
            return Ok(None);
        };
        remaining_length += (byte as usize & 0x7f) * multiplier;
        multiplier *= 128;
        if byte & 0x80 == 0 {
            let header_len = index + 1;
            let total = header_len + remaining_length;
            if buf.len() < total {
                return Ok(None);
            }
            return Ok(Some(total));
        }
    }

    Err(Error::new(
        ErrorKind::MalformedPacket,
        "Invalid remaining length",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = watch::channel(SessionState::default());
        Session::new(cmd_rx, state_tx)
    }

    type InFlightHandles = (
        oneshot::Receiver<Result<ReasonCode, Error>>,
        oneshot::Receiver<Result<Vec<ReasonCode>, Error>>,
        oneshot::Receiver<Result<Vec<ReasonCode>, Error>>,
    );

    fn fill_in_flight_tables(session: &mut Session) -> InFlightHandles {
        let (publish_tx, publish_rx) = oneshot::channel();
        session.publishing_packets.insert(
            1,
            InFlightPublish {
                packet: PublishPacket::new("hold/one", QoS::AtLeastOnce, b"a").unwrap(),
                resp: Some(publish_tx),
            },
        );
        let (subscribe_tx, subscribe_rx) = oneshot::channel();
        session.subscribing_packets.insert(
            2,
            InFlightSubscribe {
                packet: SubscribePacket::new("hold/#", QoS::AtMostOnce, PacketId::new(2))
                    .unwrap(),
                resp: Some(subscribe_tx),
            },
        );
        let (unsubscribe_tx, unsubscribe_rx) = oneshot::channel();
        session.unsubscribing_packets.insert(
            3,
            InFlightUnsubscribe {
                packet: UnsubscribePacket::new("hold/#", PacketId::new(3)).unwrap(),
                resp: Some(unsubscribe_tx),
            },
        );
        (publish_rx, subscribe_rx, unsubscribe_rx)
    }

    #[tokio::test]
    async fn test_teardown_retains_in_flight_tables_without_clean_start() {
        let mut session = test_session();
        session.options.set_clean_start(false);
        let (mut publish_rx, mut subscribe_rx, mut unsubscribe_rx) =
            fill_in_flight_tables(&mut session);

        session.teardown(None).await;

        // Every handle resolves exactly once, with the teardown error.
        assert!(publish_rx.try_recv().unwrap().is_err());
        assert!(subscribe_rx.try_recv().unwrap().is_err());
        assert!(unsubscribe_rx.try_recv().unwrap().is_err());

        // The entries themselves survive transport loss, keeping their
        // identifiers reserved.
        assert!(session.publishing_packets.contains_key(&1));
        assert!(session.subscribing_packets.contains_key(&2));
        assert!(session.unsubscribing_packets.contains_key(&3));
        assert_eq!(session.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_teardown_drains_in_flight_tables_with_clean_start() {
        let mut session = test_session();
        session.options.set_clean_start(true);
        let (mut publish_rx, mut subscribe_rx, mut unsubscribe_rx) =
            fill_in_flight_tables(&mut session);

        session.teardown(None).await;

        assert!(publish_rx.try_recv().unwrap().is_err());
        assert!(subscribe_rx.try_recv().unwrap().is_err());
        assert!(unsubscribe_rx.try_recv().unwrap().is_err());

        assert!(session.publishing_packets.is_empty());
        assert!(session.subscribing_packets.is_empty());
        assert!(session.unsubscribing_packets.is_empty());
    }

    #[test]
    fn test_packet_frame_len() {
        // Incomplete fixed header.
        assert_eq!(packet_frame_len(&[0xd0]).unwrap(), None);
        // Complete PINGRESP.
        assert_eq!(packet_frame_len(&[0xd0, 0x00]).unwrap(), Some(2));
        // PUBACK missing body bytes.
        assert_eq!(packet_frame_len(&[0x40, 0x02, 0x00]).unwrap(), None);
        assert_eq!(
            packet_frame_len(&[0x40, 0x02, 0x00, 0x01]).unwrap(),
            Some(4)
        );
        // Trailing bytes of a second packet do not confuse the framer.
        assert_eq!(
            packet_frame_len(&[0x40, 0x02, 0x00, 0x01, 0xd0]).unwrap(),
            Some(4)
        );
        // Five byte remaining length is malformed.
        assert!(packet_frame_len(&[0x30, 0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }

    #[test]
    fn test_packet_frame_len_incomplete_varint() {
        assert_eq!(packet_frame_len(&[0x30, 0x80]).unwrap(), None);
        assert_eq!(packet_frame_len(&[0x30, 0x80, 0x80]).unwrap(), None);
    }
}
