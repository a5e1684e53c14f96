// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Session engine tests against a scripted broker on a local TCP socket.

use std::time::Duration;

use codec::{
    ByteArray, ConnectAckPacket, EncodePacket, MqttPacket, PingResponsePacket, Property,
    PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket, QoS, ReasonCode, StringData, SubscribeAckPacket, U16Data,
    UnsubscribeAckPacket,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tern::{AsyncClient, ConnectOptions, ErrorKind};

/// Read one complete MQTT packet frame from `socket`.
async fn read_frame(socket: &mut TcpStream) -> Vec<u8> {
    let mut frame = vec![0_u8; 1];
    socket.read_exact(&mut frame).await.unwrap();

    let mut remaining: usize = 0;
    let mut multiplier: usize = 1;
    loop {
        let mut byte = [0_u8; 1];
        socket.read_exact(&mut byte).await.unwrap();
        frame.push(byte[0]);
        remaining += (byte[0] as usize & 0x7f) * multiplier;
        multiplier *= 128;
        if byte[0] & 0x80 == 0 {
            break;
        }
    }

    let mut body = vec![0_u8; remaining];
    socket.read_exact(&mut body).await.unwrap();
    frame.extend_from_slice(&body);
    frame
}

async fn read_packet(socket: &mut TcpStream) -> MqttPacket {
    let frame = read_frame(socket).await;
    let mut ba = ByteArray::new(&frame);
    MqttPacket::decode(&mut ba).unwrap()
}

async fn send_packet<P: EncodePacket>(socket: &mut TcpStream, packet: &P) {
    let mut buf = Vec::new();
    packet.encode(&mut buf).unwrap();
    socket.write_all(&buf).await.unwrap();
}

/// Start a listener and return connect options pointing at it.
async fn broker_endpoint() -> (TcpListener, ConnectOptions) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let options = ConnectOptions::new("127.0.0.1", port);
    (listener, options)
}

async fn accept_and_connack(listener: &TcpListener) -> TcpStream {
    let (mut socket, _addr) = listener.accept().await.unwrap();
    let connect = read_packet(&mut socket).await;
    assert!(matches!(connect, MqttPacket::Connect(_)));
    send_packet(&mut socket, &ConnectAckPacket::new(false, ReasonCode::Success)).await;
    socket
}

#[tokio::test]
async fn test_connect_and_publish_qos1() {
    let (listener, options) = broker_endpoint().await;

    let broker = tokio::spawn(async move {
        let mut socket = accept_and_connack(&listener).await;

        let packet = read_packet(&mut socket).await;
        let MqttPacket::Publish(publish) = packet else {
            panic!("expected PUBLISH, got {packet:?}");
        };
        assert_eq!(publish.topic(), "test/topic");
        assert_eq!(publish.qos(), QoS::AtLeastOnce);
        assert_eq!(publish.message(), b"hello");
        assert_ne!(publish.packet_id().value(), 0);
        send_packet(&mut socket, &PublishAckPacket::new(publish.packet_id())).await;

        let packet = read_packet(&mut socket).await;
        assert!(matches!(packet, MqttPacket::Disconnect(_)));
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await.unwrap();
    assert!(client.is_connected());

    let reason = client
        .publish("test/topic", QoS::AtLeastOnce, b"hello")
        .await
        .unwrap();
    assert_eq!(reason, ReasonCode::Success);

    client.disconnect().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn test_publish_qos2_handshake() {
    let (listener, options) = broker_endpoint().await;

    let broker = tokio::spawn(async move {
        let mut socket = accept_and_connack(&listener).await;

        let packet = read_packet(&mut socket).await;
        let MqttPacket::Publish(publish) = packet else {
            panic!("expected PUBLISH, got {packet:?}");
        };
        assert_eq!(publish.qos(), QoS::ExactOnce);
        let packet_id = publish.packet_id();
        send_packet(&mut socket, &PublishReceivedPacket::new(packet_id)).await;

        let packet = read_packet(&mut socket).await;
        let MqttPacket::PublishRelease(release) = packet else {
            panic!("expected PUBREL, got {packet:?}");
        };
        assert_eq!(release.packet_id(), packet_id);
        send_packet(&mut socket, &PublishCompletePacket::new(packet_id)).await;
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await.unwrap();
    let reason = client
        .publish("exactly/once", QoS::ExactOnce, b"payload")
        .await
        .unwrap();
    assert_eq!(reason, ReasonCode::Success);
    broker.await.unwrap();
}

#[tokio::test]
async fn test_subscribe_and_receive_publish() {
    let (listener, options) = broker_endpoint().await;

    let broker = tokio::spawn(async move {
        let mut socket = accept_and_connack(&listener).await;

        let packet = read_packet(&mut socket).await;
        let MqttPacket::Subscribe(subscribe) = packet else {
            panic!("expected SUBSCRIBE, got {packet:?}");
        };
        assert_eq!(subscribe.topics().len(), 1);
        assert_eq!(subscribe.topics()[0].topic(), "sensor/+");
        send_packet(
            &mut socket,
            &SubscribeAckPacket::new(subscribe.packet_id(), ReasonCode::Success),
        )
        .await;

        let publish = PublishPacket::new("sensor/kitchen", QoS::AtMostOnce, b"21.5").unwrap();
        send_packet(&mut socket, &publish).await;

        // Unrelated topic, must not reach the subscriber.
        let publish = PublishPacket::new("actuator/valve", QoS::AtMostOnce, b"open").unwrap();
        send_packet(&mut socket, &publish).await;
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await.unwrap();

    let mut messages = client.subscribe_filter("sensor/+").await.unwrap();
    let reasons = client.subscribe("sensor/+", QoS::AtMostOnce).await.unwrap();
    assert_eq!(reasons, vec![ReasonCode::Success]);

    let message = messages.recv().await.unwrap();
    assert_eq!(message.topic(), "sensor/kitchen");
    assert_eq!(message.message(), b"21.5");

    broker.await.unwrap();
}

#[tokio::test]
async fn test_inbound_qos1_and_qos2_acknowledged() {
    let (listener, options) = broker_endpoint().await;

    let broker = tokio::spawn(async move {
        let mut socket = accept_and_connack(&listener).await;

        // The client signals with a marker publish that its local filter
        // is registered.
        let packet = read_packet(&mut socket).await;
        assert!(matches!(packet, MqttPacket::Publish(_)));

        let mut publish = PublishPacket::new("inbound/one", QoS::AtLeastOnce, b"a").unwrap();
        publish.set_packet_id(codec::PacketId::new(400));
        send_packet(&mut socket, &publish).await;

        let packet = read_packet(&mut socket).await;
        let MqttPacket::PublishAck(ack) = packet else {
            panic!("expected PUBACK, got {packet:?}");
        };
        assert_eq!(ack.packet_id().value(), 400);
        assert_eq!(ack.reason_code(), ReasonCode::Success);

        let mut publish = PublishPacket::new("inbound/two", QoS::ExactOnce, b"b").unwrap();
        publish.set_packet_id(codec::PacketId::new(401));
        send_packet(&mut socket, &publish).await;

        let packet = read_packet(&mut socket).await;
        let MqttPacket::PublishReceived(received) = packet else {
            panic!("expected PUBREC, got {packet:?}");
        };
        assert_eq!(received.packet_id().value(), 401);
        send_packet(
            &mut socket,
            &PublishReleasePacket::new(received.packet_id()),
        )
        .await;

        let packet = read_packet(&mut socket).await;
        let MqttPacket::PublishComplete(complete) = packet else {
            panic!("expected PUBCOMP, got {packet:?}");
        };
        assert_eq!(complete.packet_id().value(), 401);
        assert_eq!(complete.reason_code(), ReasonCode::Success);
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await.unwrap();
    let mut messages = client.subscribe_filter("inbound/#").await.unwrap();
    client
        .publish("ready", QoS::AtMostOnce, b"")
        .await
        .unwrap();

    let message = messages.recv().await.unwrap();
    assert_eq!(message.topic(), "inbound/one");
    let message = messages.recv().await.unwrap();
    assert_eq!(message.topic(), "inbound/two");

    broker.await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe() {
    let (listener, options) = broker_endpoint().await;

    let broker = tokio::spawn(async move {
        let mut socket = accept_and_connack(&listener).await;

        let packet = read_packet(&mut socket).await;
        let MqttPacket::Unsubscribe(unsubscribe) = packet else {
            panic!("expected UNSUBSCRIBE, got {packet:?}");
        };
        assert_eq!(unsubscribe.topics().len(), 1);
        send_packet(
            &mut socket,
            &UnsubscribeAckPacket::new(unsubscribe.packet_id(), ReasonCode::NoSubscriptionExisted),
        )
        .await;
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await.unwrap();
    let reasons = client.unsubscribe(vec!["sensor/+".to_string()]).await.unwrap();
    assert_eq!(reasons, vec![ReasonCode::NoSubscriptionExisted]);
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connack_rejected() {
    let (listener, options) = broker_endpoint().await;

    let broker = tokio::spawn(async move {
        let (mut socket, _addr) = listener.accept().await.unwrap();
        let connect = read_packet(&mut socket).await;
        assert!(matches!(connect, MqttPacket::Connect(_)));
        send_packet(
            &mut socket,
            &ConnectAckPacket::new(false, ReasonCode::BadUserNameOrPassword),
        )
        .await;
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    let err = client.connect(options).await.unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::ConnAckRejected(ReasonCode::BadUserNameOrPassword)
    );
    assert!(!client.is_connected());
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connack_overrides() {
    let (listener, mut options) = broker_endpoint().await;
    options.set_client_id("");
    options.set_keep_alive(Duration::from_secs(60));

    let broker = tokio::spawn(async move {
        let (mut socket, _addr) = listener.accept().await.unwrap();
        let connect = read_packet(&mut socket).await;
        assert!(matches!(connect, MqttPacket::Connect(_)));

        let mut connack = ConnectAckPacket::new(false, ReasonCode::Success);
        connack.properties_mut().push(Property::AssignedClientIdentifier(
            StringData::from("srv-assigned-42").unwrap(),
        ));
        connack
            .properties_mut()
            .push(Property::ServerKeepAlive(U16Data::new(30)));
        send_packet(&mut socket, &connack).await;

        // Keep the socket open while the client checks its state.
        let _ = read_frame(&mut socket).await;
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await.unwrap();
    assert_eq!(client.assigned_client_id(), "srv-assigned-42");
    assert_eq!(client.negotiated_keep_alive(), Duration::from_secs(30));
    client.disconnect().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn test_keep_alive_ping() {
    let (listener, mut options) = broker_endpoint().await;
    options.set_keep_alive(Duration::from_secs(2));

    let broker = tokio::spawn(async move {
        let mut socket = accept_and_connack(&listener).await;

        // With keep alive of 2s a ping request arrives after about 1s.
        let frame = tokio::time::timeout(Duration::from_secs(3), read_frame(&mut socket))
            .await
            .expect("no PINGREQ within keep alive window");
        assert_eq!(frame, vec![0xc0, 0x00]);
        send_packet(&mut socket, &PingResponsePacket::new()).await;
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connection_lost_fails_pending_operations() {
    let (listener, options) = broker_endpoint().await;

    let broker = tokio::spawn(async move {
        let mut socket = accept_and_connack(&listener).await;
        // Drop the connection without a DISCONNECT packet.
        socket.shutdown().await.unwrap();
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await.unwrap();
    broker.await.unwrap();

    // Give the session a moment to observe the closed stream.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_connected());

    let err = client
        .publish("test/topic", QoS::AtLeastOnce, b"hello")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::InvalidSessionStatus);
}

#[tokio::test]
async fn test_reconnect_keeps_unacknowledged_packet_ids() {
    let (listener, mut options) = broker_endpoint().await;
    options.set_clean_start(false).set_client_id("resumer");

    let broker = tokio::spawn(async move {
        // First connection: take a publish but drop the link before
        // acknowledging it.
        let mut socket = accept_and_connack(&listener).await;
        let packet = read_packet(&mut socket).await;
        let MqttPacket::Publish(publish) = packet else {
            panic!("expected PUBLISH, got {packet:?}");
        };
        let first_id = publish.packet_id();
        socket.shutdown().await.unwrap();
        drop(socket);

        // Second connection: the unacknowledged identifier is still
        // reserved by the session, so the next publish gets a fresh one.
        let mut socket = accept_and_connack(&listener).await;
        let packet = read_packet(&mut socket).await;
        let MqttPacket::Publish(publish) = packet else {
            panic!("expected PUBLISH, got {packet:?}");
        };
        assert_ne!(publish.packet_id(), first_id);
        send_packet(&mut socket, &PublishAckPacket::new(publish.packet_id())).await;
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options.clone()).await.unwrap();
    let err = client
        .publish("hold/one", QoS::AtLeastOnce, b"a")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Cancelled);

    client.connect(options).await.unwrap();
    let reason = client
        .publish("hold/two", QoS::AtLeastOnce, b"b")
        .await
        .unwrap();
    assert_eq!(reason, ReasonCode::Success);
    broker.await.unwrap();
}

#[tokio::test]
async fn test_handshake_timeout() {
    let (listener, options) = broker_endpoint().await;

    tokio::spawn(async move {
        // Accept the transport connection but never answer the CONNECT.
        let (mut socket, _addr) = listener.accept().await.unwrap();
        let _ = read_frame(&mut socket).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    let err = client.connect(options).await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::HandshakeTimeout);
}

#[tokio::test]
async fn test_connack_with_session_present_flag() {
    let (listener, mut options) = broker_endpoint().await;
    options.set_clean_start(false).set_client_id("fixed-id");

    let broker = tokio::spawn(async move {
        let (mut socket, _addr) = listener.accept().await.unwrap();
        let packet = read_packet(&mut socket).await;
        let MqttPacket::Connect(connect) = packet else {
            panic!("expected CONNECT, got {packet:?}");
        };
        assert!(!connect.clean_start());
        assert_eq!(connect.client_id(), "fixed-id");

        let mut connack = ConnectAckPacket::new(false, ReasonCode::Success);
        connack.set_session_present(true);
        connack.properties_mut().push(Property::TopicAliasMaximum(U16Data::new(10)));
        send_packet(&mut socket, &connack).await;

        let _ = read_frame(&mut socket).await;
    });

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.assigned_client_id(), "fixed-id");
    client.disconnect().await.unwrap();
    broker.await.unwrap();
}
