// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Asynchronous MQTT v5 client library.
//!
//! The [`AsyncClient`] handle talks to a [`Session`] engine which owns the
//! transport connection and all session state. Supported transports are
//! plain TCP, TLS, WebSocket and secure WebSocket.

mod client;
mod commands;
mod connect_options;
mod error;
mod packet_id;
mod publish_options;
mod session;
mod status;
mod stream;

pub use client::AsyncClient;
pub use commands::ClientToSessionCmd;
pub use connect_options::{
    ConnectOptions, ConnectType, LastWill, MqttConnect, MqttsConnect, SelfSignedTls, TlsType,
    WsConnect, WssConnect,
};
pub use error::{Error, ErrorKind};
pub use packet_id::PacketIdAllocator;
pub use publish_options::{PublishModifier, PublishOptions};
pub use session::Session;
pub use status::SessionStatus;
pub use stream::Stream;
