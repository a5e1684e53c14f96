// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Wire codec for the MQTT v5 control packet set.
//!
//! Packets are plain structs with `encode`/`decode` operations; no I/O
//! happens in this crate. The [`MqttPacket`] enum ties every packet type
//! together for header-driven dispatch.

mod auth;
mod base;
mod binary_data;
mod bool_data;
mod byte_array;
mod connect;
mod connect_ack;
mod connect_flags;
mod disconnect;
mod error;
mod header;
mod packet;
mod packet_id;
mod ping_request;
mod ping_response;
mod property;
mod protocol_level;
mod publish;
mod publish_ack;
mod publish_complete;
mod publish_received;
mod publish_release;
mod qos;
mod reason_code;
mod string_data;
mod string_pair_data;
mod subscribe;
mod subscribe_ack;
pub mod topic;
mod u16_data;
mod u32_data;
mod unsubscribe;
mod unsubscribe_ack;
pub mod utils;
mod var_int;

pub use auth::{AuthPacket, AUTH_REASONS};
pub use base::{DecodePacket, EncodePacket, PROTOCOL_NAME};
pub use binary_data::BinaryData;
pub use bool_data::BoolData;
pub use byte_array::{ByteArray, ByteArrayError};
pub use connect::ConnectPacket;
pub use connect_ack::{ConnectAckPacket, CONNECT_REASONS};
pub use connect_flags::ConnectFlags;
pub use disconnect::{DisconnectPacket, DISCONNECT_REASONS};
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, Packet, PacketType};
pub use packet::MqttPacket;
pub use packet_id::PacketId;
pub use ping_request::PingRequestPacket;
pub use ping_response::PingResponsePacket;
pub use property::{Properties, Property, PropertyType, MULTIPLE_PROPERTIES};
pub use protocol_level::ProtocolLevel;
pub use publish::PublishPacket;
pub use publish_ack::{PublishAckPacket, PUBLISH_ACK_REASONS};
pub use publish_complete::{PublishCompletePacket, PUBLISH_COMPLETE_REASONS};
pub use publish_received::{PublishReceivedPacket, PUBLISH_RECEIVED_REASONS};
pub use publish_release::{PublishReleasePacket, PUBLISH_RELEASE_REASONS};
pub use qos::QoS;
pub use reason_code::ReasonCode;
pub use string_data::StringData;
pub use string_pair_data::StringPairData;
pub use subscribe::{RetainHandling, SubscribePacket, SubscribeTopic};
pub use subscribe_ack::{SubscribeAckPacket, SUBSCRIBE_REASONS};
pub use topic::{PubTopic, SubTopic, TopicFilter};
pub use u16_data::U16Data;
pub use u32_data::U32Data;
pub use unsubscribe::UnsubscribePacket;
pub use unsubscribe_ack::{UnsubscribeAckPacket, UNSUBSCRIBE_REASONS};
pub use var_int::{VarInt, VarIntError, MAX_VAR_INT};
