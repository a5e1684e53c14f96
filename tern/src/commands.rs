// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use codec::{PublishPacket, ReasonCode, SubscribeTopic, TopicFilter};
use tokio::sync::{mpsc, oneshot};

use crate::connect_options::ConnectOptions;
use crate::error::Error;
use crate::publish_options::PublishOptions;

/// Requests sent from client handles to the session task.
///
/// Each request carries a oneshot sender which resolves exactly once, with
/// the operation result or an error.
pub enum ClientToSessionCmd {
    /// Establish a connection with `options` and complete on CONNACK.
    Connect {
        options: Box<ConnectOptions>,
        resp: oneshot::Sender<Result<(), Error>>,
    },

    /// Publish `payload` to `topic`, completing with the acknowledgement
    /// reason code. QoS 0 publishes complete immediately with success.
    Publish {
        topic: String,
        payload: Vec<u8>,
        options: PublishOptions,
        resp: oneshot::Sender<Result<ReasonCode, Error>>,
    },

    /// Subscribe a list of topic filters, completing with one reason code
    /// per filter.
    Subscribe {
        topics: Vec<SubscribeTopic>,
        resp: oneshot::Sender<Result<Vec<ReasonCode>, Error>>,
    },

    /// Unsubscribe a list of topic filters, completing with one reason code
    /// per filter.
    Unsubscribe {
        topics: Vec<String>,
        resp: oneshot::Sender<Result<Vec<ReasonCode>, Error>>,
    },

    /// Register local interest in publish messages matching `filter`.
    ///
    /// The returned receiver yields matching inbound publish packets and
    /// terminates on disconnect.
    SubscribeFilter {
        filter: TopicFilter,
        resp: oneshot::Sender<mpsc::UnboundedReceiver<PublishPacket>>,
    },

    /// Send DISCONNECT and close the connection.
    Disconnect { resp: oneshot::Sender<Result<(), Error>> },
}
