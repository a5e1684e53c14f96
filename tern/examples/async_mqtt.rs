// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use codec::QoS;
use tern::{AsyncClient, ConnectOptions};

#[tokio::main]
async fn main() -> Result<(), tern::Error> {
    std::env::set_var("RUST_LOG", "info");
    env_logger::init();

    let options = ConnectOptions::new("127.0.0.1", 1883);
    log::info!("options: {:?}", options);

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await?;
    log::info!("client id: {}", client.assigned_client_id());

    let mut messages = client.subscribe_filter("hello").await?;
    client.subscribe("hello", QoS::AtMostOnce).await?;
    client.publish("hello", QoS::AtMostOnce, b"Hello, world").await?;

    if let Some(message) = messages.recv().await {
        log::info!(
            "got message on `{}`: {:?}",
            message.topic(),
            std::str::from_utf8(message.message())
        );
    }

    client.disconnect().await
}
