// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::time::Duration;

use codec::QoS;
use tern::{AsyncClient, ConnectOptions};

#[tokio::main]
async fn main() -> Result<(), tern::Error> {
    std::env::set_var("RUST_LOG", "info");
    env_logger::init();

    let mut options = ConnectOptions::new("127.0.0.1", 1883);
    options.set_keep_alive(Duration::from_secs(10));

    let (client, session) = AsyncClient::new();
    tokio::spawn(session.run_loop());

    client.connect(options).await?;

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    for round in 0..60_u32 {
        interval.tick().await;
        let payload = format!("round {round}");
        let reason = client
            .publish("hello/loop", QoS::AtLeastOnce, payload.as_bytes())
            .await?;
        log::info!("published round {round}: {reason:?}");
    }

    client.disconnect().await
}
