// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use crate::connect_options::{ConnectOptions, ConnectType, TlsType};
use crate::error::{Error, ErrorKind};

/// Bidirectional byte stream between client and server.
///
/// All MQTT framing happens above this type; WebSocket transports carry
/// whole or partial packets inside binary frames.
pub enum Stream {
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
    Ws(WebSocketStream<TcpStream>),
    Wss(Box<WebSocketStream<TlsStream<TcpStream>>>),
}

impl Stream {
    /// Establish a transport connection described in `options`.
    ///
    /// # Errors
    ///
    /// Returns error if socket, TLS or WebSocket setup fails.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, Error> {
        let address = (options.hostname(), options.port());
        match options.connect_type() {
            ConnectType::Mqtt(_) => {
                let socket = TcpStream::connect(address).await?;
                Ok(Self::Mqtt(socket))
            }
            ConnectType::Mqtts(mqtts_connect) => {
                let socket = TcpStream::connect(address).await?;
                let tls_socket =
                    Self::tls_handshake(socket, &mqtts_connect.domain, &mqtts_connect.tls_type)
                        .await?;
                Ok(Self::Mqtts(Box::new(tls_socket)))
            }
            ConnectType::Ws(ws_connect) => {
                let socket = TcpStream::connect(address).await?;
                let ws_url = format!(
                    "ws://{}:{}{}",
                    options.hostname(),
                    options.port(),
                    &ws_connect.path
                );
                let (ws_stream, _response) =
                    tokio_tungstenite::client_async(ws_url, socket).await?;
                Ok(Self::Ws(ws_stream))
            }
            ConnectType::Wss(wss_connect) => {
                let socket = TcpStream::connect(address).await?;
                let tls_socket =
                    Self::tls_handshake(socket, &wss_connect.domain, &wss_connect.tls_type)
                        .await?;
                let ws_url = format!(
                    "wss://{}:{}{}",
                    &wss_connect.domain,
                    options.port(),
                    &wss_connect.path
                );
                let (ws_stream, _response) =
                    tokio_tungstenite::client_async(ws_url, tls_socket).await?;
                Ok(Self::Wss(Box::new(ws_stream)))
            }
        }
    }

    async fn tls_handshake(
        socket: TcpStream,
        domain: &str,
        tls_type: &TlsType,
    ) -> Result<TlsStream<TcpStream>, Error> {
        let mut root_store = RootCertStore::empty();
        match tls_type {
            TlsType::CASigned => {
                root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                    OwnedTrustAnchor::from_subject_spki_name_constraints(
                        ta.subject,
                        ta.spki,
                        ta.name_constraints,
                    )
                }));
            }
            TlsType::SelfSigned(self_signed) => {
                let root_ca_fd = File::open(&self_signed.root_ca_pem)?;
                let mut root_ca_buf = BufReader::new(root_ca_fd);
                for cert in rustls_pemfile::certs(&mut root_ca_buf)? {
                    root_store.add(&Certificate(cert)).map_err(|err| {
                        Error::from_string(
                            ErrorKind::CertError,
                            format!("Failed to add root ca cert: {err}"),
                        )
                    })?;
                }
            }
        }

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(domain).map_err(|err| {
            Error::from_string(ErrorKind::CertError, format!("Invalid server name: {err}"))
        })?;
        let tls_socket = connector.connect(server_name, socket).await?;
        Ok(tls_socket)
    }

    /// Read some bytes from the stream into `buf`.
    ///
    /// Returns the number of bytes read; 0 means the peer closed the stream.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying transport fails.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::Mqtt(socket) => Ok(socket.read_buf(buf).await?),
            Self::Mqtts(tls_socket) => Ok(tls_socket.read_buf(buf).await?),
            Self::Ws(ws) => Self::read_ws_message(ws, buf).await,
            Self::Wss(ws) => Self::read_ws_message(ws, buf).await,
        }
    }

    /// Read the next binary WebSocket frame into `buf`.
    ///
    /// Control frames are not MQTT bytes and are skipped.
    async fn read_ws_message<S>(
        ws: &mut WebSocketStream<S>,
        buf: &mut Vec<u8>,
    ) -> Result<usize, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            match ws.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(0),
                Some(Ok(Message::Binary(data))) if !data.is_empty() => {
                    buf.extend_from_slice(&data);
                    return Ok(data.len());
                }
                Some(Ok(_frame)) => (),
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    /// Write all bytes in `buf` to the stream as one contiguous sequence.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying transport fails.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self {
            Self::Mqtt(socket) => Ok(socket.write_all(buf).await?),
            Self::Mqtts(tls_socket) => Ok(tls_socket.write_all(buf).await?),
            Self::Ws(ws) => {
                let msg = Message::binary(buf.to_vec());
                Ok(ws.send(msg).await?)
            }
            Self::Wss(ws) => {
                let msg = Message::binary(buf.to_vec());
                Ok(ws.send(msg).await?)
            }
        }
    }

    /// Close the stream.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying transport fails.
    pub async fn close(&mut self) -> Result<(), Error> {
        match self {
            Self::Mqtt(socket) => Ok(socket.shutdown().await?),
            Self::Mqtts(tls_socket) => Ok(tls_socket.shutdown().await?),
            Self::Ws(ws) => Ok(ws.close(None).await?),
            Self::Wss(ws) => Ok(ws.close(None).await?),
        }
    }
}
