//! # Client Session
//!
//! Per-peer connection state: the handshake, IP enumeration, commit
//! sub-protocol, and (once Phase 4 starts) the full-duplex reader/writer
//! pumps that bridge the socket to the router's channels.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::wire::{self, IpInfo, Message, SystemInfo};

/// An item on a client's outbound queue.
///
/// `Forward` carries a message the routing task already has encoded (a
/// verbatim response, or a request whose `target` was patched in place);
/// sending it never re-encodes. `Fresh` is encoded by the writer pump.
#[derive(Debug)]
pub enum Outbound {
    Fresh(Message),
    Forward(Vec<u8>),
}

impl Outbound {
    fn is_done(&self) -> bool {
        matches!(self, Outbound::Fresh(Message::Done))
    }
}

/// A decoded inbound message paired with its original encoded bytes, so the
/// routing task can forward a request by patching those bytes in place
/// rather than re-encoding the whole record.
#[derive(Debug)]
pub struct Inbound {
    pub client_id: u64,
    pub message: Message,
    pub encoded: Vec<u8>,
}

/// A single client connection, from accept through the commit phase.
pub struct ClientSession {
    pub client_id: u64,
    pub system_info: Option<SystemInfo>,
    stream: UnixStream,
}

impl ClientSession {
    pub fn new(client_id: u64, stream: UnixStream) -> Self {
        Self {
            client_id,
            system_info: None,
            stream,
        }
    }

    async fn read(&mut self) -> Result<Message> {
        wire::read_message(&mut self.stream).await
    }

    async fn write(&mut self, message: &Message) -> Result<()> {
        wire::write_message(&mut self.stream, message).await
    }

    /// Read the peer's `SYSTEM_INFO` and reply with the router's own.
    pub async fn shake_hands(&mut self) -> Result<()> {
        let msg = self
            .read()
            .await
            .with_context(|| format!("client {}: failed to read handshake message", self.client_id))?;

        let peer_info = match msg {
            Message::SystemInfo(info) => info,
            other => bail!(
                "client {}: expected SYSTEM_INFO during handshake, got {}",
                self.client_id,
                other.kind_name()
            ),
        };
        self.system_info = Some(peer_info);

        let hostname = hostname_best_effort();
        let reply = Message::SystemInfo(SystemInfo {
            name: "router".to_string(),
            system_name: router_system_tag(),
            hostname,
            pid: std::process::id() as u64,
        });
        self.write(&reply).await
    }

    /// Read one IP_INFO or the terminating COMMIT. Returns `None` on COMMIT.
    pub async fn receive_ip_info(&mut self) -> Result<Option<IpInfo>> {
        let msg = self
            .read()
            .await
            .with_context(|| format!("client {}: failed to read inventory message", self.client_id))?;

        match msg {
            Message::Commit => Ok(None),
            Message::IpInfo(mut ip) => {
                ip.client_id = self.client_id;
                Ok(Some(ip))
            }
            other => bail!(
                "client {}: expected IP_INFO or COMMIT, got {}",
                self.client_id,
                other.kind_name()
            ),
        }
    }

    pub async fn ack_ip_info(&mut self, id: u64) -> Result<()> {
        self.write(&Message::IpAck { ip_id: id }).await
    }

    pub async fn send_error(&mut self, message: impl Into<String>) -> Result<()> {
        self.write(&Message::Error { message: message.into() }).await
    }

    pub async fn ack(&mut self) -> Result<()> {
        self.write(&Message::Ack).await
    }

    /// Publication sub-protocol: ack the client's COMMIT, echo every
    /// client's SystemInfo, ack, echo every registered IP, ack.
    pub async fn commit(&mut self, all_clients: &[SystemInfo], all_ips: &[IpInfo]) -> Result<()> {
        self.ack().await?;

        for info in all_clients {
            self.write(&Message::SystemInfo(info.clone())).await?;
        }
        self.ack().await?;

        for ip in all_ips {
            self.write(&Message::IpInfo(ip.clone())).await?;
        }
        self.ack().await
    }

    /// Split the underlying stream and launch the reader/writer pumps.
    /// Consumes the session; returns their join handles.
    pub fn start(
        self,
        inbound_tx: mpsc::Sender<Inbound>,
        outbound_rx: mpsc::Receiver<Outbound>,
    ) -> (JoinHandle<Result<()>>, JoinHandle<Result<()>>) {
        let (read_half, write_half) = self.stream.into_split();
        let client_id = self.client_id;
        let peer_name = self
            .system_info
            .map(|info| info.name)
            .unwrap_or_else(|| "unknown".to_string());

        let reader = tokio::spawn(reader_pump(client_id, peer_name.clone(), read_half, inbound_tx));
        let writer = tokio::spawn(writer_pump(client_id, peer_name, write_half, outbound_rx));
        (reader, writer)
    }
}

async fn reader_pump(
    client_id: u64,
    peer_name: String,
    mut read_half: OwnedReadHalf,
    inbound_tx: mpsc::Sender<Inbound>,
) -> Result<()> {
    loop {
        let mut len_bytes = [0u8; 8];
        read_half
            .read_exact(&mut len_bytes)
            .await
            .with_context(|| format!("client {} ({}): reader failed to read length prefix", client_id, peer_name))?;
        let len = u64::from_le_bytes(len_bytes);
        if len > wire::MAX_PAYLOAD_BYTES {
            bail!(
                "client {} ({}): message length {} exceeds maximum {}",
                client_id,
                peer_name,
                len,
                wire::MAX_PAYLOAD_BYTES
            );
        }

        let mut encoded = vec![0u8; len as usize];
        read_half
            .read_exact(&mut encoded)
            .await
            .with_context(|| format!("client {} ({}): reader failed to read payload", client_id, peer_name))?;

        let message = Message::decode(&encoded)
            .with_context(|| format!("client {} ({}): reader failed to decode payload", client_id, peer_name))?;

        debug!(client_id, peer = %peer_name, kind = message.kind_name(), "received message");

        let is_done = matches!(message, Message::Done);
        if inbound_tx
            .send(Inbound { client_id, message, encoded })
            .await
            .is_err()
        {
            debug!(client_id, peer = %peer_name, "routing task gone, reader stopping");
            return Ok(());
        }
        if is_done {
            return Ok(());
        }
    }
}

async fn writer_pump(
    client_id: u64,
    peer_name: String,
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) -> Result<()> {
    while let Some(item) = outbound_rx.recv().await {
        let is_done = item.is_done();
        match &item {
            Outbound::Fresh(message) => {
                debug!(client_id, peer = %peer_name, kind = message.kind_name(), "sending message");
                wire::write_message(&mut write_half, message).await?;
            }
            Outbound::Forward(encoded) => {
                debug!(client_id, peer = %peer_name, "forwarding message");
                wire::write_encoded(&mut write_half, encoded).await?;
            }
        }
        if is_done {
            return Ok(());
        }
    }
    warn!(client_id, peer = %peer_name, "outbound queue closed before DONE was sent");
    Ok(())
}

fn hostname_best_effort() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown".to_string())
}

fn router_system_tag() -> String {
    format!("{} Rust", capitalize(std::env::consts::OS))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
