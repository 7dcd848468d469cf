//! # Wire Codec
//!
//! Length-prefixed framing and schema-driven encode/decode for the router's
//! message protocol. Every message crossing a client socket is an 8-byte
//! little-endian length followed by exactly that many payload bytes; the
//! payload is a [`Message`] encoded with `bincode`'s default (fixed-width,
//! non-varint) configuration.
//!
//! ## In-place target patching
//!
//! [`Transaction`] lists its fixed-width fields (`kind`, `initiator`,
//! `target`, `id`, `address`, `size`, `ok`) before its variable-length ones
//! (`message`, `data`). Bincode's default config encodes enum discriminants
//! as a 4-byte `u32` and integers at fixed width, so the byte offset of
//! `target` inside an encoded `TRANSACTION` payload never depends on the
//! payload's content. [`patch_target`] exploits this to overwrite `target`
//! in place instead of decoding, mutating, and re-encoding the whole record.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum payload size accepted by the framing layer. Guards against a
/// corrupt or hostile length prefix causing an unbounded allocation.
pub const MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024;

/// Byte offset of the `target` field within an encoded `TRANSACTION` message.
///
/// `4` bytes for the `Message` enum discriminant, `4` for the `Transaction`
/// `kind` discriminant, `8` for `initiator` — `target` starts right after.
/// `test_target_offset_is_stable` pins this down against the real codec.
const TRANSACTION_TARGET_OFFSET: usize = 4 + 4 + 8;

/// Bus-initiator / bus-responder role and bit width of a registered IP block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpType {
    Slave,
    SlaveLite,
    SlaveStream,
    Master,
    MasterLite,
    MasterStream,
}

impl IpType {
    /// Whether this variant counts toward the master population that keeps
    /// the router's routing phase alive.
    pub fn is_master(self) -> bool {
        matches!(self, IpType::Master | IpType::MasterLite | IpType::MasterStream)
    }
}

/// Whether an IP block is realized in software or hardware. Opaque to the
/// router; carried through for the benefit of clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpImplementation {
    Software,
    Hardware,
}

/// Peer identity exchanged during the handshake. Immutable afterward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub name: String,
    pub system_name: String,
    pub hostname: String,
    pub pid: u64,
}

/// A registered endpoint at a disjoint range of the shared address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpInfo {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub first_interrupt: u16,
    pub num_interrupts: u16,
    pub ip_type: IpType,
    pub implementation: IpImplementation,
    /// Assigned by the router on successful registration. `0` until then.
    pub id: u64,
    /// Index of the owning client in connection order.
    pub client_id: u64,
}

impl IpInfo {
    /// Half-open address range `[address, address + size)`.
    pub fn range(&self) -> (u64, u64) {
        (self.address, self.address + self.size)
    }
}

/// Kind of a bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    ReadReq,
    WriteReq,
    ReadResp,
    WriteResp,
}

impl TransactionKind {
    /// The response kind a request of this kind eventually produces.
    pub fn response_kind(self) -> TransactionKind {
        match self {
            TransactionKind::ReadReq => TransactionKind::ReadResp,
            TransactionKind::WriteReq => TransactionKind::WriteResp,
            other => other,
        }
    }

    pub fn is_request(self) -> bool {
        matches!(self, TransactionKind::ReadReq | TransactionKind::WriteReq)
    }

    pub fn is_response(self) -> bool {
        matches!(self, TransactionKind::ReadResp | TransactionKind::WriteResp)
    }
}

/// A bus-level read or write request and its eventual response.
///
/// Field order matters: every fixed-width field must precede `message` and
/// `data` for [`patch_target`] to remain correct. See the module doc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub initiator: u64,
    pub target: u64,
    pub id: u64,
    pub address: u64,
    pub size: u64,
    pub ok: bool,
    pub message: String,
    pub data: Vec<u8>,
}

/// The router's wire message. Variant order is part of the schema and must
/// not be reshuffled once clients are deployed against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    SystemInfo(SystemInfo),
    IpInfo(IpInfo),
    IpAck { ip_id: u64 },
    Commit,
    Ack,
    Error { message: String },
    Transaction(Transaction),
    Terminate { ip_id: u64 },
    Done,
}

impl Message {
    /// Human-readable discriminant name, used in logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::SystemInfo(_) => "SYSTEM_INFO",
            Message::IpInfo(_) => "IP_INFO",
            Message::IpAck { .. } => "IP_ACK",
            Message::Commit => "COMMIT",
            Message::Ack => "ACK",
            Message::Error { .. } => "ERROR",
            Message::Transaction(_) => "TRANSACTION",
            Message::Terminate { .. } => "TERMINATE",
            Message::Done => "DONE",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("failed to encode message")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("failed to decode message")
    }
}

/// Overwrite the `target` field of an encoded `TRANSACTION` message in place.
///
/// `encoded` must be the byte-for-byte result of encoding a
/// `Message::Transaction(..)`; calling this on any other message is a logic
/// error in the caller, not a recoverable condition.
pub fn patch_target(encoded: &mut [u8], new_target: u64) -> Result<()> {
    let end = TRANSACTION_TARGET_OFFSET + 8;
    if encoded.len() < end {
        bail!("encoded transaction too short to patch target");
    }
    encoded[TRANSACTION_TARGET_OFFSET..end].copy_from_slice(&new_target.to_le_bytes());
    Ok(())
}

/// Read one length-prefixed message from `stream`.
pub async fn read_message<R>(stream: &mut R) -> Result<Message>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_bytes = [0u8; 8];
    stream
        .read_exact(&mut len_bytes)
        .await
        .context("failed to read message length prefix")?;
    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_PAYLOAD_BYTES {
        return Err(anyhow!("message length {} exceeds maximum {}", len, MAX_PAYLOAD_BYTES));
    }

    let mut payload = vec![0u8; len as usize];
    stream
        .read_exact(&mut payload)
        .await
        .context("failed to read message payload")?;

    Message::decode(&payload)
}

/// Write one length-prefixed message to `stream`.
pub async fn write_message<W>(stream: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let payload = message.encode()?;
    write_encoded(stream, &payload).await
}

/// Write an already-encoded payload (used by the router to forward a
/// patched transaction without re-encoding it).
pub async fn write_encoded<W>(stream: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let len = payload.len() as u64;
    stream
        .write_all(&len.to_le_bytes())
        .await
        .context("failed to write message length prefix")?;
    stream
        .write_all(payload)
        .await
        .context("failed to write message payload")?;
    stream.flush().await.context("failed to flush stream")?;
    Ok(())
}
