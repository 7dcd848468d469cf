//! # Router Core
//!
//! Drives a single run of the router through its five phases: listen,
//! handshake, inventory, commit, and routing. See the crate's design
//! document for the full phase-by-phase contract; this module is the
//! orchestration of it.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::RouterConfig;
use crate::error::RouterError;
use crate::registry::AddressRegistry;
use crate::session::{ClientSession, Inbound, Outbound};
use crate::wire::{self, Message, SystemInfo, TransactionKind};

/// Outbound-queue depth per client. Generous: the router never needs to
/// apply backpressure to keep memory bounded at this scale.
const OUTBOUND_CAPACITY: usize = 256;
/// Depth of the single channel every reader pump feeds into.
const INBOUND_CAPACITY: usize = 1024;

pub struct Router {
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Run the router to completion: bind, wait for all clients, exchange
    /// inventories, publish the committed system, and route transactions
    /// until every master has terminated.
    pub async fn run(self) -> Result<()> {
        let listener = self.listen().await?;
        let mut sessions = self.accept_all(listener).await?;

        for session in sessions.iter_mut() {
            session
                .shake_hands()
                .await
                .with_context(|| format!("client {}: handshake failed", session.client_id))?;
        }
        info!(clients = sessions.len(), "handshake phase complete");

        let mut registry = AddressRegistry::new();
        for session in sessions.iter_mut() {
            loop {
                match session.receive_ip_info().await? {
                    None => break,
                    Some(ip) => match registry.register(ip) {
                        Ok(id) => session.ack_ip_info(id).await?,
                        Err(err) => {
                            warn!(client_id = session.client_id, error = %err, "rejecting IP registration");
                            session.send_error(err.to_string()).await?;
                        }
                    },
                }
            }
        }
        info!(
            ips = registry.ip_count(),
            masters = registry.master_count(),
            "inventory phase complete"
        );

        let client_infos: Vec<SystemInfo> = sessions
            .iter()
            .map(|s| s.system_info.clone().expect("handshake populates system_info"))
            .collect();
        let all_ips = registry.all().to_vec();
        for session in sessions.iter_mut() {
            session
                .commit(&client_infos, &all_ips)
                .await
                .with_context(|| format!("client {}: commit failed", session.client_id))?;
        }
        info!("commit phase complete, entering routing phase");

        self.route(sessions, registry).await
    }

    async fn listen(&self) -> Result<UnixListener> {
        let path = &self.config.socket_path;
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove stale socket at {}", path.display()))?;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(RouterError::Transport(format!(
                    "socket directory {} does not exist",
                    parent.display()
                ))
                .into());
            }
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind unix socket at {}", path.display()))?;
        info!(path = %path.display(), "listening for clients");
        Ok(listener)
    }

    async fn accept_all(&self, listener: UnixListener) -> Result<Vec<ClientSession>> {
        let mut sessions = Vec::with_capacity(self.config.expected_clients as usize);
        for client_id in 0..self.config.expected_clients {
            let (stream, _addr) = listener
                .accept()
                .await
                .with_context(|| format!("failed to accept connection for client {}", client_id))?;
            info!(client_id, "client connected");
            sessions.push(ClientSession::new(client_id, stream));
        }
        Ok(sessions)
    }

    /// Phase 4: spawn 2N pump tasks plus one routing task, and drive the bus
    /// until the master population reaches zero.
    async fn route(&self, sessions: Vec<ClientSession>, mut registry: AddressRegistry) -> Result<()> {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Inbound>(INBOUND_CAPACITY);
        let mut outbound_txs = Vec::with_capacity(sessions.len());
        let mut pump_handles = Vec::with_capacity(sessions.len() * 2);

        for session in sessions {
            let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
            outbound_txs.push(outbound_tx);
            let (reader, writer) = session.start(inbound_tx.clone(), outbound_rx);
            pump_handles.push(reader);
            pump_handles.push(writer);
        }
        // Drop our own handle so the channel closes once every reader exits.
        drop(inbound_tx);

        if registry.master_count() == 0 {
            info!("no masters registered, shutting down immediately");
            broadcast_done(&outbound_txs).await;
        } else {
            while let Some(inbound) = inbound_rx.recv().await {
                let client_id = inbound.client_id;
                let encoded = inbound.encoded;
                match inbound.message {
                    Message::Terminate { ip_id } => {
                        let remaining = registry.on_terminate(ip_id);
                        info!(ip_id, remaining_masters = remaining, "master terminated");
                        if remaining == 0 {
                            broadcast_done(&outbound_txs).await;
                            break;
                        }
                    }
                    Message::Transaction(txn) if txn.kind.is_request() => {
                        self.dispatch_request(&registry, &txn, encoded, &outbound_txs).await?;
                    }
                    Message::Transaction(txn) if txn.kind.is_response() => {
                        self.dispatch_response(&registry, txn.initiator, encoded, &outbound_txs).await?;
                    }
                    other => {
                        bail!(
                            "client {}: unexpected message {} during routing phase",
                            client_id,
                            other.kind_name()
                        );
                    }
                }
            }
        }

        for handle in pump_handles {
            if let Err(err) = handle.await.context("pump task panicked")? {
                warn!(error = %err, "pump task exited with error");
            }
        }
        info!("routing phase complete, shutting down");
        Ok(())
    }

    /// `initiator` and `target` on the wire are IP ids, not client ids; every
    /// dispatch here resolves an IP id to its owning client before touching
    /// an outbound queue.
    async fn dispatch_request(
        &self,
        registry: &AddressRegistry,
        txn: &wire::Transaction,
        mut encoded: Vec<u8>,
        outbound_txs: &[mpsc::Sender<Outbound>],
    ) -> Result<()> {
        match registry.find_target(txn.address, txn.size) {
            Ok(target) => {
                wire::patch_target(&mut encoded, target.ip_id)?;
                send_to(outbound_txs, target.client_id, Outbound::Forward(encoded)).await
            }
            Err(err) => {
                warn!(error = %err, initiator = txn.initiator, "routing error, synthesising error response");
                let response = wire::Transaction {
                    kind: txn.kind.response_kind(),
                    initiator: txn.initiator,
                    target: txn.target,
                    id: txn.id,
                    address: txn.address,
                    size: txn.size,
                    ok: false,
                    message: err.to_string(),
                    data: Vec::new(),
                };
                self.send_to_ip_owner(registry, txn.initiator, Outbound::Fresh(Message::Transaction(response)), outbound_txs)
                    .await
            }
        }
    }

    async fn dispatch_response(
        &self,
        registry: &AddressRegistry,
        initiator_ip_id: u64,
        encoded: Vec<u8>,
        outbound_txs: &[mpsc::Sender<Outbound>],
    ) -> Result<()> {
        self.send_to_ip_owner(registry, initiator_ip_id, Outbound::Forward(encoded), outbound_txs)
            .await
    }

    async fn send_to_ip_owner(
        &self,
        registry: &AddressRegistry,
        ip_id: u64,
        item: Outbound,
        outbound_txs: &[mpsc::Sender<Outbound>],
    ) -> Result<()> {
        let owner = registry
            .get(ip_id)
            .ok_or_else(|| RouterError::Routing(format!("no such IP id {}", ip_id)))?;
        send_to(outbound_txs, owner.client_id, item).await
    }
}

async fn send_to(outbound_txs: &[mpsc::Sender<Outbound>], client_id: u64, item: Outbound) -> Result<()> {
    let tx = outbound_txs
        .get(client_id as usize)
        .ok_or_else(|| RouterError::Routing(format!("no such client id {}", client_id)))?;
    if tx.send(item).await.is_err() {
        warn!(client_id, "outbound channel closed, dropping message");
    }
    Ok(())
}

async fn broadcast_done(outbound_txs: &[mpsc::Sender<Outbound>]) {
    for tx in outbound_txs {
        let _ = tx.send(Outbound::Fresh(Message::Done)).await;
    }
}
