//! End-to-end tests driving the router over real Unix domain sockets,
//! exercising the wire protocol the way an actual client process would.

use std::path::Path;
use std::time::Duration;

use sw_axi_router::cli::RouterConfig;
use sw_axi_router::wire::{self, IpImplementation, IpInfo, IpType, Message, SystemInfo, Transaction, TransactionKind};
use sw_axi_router::Router;
use tempfile::tempdir;
use tokio::net::UnixStream;

async fn handshake(path: &Path, name: &str) -> UnixStream {
    let mut stream = UnixStream::connect(path).await.expect("connect to router socket");
    wire::write_message(
        &mut stream,
        &Message::SystemInfo(SystemInfo {
            name: name.to_string(),
            system_name: "Linux Rust".to_string(),
            hostname: "test-host".to_string(),
            pid: std::process::id() as u64,
        }),
    )
    .await
    .unwrap();
    assert!(matches!(
        wire::read_message(&mut stream).await.unwrap(),
        Message::SystemInfo(_)
    ));
    stream
}

async fn register(stream: &mut UnixStream, ip: IpInfo) -> Message {
    wire::write_message(stream, &Message::IpInfo(ip)).await.unwrap();
    wire::read_message(stream).await.unwrap()
}

/// Drive the commit sub-protocol to completion by counting the three ACKs
/// it promises (handshake, system-info list, ip-info list).
async fn commit(stream: &mut UnixStream) {
    wire::write_message(stream, &Message::Commit).await.unwrap();
    let mut acks = 0;
    while acks < 3 {
        match wire::read_message(stream).await.unwrap() {
            Message::Ack => acks += 1,
            Message::SystemInfo(_) | Message::IpInfo(_) => {}
            other => panic!("unexpected message during commit: {:?}", other),
        }
    }
}

fn ip(name: &str, address: u64, size: u64, ip_type: IpType, client_id: u64) -> IpInfo {
    IpInfo {
        name: name.to_string(),
        address,
        size,
        first_interrupt: 0,
        num_interrupts: 0,
        ip_type,
        implementation: IpImplementation::Software,
        id: 0,
        client_id,
    }
}

#[tokio::test]
async fn test_overlap_is_rejected_but_inventory_continues() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("router.sock");
    let router = Router::new(RouterConfig {
        socket_path: socket_path.clone(),
        expected_clients: 2,
    });
    let router_task = tokio::spawn(router.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut a = handshake(&socket_path, "client-a").await;
    let mut b = handshake(&socket_path, "client-b").await;

    let first = register(&mut a, ip("a0", 0x1000, 0x100, IpType::Master, 0)).await;
    assert!(matches!(first, Message::IpAck { ip_id: 0 }));

    let overlap = register(&mut a, ip("a1", 0x1080, 0x100, IpType::Slave, 0)).await;
    assert!(matches!(overlap, Message::Error { .. }), "overlapping range must be rejected");

    let second = register(&mut a, ip("a2", 0x3000, 0x100, IpType::Slave, 0)).await;
    assert!(matches!(second, Message::IpAck { .. }), "registry must stay usable after a rejection");

    commit(&mut a).await;

    register(&mut b, ip("b0", 0x2000, 0x100, IpType::Slave, 1)).await;
    commit(&mut b).await;

    wire::write_message(&mut a, &Message::Terminate { ip_id: 0 }).await.unwrap();
    assert!(matches!(wire::read_message(&mut a).await.unwrap(), Message::Done));
    assert!(matches!(wire::read_message(&mut b).await.unwrap(), Message::Done));

    // Close both ends so the reader pumps see EOF instead of blocking forever.
    drop(a);
    drop(b);
    router_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unmapped_address_synthesises_error_response() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("router.sock");
    let router = Router::new(RouterConfig {
        socket_path: socket_path.clone(),
        expected_clients: 2,
    });
    let router_task = tokio::spawn(router.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut master = handshake(&socket_path, "client-master").await;
    let mut slave = handshake(&socket_path, "client-slave").await;

    let master_id = match register(&mut master, ip("m0", 0, 0x100, IpType::Master, 0)).await {
        Message::IpAck { ip_id } => ip_id,
        other => panic!("expected IP_ACK, got {:?}", other),
    };
    register(&mut slave, ip("s0", 0x1000, 0x100, IpType::Slave, 1)).await;

    commit(&mut master).await;
    commit(&mut slave).await;

    let request = Transaction {
        kind: TransactionKind::ReadReq,
        initiator: 0,
        target: 0,
        id: 1,
        address: 0xDEAD_0000,
        size: 4,
        ok: true,
        message: String::new(),
        data: Vec::new(),
    };
    wire::write_message(&mut master, &Message::Transaction(request)).await.unwrap();

    let reply = wire::read_message(&mut master).await.unwrap();
    match reply {
        Message::Transaction(t) => {
            assert!(!t.ok, "unmapped address must come back as a failed transaction");
            assert!(!t.message.is_empty());
        }
        other => panic!("expected TRANSACTION reply, got {:?}", other),
    }

    wire::write_message(&mut master, &Message::Terminate { ip_id: master_id }).await.unwrap();
    assert!(matches!(wire::read_message(&mut master).await.unwrap(), Message::Done));
    assert!(matches!(wire::read_message(&mut slave).await.unwrap(), Message::Done));

    // Close both ends so the reader pumps see EOF instead of blocking forever.
    drop(master);
    drop(slave);
    router_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_boundary_crossing_transaction_is_rejected() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("router.sock");
    let router = Router::new(RouterConfig {
        socket_path: socket_path.clone(),
        expected_clients: 2,
    });
    let router_task = tokio::spawn(router.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut master = handshake(&socket_path, "client-master").await;
    let mut slave = handshake(&socket_path, "client-slave").await;

    let master_id = match register(&mut master, ip("m0", 0, 0x100, IpType::Master, 0)).await {
        Message::IpAck { ip_id } => ip_id,
        other => panic!("expected IP_ACK, got {:?}", other),
    };
    register(&mut slave, ip("b0", 0x2000, 0x100, IpType::Slave, 1)).await;

    commit(&mut master).await;
    commit(&mut slave).await;

    // [0x20F8, 0x2108) runs 8 bytes past the block's end at 0x2100.
    let request = Transaction {
        kind: TransactionKind::ReadReq,
        initiator: 0,
        target: 0,
        id: 2,
        address: 0x20F8,
        size: 16,
        ok: true,
        message: String::new(),
        data: Vec::new(),
    };
    wire::write_message(&mut master, &Message::Transaction(request)).await.unwrap();

    let reply = wire::read_message(&mut master).await.unwrap();
    match reply {
        Message::Transaction(t) => assert!(!t.ok, "boundary-crossing transaction must fail"),
        other => panic!("expected TRANSACTION reply, got {:?}", other),
    }

    wire::write_message(&mut master, &Message::Terminate { ip_id: master_id }).await.unwrap();
    assert!(matches!(wire::read_message(&mut master).await.unwrap(), Message::Done));
    assert!(matches!(wire::read_message(&mut slave).await.unwrap(), Message::Done));

    // Close both ends so the reader pumps see EOF instead of blocking forever.
    drop(master);
    drop(slave);
    router_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_every_master_to_terminate() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("router.sock");
    let router = Router::new(RouterConfig {
        socket_path: socket_path.clone(),
        expected_clients: 2,
    });
    let router_task = tokio::spawn(router.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut a = handshake(&socket_path, "client-a").await;
    let mut b = handshake(&socket_path, "client-b").await;

    let a_id = match register(&mut a, ip("a0", 0, 0x100, IpType::Master, 0)).await {
        Message::IpAck { ip_id } => ip_id,
        other => panic!("expected IP_ACK, got {:?}", other),
    };
    let b_id = match register(&mut b, ip("b0", 0x1000, 0x100, IpType::MasterLite, 1)).await {
        Message::IpAck { ip_id } => ip_id,
        other => panic!("expected IP_ACK, got {:?}", other),
    };

    commit(&mut a).await;
    commit(&mut b).await;

    wire::write_message(&mut a, &Message::Terminate { ip_id: a_id }).await.unwrap();

    // The router must not shut down yet: b is still an active master.
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        msg = wire::read_message(&mut a) => panic!("router shut down early: {:?}", msg),
    }

    wire::write_message(&mut b, &Message::Terminate { ip_id: b_id }).await.unwrap();

    assert!(matches!(wire::read_message(&mut a).await.unwrap(), Message::Done));
    assert!(matches!(wire::read_message(&mut b).await.unwrap(), Message::Done));

    // Close both ends so the reader pumps see EOF instead of blocking forever.
    drop(a);
    drop(b);
    router_task.await.unwrap().unwrap();
}
