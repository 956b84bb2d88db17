//! Full socket-based integration tests for server -> client state sync.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use physync_client::SyncClient;
use physync_server::{server::ephemeral_config, SyncServer};
use physync_shared::{
    adapter::SimulationAdapter,
    config::SyncConfig,
    lifecycle::Lifecycle,
    math::Vec2,
    net::{decode_frame, FRAME_LEN},
    physics::{KinematicWorld, PhysicsBackend},
    snapshot::{BodySnapshot, SnapshotSet, SnapshotStore},
};
use physync_tests::{eventually, init_tracing, marked_set, ManualServer};
use tokio::{io::AsyncReadExt, net::TcpStream};

async fn read_frame(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0u8; FRAME_LEN];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf)).await??;
    Ok(buf)
}

/// Two live connections after one tick hold the same 30 x 24 byte frame.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_tick_reaches_both_clients_identically() -> anyhow::Result<()> {
    init_tracing();
    let mut server = ManualServer::start(Arc::new(SnapshotStore::with_set(SnapshotSet::AT_REST))).await?;

    let mut a = TcpStream::connect(server.addr).await?;
    let mut b = TcpStream::connect(server.addr).await?;
    assert!(server.wait_for_clients(2).await);

    let report = server.scheduler.tick().await;
    assert_eq!(report.delivered.len(), 2);

    let fa = read_frame(&mut a).await?;
    let fb = read_frame(&mut b).await?;
    assert_eq!(fa.len(), 30 * 24);
    assert_eq!(fa, fb);
    assert_eq!(decode_frame(&fa)?, SnapshotSet::AT_REST);

    server.stop().await?;
    Ok(())
}

/// A client that goes away is dropped; the others keep receiving.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_client_is_dropped_without_affecting_others() -> anyhow::Result<()> {
    init_tracing();
    let mut server = ManualServer::start(Arc::new(SnapshotStore::with_set(marked_set(1.0)))).await?;

    let mut one = TcpStream::connect(server.addr).await?;
    assert!(server.wait_for_clients(1).await);
    let two = TcpStream::connect(server.addr).await?;
    assert!(server.wait_for_clients(2).await);
    let mut three = TcpStream::connect(server.addr).await?;
    assert!(server.wait_for_clients(3).await);
    let ids = server.registry.ids();

    drop(two);

    // The first write after the peer closes may still be accepted locally;
    // the reset shows up on a later one.
    let mut ticks = 0;
    while server.registry.contains(ids[1]) && ticks < 50 {
        server.scheduler.tick().await;
        ticks += 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.registry.ids(), vec![ids[0], ids[2]]);

    for _ in 0..ticks {
        assert_eq!(decode_frame(&read_frame(&mut one).await?)?, marked_set(1.0));
        assert_eq!(decode_frame(&read_frame(&mut three).await?)?, marked_set(1.0));
    }

    server.stop().await?;
    Ok(())
}

/// A client that connects after five ticks sees tick six first.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_client_gets_no_backlog() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(SnapshotStore::new());
    let mut server = ManualServer::start(Arc::clone(&store)).await?;

    let mut early = TcpStream::connect(server.addr).await?;
    assert!(server.wait_for_clients(1).await);
    for tick in 1..=5 {
        store.write_all(&marked_set(tick as f32));
        server.scheduler.tick().await;
    }

    let mut late = TcpStream::connect(server.addr).await?;
    assert!(server.wait_for_clients(2).await);
    for tick in 6..=7 {
        store.write_all(&marked_set(tick as f32));
        server.scheduler.tick().await;
    }

    for tick in 1..=7 {
        assert_eq!(decode_frame(&read_frame(&mut early).await?)?, marked_set(tick as f32));
    }
    assert_eq!(decode_frame(&read_frame(&mut late).await?)?, marked_set(6.0));
    assert_eq!(decode_frame(&read_frame(&mut late).await?)?, marked_set(7.0));

    server.stop().await?;
    Ok(())
}

/// Full pipeline: server world -> store -> broadcast -> client receiver -> client world.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_world_mirrors_server_world() -> anyhow::Result<()> {
    init_tracing();

    let server_store = Arc::new(SnapshotStore::new());
    let mut server_world = KinematicWorld::default();
    server_world.apply_state(
        0,
        BodySnapshot {
            position: Vec2::new(1.5, -2.0),
            orientation: 0.3,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
        },
    );
    let _ = SimulationAdapter::new(Arc::clone(&server_store)).capture(&server_world)?;

    let server_lc = Lifecycle::new();
    let server = SyncServer::new(ephemeral_config(10), server_store, server_lc.clone());
    let (addr, tasks) = server.start_bound().await?;

    let client_lc = Lifecycle::new();
    let client_world = Arc::new(Mutex::new(KinematicWorld::default()));
    let client = SyncClient::new(
        SyncConfig {
            server_addr: addr.to_string(),
            ..Default::default()
        },
        Arc::new(SnapshotStore::new()),
        client_lc.clone(),
    );
    let network = client.start(Arc::clone(&client_world));

    let expected = server_world.current_state(0);
    assert!(
        eventually(Duration::from_secs(3), || {
            client_world.lock().unwrap().current_state(0) == expected
        })
        .await,
        "client world never received the server state"
    );
    let body = client_world.lock().unwrap().current_state(0);
    assert_eq!(body.position, Vec2::new(1.5, -2.0));
    assert_eq!(body.orientation, 0.3);
    assert!(client.store().is_initialized());

    client_lc.signal_stop();
    let stats = tokio::time::timeout(Duration::from_secs(2), network).await???;
    assert!(stats.applied >= 1);

    server_lc.signal_stop();
    let exit = tokio::time::timeout(Duration::from_secs(2), tasks.join()).await?;
    assert_eq!(exit.network?, 1);
    assert!(exit.broadcast? >= 1);
    Ok(())
}

/// Nothing listening: the client network task ends with a connect error.
#[tokio::test]
async fn client_reports_connect_failure() -> anyhow::Result<()> {
    let unused = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        l.local_addr()?
    };
    let client = SyncClient::new(
        SyncConfig {
            server_addr: unused.to_string(),
            ..Default::default()
        },
        Arc::new(SnapshotStore::new()),
        Lifecycle::new(),
    );
    let world = Arc::new(Mutex::new(KinematicWorld::default()));

    let err = tokio::time::timeout(Duration::from_secs(2), client.start(world))
        .await??
        .expect_err("connect must fail");
    assert!(format!("{err:#}").contains("tcp connect"), "{err:#}");
    Ok(())
}

/// An unresolvable address is reported as a resolve failure.
#[tokio::test]
async fn server_reports_resolve_failure() -> anyhow::Result<()> {
    let lc = Lifecycle::new();
    let server = SyncServer::new(
        SyncConfig {
            server_addr: "not a host name".to_string(),
            broadcast_interval_ms: 10,
            ..Default::default()
        },
        Arc::new(SnapshotStore::new()),
        lc.clone(),
    );
    let tasks = server.start();
    lc.signal_stop();
    let exit = tasks.join().await;
    let err = exit.network.expect_err("resolution must fail");
    assert!(format!("{err:#}").contains("resolve"), "{err:#}");
    Ok(())
}
