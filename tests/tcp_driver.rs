//! TCP driver against local listeners

mod common;

use common::settings;
use std::sync::Arc;
use std::time::Duration;
use store_lifecycle::config::validate;
use store_lifecycle::driver::TlsConfig;
use store_lifecycle::{
    AuditEventKind, ConnectOptions, ConnectionManager, DriverEvent, ErrorKind, MemoryAuditSink,
    PoolOptions, ReadyState, StoreDriver, StoreUri, TcpStoreDriver, Tier,
};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

/// Listener that accepts and holds every connection
async fn listener() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    port
}

/// Port with nothing listening on it
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Listener that hangs up on every connection without a TLS handshake
async fn plaintext_hangup() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    port
}

fn pool() -> PoolOptions {
    PoolOptions::for_tier(Tier::Development)
        .min_pool_size(2)
        .connect_timeout(Duration::from_millis(500))
        .server_selection_timeout(Duration::from_secs(1))
        .socket_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn test_open_ping_close() {
    let port = listener().await;
    let uri = StoreUri::parse(&format!("mongodb://127.0.0.1:{}/rostering", port)).unwrap();
    let driver = TcpStoreDriver::new();
    let mut events = driver.subscribe();

    assert_ok!(driver.open(&uri, &pool()).await);
    assert_eq!(driver.ready_state(), ReadyState::Connected);
    assert_eq!(driver.pooled().await, 2);
    assert_eq!(events.recv().await.unwrap(), DriverEvent::Connected);

    assert_ok!(driver.ping().await);

    assert_ok!(driver.close().await);
    assert_eq!(driver.ready_state(), ReadyState::Disconnected);
    assert_eq!(driver.pooled().await, 0);
    assert_eq!(events.recv().await.unwrap(), DriverEvent::Closed);
}

#[tokio::test]
async fn test_second_open_reports_reconnect() {
    let port = listener().await;
    let uri = StoreUri::parse(&format!("mongodb://127.0.0.1:{}/rostering", port)).unwrap();
    let driver = TcpStoreDriver::new();

    assert_ok!(driver.open(&uri, &pool()).await);
    let mut events = driver.subscribe();
    assert_ok!(driver.open(&uri, &pool()).await);
    assert_eq!(events.recv().await.unwrap(), DriverEvent::Reconnected);
    assert_eq!(driver.pooled().await, 2);
}

#[tokio::test]
async fn test_falls_through_to_next_host() {
    let dead = closed_port().await;
    let live = listener().await;
    let uri = StoreUri::parse(&format!(
        "mongodb://127.0.0.1:{},127.0.0.1:{}/rostering",
        dead, live
    ))
    .unwrap();

    let driver = TcpStoreDriver::new();
    assert_ok!(driver.open(&uri, &pool()).await);
    assert!(driver.ready_state().is_connected());
}

#[tokio::test]
async fn test_refused_connection() {
    let port = closed_port().await;
    let uri = StoreUri::parse(&format!("mongodb://127.0.0.1:{}/rostering", port)).unwrap();
    let driver = TcpStoreDriver::new();

    let err = assert_err!(driver.open(&uri, &pool()).await);
    assert!(err.message().to_lowercase().contains("refused"), "{}", err);
    assert_eq!(driver.ready_state(), ReadyState::Disconnected);
}

#[tokio::test]
async fn test_ping_reports_lost_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let uri = StoreUri::parse(&format!("mongodb://127.0.0.1:{}/rostering", port)).unwrap();
    let driver = TcpStoreDriver::new();
    assert_ok!(driver.open(&uri, &pool().min_pool_size(1)).await);

    let mut events = driver.subscribe();
    drop(listener);

    assert_err!(driver.ping().await);
    assert_eq!(driver.ready_state(), ReadyState::Disconnected);
    assert_eq!(events.recv().await.unwrap(), DriverEvent::Disconnected);
}

#[tokio::test]
async fn test_manager_over_tcp() {
    let port = listener().await;
    let uri = format!("mongodb://scheduler:pw@127.0.0.1:{}/rostering", port);
    let config = validate(&settings(&[
        ("STORE_URI", uri.as_str()),
        ("AUDIT_LOGGING_ENABLED", "true"),
    ]))
    .unwrap();

    let sink = MemoryAuditSink::new();
    let manager = ConnectionManager::builder(config, Arc::new(TcpStoreDriver::new()))
        .audit_sink(Arc::new(sink.clone()))
        .pool_options(pool())
        .build()
        .unwrap();

    let handle = assert_ok!(manager.connect(&ConnectOptions::for_tier(Tier::Test)).await);
    assert_eq!(handle.ready_state(), ReadyState::Connected);

    let report = manager.check_health().await;
    assert!(report.healthy, "{:?}", report);

    let outcome = manager.shutdown("SIGTERM").await;
    assert_eq!(outcome.exit_code(), Some(0));

    let kinds = sink.kinds();
    assert_eq!(kinds.first(), Some(&AuditEventKind::ConnectionEstablished));
    assert_eq!(kinds.last(), Some(&AuditEventKind::GracefulShutdownCompleted));
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == AuditEventKind::ConnectionEstablished)
            .count(),
        1
    );
    assert!(sink.events().iter().all(|e| !e.details.contains(":pw@")));
}

#[tokio::test]
async fn test_manager_over_tcp_refused() {
    let port = closed_port().await;
    let uri = format!("mongodb://127.0.0.1:{}/rostering", port);
    let config = validate(&settings(&[("STORE_URI", uri.as_str())])).unwrap();
    let manager = ConnectionManager::builder(config, Arc::new(TcpStoreDriver::new()))
        .pool_options(pool())
        .build()
        .unwrap();

    let options = ConnectOptions::for_tier(Tier::Test).retry_delay(Duration::from_millis(5));
    let err = assert_err!(manager.connect(&options).await);
    assert_eq!(err.kind(), Some(ErrorKind::ConnectionRefused));
    assert_eq!(manager.state().connection_attempts, 2);
}

#[tokio::test]
async fn test_explicit_tls_config_overrides_uri() {
    let port = plaintext_hangup().await;
    let uri = StoreUri::parse(&format!(
        "mongodb://127.0.0.1:{}/rostering?tls=true&tlsCAFile=/nonexistent/ca.pem",
        port
    ))
    .unwrap();

    let from_uri = TcpStoreDriver::new();
    let err = assert_err!(from_uri.open(&uri, &pool().min_pool_size(1)).await);
    assert!(err.message().contains("CA certificate"), "{}", err);

    let tls_config = TlsConfig::builder().build().unwrap();
    let driver = TcpStoreDriver::new().with_tls(tls_config);
    let err = assert_err!(driver.open(&uri, &pool().min_pool_size(1)).await);
    assert!(!err.message().contains("CA certificate"), "{}", err);
    assert_eq!(driver.ready_state(), ReadyState::Disconnected);
    assert_eq!(driver.pooled().await, 0);
}
