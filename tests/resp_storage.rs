//! RespStorage against a small in-process RESP server backed by CounterEngine.

use bytes::{Buf, Bytes, BytesMut};
use ipcounter::protocol::{RespParser, RespValue};
use ipcounter::{CounterEngine, ErrorKind, Mode, RespStorage, Service, Storage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Server state shared by every connection.
#[derive(Default)]
struct Server {
    engine: CounterEngine,
    /// Pause between executing a command and writing its reply
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Server {
    /// Executes the handful of commands the client sends.
    fn execute(&self, command: RespValue) -> RespValue {
        let Some(args) = command.into_array() else {
            return RespValue::error("ERR invalid command format");
        };
        let Some(name) = args.first().and_then(|a| a.as_str()).map(str::to_uppercase) else {
            return RespValue::error("ERR empty command");
        };
        let key = |i: usize| -> Bytes {
            Bytes::copy_from_slice(args[i].as_str().unwrap_or_default().as_bytes())
        };

        match (name.as_str(), args.len()) {
            ("INCRBY", 3) => match args[2].as_integer() {
                Some(delta) => match self.engine.incr_by(&key(1), delta) {
                    Ok(n) => RespValue::integer(n),
                    Err(e) => RespValue::error(format!("ERR {}", e)),
                },
                None => RespValue::error("ERR value is not an integer or out of range"),
            },
            ("KEYS", 2) => {
                // Only trailing-star patterns are sent
                let pattern = args[1].as_str().unwrap_or_default();
                let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
                match self.engine.scan_prefix(prefix.as_bytes()) {
                    Ok(entries) => RespValue::array(
                        entries
                            .into_iter()
                            .map(|(key, _)| RespValue::bulk_string(key))
                            .collect(),
                    ),
                    Err(e) => RespValue::error(format!("ERR {}", e)),
                }
            }
            ("MGET", n) if n > 1 => RespValue::array(
                (1..n)
                    .map(|i| match self.engine.get(&key(i)) {
                        Some(v) => RespValue::bulk_string(v.to_string()),
                        None => RespValue::null(),
                    })
                    .collect(),
            ),
            _ => RespValue::error(format!("ERR unknown command '{}'", name)),
        }
    }

    async fn serve(self: Arc<Self>, mut stream: TcpStream) {
        let mut buffer = BytesMut::with_capacity(4096);
        let mut parser = RespParser::new();

        loop {
            while let Ok(Some((command, consumed))) = parser.parse(&buffer) {
                buffer.advance(consumed);

                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                let reply = self.execute(command);
                tokio::time::sleep(self.delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                if stream.write_all(&reply.serialize()).await.is_err() {
                    return;
                }
            }
            match stream.read_buf(&mut buffer).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }
}

async fn start_server() -> (SocketAddr, Arc<Server>) {
    start_server_with(Server::default()).await
}

async fn start_server_with(server: Server) -> (SocketAddr, Arc<Server>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(server);

    let shared = Arc::clone(&server);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(Arc::clone(&shared).serve(stream));
        }
    });

    (addr, server)
}

async fn connect(addr: SocketAddr) -> RespStorage {
    RespStorage::connect(&addr.ip().to_string(), addr.port())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_increment_and_list() {
    let (addr, server) = start_server().await;
    let storage = connect(addr).await;

    storage.increment("test", "ips", "192.168.1.1", 1).await.unwrap();
    storage.increment("test", "ips", "192.168.1.1", 1).await.unwrap();
    storage.increment("test", "ips", "10.0.0.7", 3).await.unwrap();
    storage.increment("test", "other", "10.0.0.7", 1).await.unwrap();

    let mut records = storage.list("test", "ips").await.unwrap();
    records.sort_by(|a, b| a.key.cmp(&b.key));

    assert_eq!(records.len(), 2);
    assert_eq!((records[0].key.as_str(), records[0].count), ("10.0.0.7", 3));
    assert_eq!((records[1].key.as_str(), records[1].count), ("192.168.1.1", 2));
    assert_eq!(server.engine.scan_prefix(b"test:").unwrap().len(), 3);

    storage.close().await;
}

#[tokio::test]
async fn test_list_empty_set() {
    let (addr, _) = start_server().await;
    let storage = connect(addr).await;

    assert!(storage.list("test", "ips").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_spans_mget_batches() {
    let (addr, _) = start_server().await;
    let storage = connect(addr).await;

    let total = ipcounter::storage::resp::MGET_BATCH + 10;
    for i in 0..total {
        let ip = format!("10.{}.{}.1", i / 256, i % 256);
        storage.increment("test", "ips", &ip, 1).await.unwrap();
    }

    let records = storage.list("test", "ips").await.unwrap();
    assert_eq!(records.len(), total);
    assert!(records.iter().all(|r| r.count == 1));
}

#[tokio::test]
async fn test_increment_error_reply() {
    let (addr, _) = start_server().await;
    let storage = connect(addr).await;

    storage.increment("test", "ips", "1.1.1.1", i64::MAX).await.unwrap();
    let err = storage.increment("test", "ips", "1.1.1.1", 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncrementCount);
}

#[tokio::test]
async fn test_invalid_set_name() {
    let (addr, _) = start_server().await;
    let storage = connect(addr).await;

    let err = storage.increment("test", "no*glob", "1.1.1.1", 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidKey);
}

#[tokio::test]
async fn test_list_undecodable_key() {
    let (addr, server) = start_server().await;
    let storage = connect(addr).await;

    server.engine.incr_by(&Bytes::from("test:ips::c0 a8"), 1).unwrap();
    let err = storage.list("test", "ips").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIpv4Length);
}

#[tokio::test]
async fn test_connect_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = RespStorage::connect("127.0.0.1", addr.port()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
}

#[tokio::test]
async fn test_service_end_to_end() {
    let (addr, _) = start_server().await;
    let storage = Arc::new(connect(addr).await);
    let service = Service::new(Arc::clone(&storage));

    let input = "192.168.1.1\n192.168.1.2\n192.168.1.1\n\n192.168.1.1\n";
    service
        .import(input.as_bytes(), "test", "ips", Mode::Async)
        .await
        .unwrap();

    let report = service.export("test", "ips", Mode::Sync).await.unwrap();
    let mut lines: Vec<&str> = report.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["192.168.1.1, count=3", "192.168.1.2, count=1"]);

    storage.close().await;
}

#[tokio::test]
async fn test_cancelled_increment_keeps_replies_in_step() {
    let (addr, server) = start_server_with(Server {
        delay: Duration::from_millis(100),
        ..Default::default()
    })
    .await;
    let storage = RespStorage::connect_pool(&addr.ip().to_string(), addr.port(), 1)
        .await
        .unwrap();

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        storage.increment("test", "ips", "10.0.0.1", 1),
    )
    .await;
    assert!(cancelled.is_err());

    // The server applied the abandoned INCRBY; its reply must not leak
    let records = storage.list("test", "ips").await.unwrap();
    assert_eq!(records, vec![ipcounter::Record::new("10.0.0.1", 1)]);

    storage.increment("test", "ips", "10.0.0.1", 1).await.unwrap();
    let records = storage.list("test", "ips").await.unwrap();
    assert_eq!(records, vec![ipcounter::Record::new("10.0.0.1", 2)]);
    assert_eq!(server.engine.scan_prefix(b"test:ips::").unwrap().len(), 1);
}

#[tokio::test]
async fn test_async_import_uses_several_connections() {
    let (addr, server) = start_server_with(Server {
        delay: Duration::from_millis(20),
        ..Default::default()
    })
    .await;
    let storage = Arc::new(
        RespStorage::connect_pool(&addr.ip().to_string(), addr.port(), 4)
            .await
            .unwrap(),
    );
    assert_eq!(storage.pool_size(), 4);

    let input: String = (1..=20).map(|i| format!("10.0.0.{}\n", i)).collect();
    Service::new(Arc::clone(&storage))
        .import(input.as_bytes(), "test", "ips", Mode::Async)
        .await
        .unwrap();

    assert!(server.max_in_flight.load(Ordering::SeqCst) > 1);
    assert_eq!(storage.list("test", "ips").await.unwrap().len(), 20);
}
