//! End-to-end tests against a real listener.

use ledgerkv::persistence::{AppendOnlyLog, FsyncPolicy};
use ledgerkv::{server, CommandHandler, ConnectionStats, StorageEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(storage: Arc<StorageEngine>, idle_timeout: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handler = CommandHandler::new(storage);

        let task = tokio::spawn(server::run(
            listener,
            handler,
            Arc::new(ConnectionStats::new()),
            idle_timeout,
            async {
                let _ = stop_rx.await;
            },
        ));

        Self {
            addr,
            stop: Some(stop_tx),
            task,
        }
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}

struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: BufReader::new(TcpStream::connect(addr).await.unwrap()),
        }
    }

    fn encode(args: &[&str]) -> Vec<u8> {
        let mut frame = format!("*{}\r\n", args.len()).into_bytes();
        for arg in args {
            frame.extend_from_slice(format!("${}\r\n{}\r\n", arg.len(), arg).as_bytes());
        }
        frame
    }

    async fn send(&mut self, args: &[&str]) {
        self.stream
            .get_mut()
            .write_all(&Self::encode(args))
            .await
            .unwrap();
    }

    /// Reads one reply, returning bulk payloads without their framing and
    /// `None` for a null bulk string.
    async fn reply(&mut self) -> Option<String> {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.unwrap();
        let line = line.trim_end_matches("\r\n").to_string();

        if let Some(len) = line.strip_prefix('$') {
            let len: i64 = len.parse().unwrap();
            if len < 0 {
                return None;
            }
            let mut payload = vec![0u8; len as usize + 2];
            self.stream.read_exact(&mut payload).await.unwrap();
            payload.truncate(len as usize);
            return Some(String::from_utf8(payload).unwrap());
        }
        Some(line)
    }

    async fn call(&mut self, args: &[&str]) -> Option<String> {
        self.send(args).await;
        self.reply().await
    }

    async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 16];
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.stream.read(&mut buf)).await,
            Ok(Ok(0))
        )
    }
}

#[tokio::test]
async fn set_with_ttl_then_expiry() {
    let server = TestServer::start(Arc::new(StorageEngine::new()), None).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.call(&["SET", "a", "1", "2"]).await.as_deref(), Some("+OK"));
    assert_eq!(client.call(&["GET", "a"]).await.as_deref(), Some("1"));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(client.call(&["GET", "a"]).await, None);

    server.stop().await;
}

#[tokio::test]
async fn json_set_valid_and_invalid() {
    let server = TestServer::start(Arc::new(StorageEngine::new()), None).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(
        client.call(&["JSON.SET", "cfg", "{\"x\":1}"]).await.as_deref(),
        Some("+OK")
    );
    assert_eq!(client.call(&["GET", "cfg"]).await.as_deref(), Some("{\"x\":1}"));

    let reply = client.call(&["JSON.SET", "other", "not json"]).await.unwrap();
    assert!(reply.starts_with("-ERR"));
    assert_eq!(client.call(&["GET", "other"]).await, None);

    server.stop().await;
}

#[tokio::test]
async fn del_missing_key_is_ok() {
    let server = TestServer::start(Arc::new(StorageEngine::new()), None).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.call(&["DEL", "missing"]).await.as_deref(), Some("+OK"));

    server.stop().await;
}

#[tokio::test]
async fn unknown_command_keeps_connection_open() {
    let server = TestServer::start(Arc::new(StorageEngine::new()), None).await;
    let mut client = Client::connect(server.addr).await;

    let reply = client.call(&["FOO"]).await.unwrap();
    assert!(reply.starts_with('-'));
    assert!(reply.contains("FOO"));
    assert_eq!(client.call(&["PING"]).await.as_deref(), Some("+PONG"));

    server.stop().await;
}

#[tokio::test]
async fn pipelined_commands_are_answered_in_order() {
    let server = TestServer::start(Arc::new(StorageEngine::new()), None).await;
    let mut client = Client::connect(server.addr).await;

    let mut batch = Vec::new();
    for args in [
        &["SET", "k1", "v1"][..],
        &["SET", "k2", "v2"],
        &["GET", "k1"],
        &["DEL", "k1"],
        &["GET", "k1"],
        &["GET", "k2"],
    ] {
        batch.extend(Client::encode(args));
    }
    client.stream.get_mut().write_all(&batch).await.unwrap();

    assert_eq!(client.reply().await.as_deref(), Some("+OK"));
    assert_eq!(client.reply().await.as_deref(), Some("+OK"));
    assert_eq!(client.reply().await.as_deref(), Some("v1"));
    assert_eq!(client.reply().await.as_deref(), Some("+OK"));
    assert_eq!(client.reply().await, None);
    assert_eq!(client.reply().await.as_deref(), Some("v2"));

    server.stop().await;
}

#[tokio::test]
async fn clients_share_one_store() {
    let server = TestServer::start(Arc::new(StorageEngine::new()), None).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            let key = format!("key-{}", i);
            let value = format!("value-{}", i);
            assert_eq!(
                client.call(&["SET", &key, &value, "PERSIST"]).await.as_deref(),
                Some("+OK")
            );
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut client = Client::connect(server.addr).await;
    assert_eq!(client.call(&["DBSIZE"]).await.as_deref(), Some(":8"));
    for i in 0..8 {
        let key = format!("key-{}", i);
        assert_eq!(
            client.call(&["GET", &key]).await,
            Some(format!("value-{}", i))
        );
    }

    server.stop().await;
}

#[tokio::test]
async fn malformed_frame_gets_error_then_close() {
    let server = TestServer::start(Arc::new(StorageEngine::new()), None).await;
    let mut client = Client::connect(server.addr).await;

    client.stream.get_mut().write_all(b"*1\r\n$x\r\n").await.unwrap();
    let reply = client.reply().await.unwrap();
    assert!(reply.starts_with("-ERR Protocol error"));
    assert!(client.is_closed().await);

    server.stop().await;
}

#[tokio::test]
async fn quit_closes_connection() {
    let server = TestServer::start(Arc::new(StorageEngine::new()), None).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.call(&["QUIT"]).await.as_deref(), Some("+OK"));
    assert!(client.is_closed().await);

    server.stop().await;
}

#[tokio::test]
async fn idle_connections_are_closed() {
    let server = TestServer::start(
        Arc::new(StorageEngine::new()),
        Some(Duration::from_millis(100)),
    )
    .await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.call(&["PING"]).await.as_deref(), Some("+PONG"));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(client.is_closed().await);

    server.stop().await;
}

#[tokio::test]
async fn writes_survive_restart_through_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aof.log");

    {
        let log = AppendOnlyLog::open(&path, FsyncPolicy::Always).unwrap();
        let storage = Arc::new(StorageEngine::new().with_log(Arc::new(log)));
        let server = TestServer::start(storage, None).await;
        let mut client = Client::connect(server.addr).await;

        client.call(&["SET", "kept", "hello world", "PERSIST"]).await;
        client.call(&["JSON.SET", "cfg", "{\"x\": [1, 2]}"]).await;
        client.call(&["SET", "gone", "v"]).await;
        client.call(&["DEL", "gone"]).await;
        client.call(&["SET", "short", "v", "0"]).await;

        server.stop().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let storage = StorageEngine::new();
    let loaded = AppendOnlyLog::read_records(&path).unwrap();
    assert!(loaded.skipped.is_empty());
    let stats = storage.restore(loaded.records);
    assert_eq!(stats.expired, 1);

    let server = TestServer::start(Arc::new(storage), None).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.call(&["GET", "kept"]).await.as_deref(), Some("hello world"));
    assert_eq!(client.call(&["TTL", "kept"]).await.as_deref(), Some(":-1"));
    assert_eq!(
        client.call(&["GET", "cfg"]).await.as_deref(),
        Some("{\"x\": [1, 2]}")
    );
    assert_eq!(client.call(&["GET", "gone"]).await, None);
    assert_eq!(client.call(&["GET", "short"]).await, None);
    assert_eq!(client.call(&["DBSIZE"]).await.as_deref(), Some(":2"));

    server.stop().await;
}

#[tokio::test]
async fn deleted_log_file_is_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aof.log");
    let log = AppendOnlyLog::open(&path, FsyncPolicy::Os).unwrap();
    let storage = Arc::new(StorageEngine::new().with_log(Arc::new(log)));
    let server = TestServer::start(storage, None).await;
    let mut client = Client::connect(server.addr).await;

    client.call(&["SET", "first", "1"]).await;
    std::fs::remove_file(&path).unwrap();
    assert_eq!(client.call(&["SET", "second", "2"]).await.as_deref(), Some("+OK"));

    let records = AppendOnlyLog::read_records(&path).unwrap().records;
    assert_eq!(records.len(), 1);
    assert!(records[0].encode().starts_with("SET second 2 string"));
    assert_eq!(client.call(&["GET", "first"]).await.as_deref(), Some("1"));

    server.stop().await;
}
