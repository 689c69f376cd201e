//! Utilities to help with testing kvpool

use crate::backend::{self, Backend, Connector};
use crate::log::{LogFields, TagLogger, TraceContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub fn setup_tracing_subscriber() {
    use tracing_subscriber::fmt::format::FmtSpan;
    let _ = tracing_subscriber::fmt()
        .with_thread_names(true)
        .with_span_events(FmtSpan::ENTER)
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// A connection which remembers the order it was made in.
pub struct TestConnection {
    pub id: usize,
    pub backend: Backend,
}

/// A test-only connector whose connections can be made to fail or stall.
pub struct TestConnector {
    next_id: AtomicUsize,
    can_connect: AtomicBool,
    valid: AtomicBool,
    stall_validation: AtomicBool,

    /// The number of times "is_valid" has been called.
    pub validations: AtomicUsize,
}

impl TestConnector {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            can_connect: AtomicBool::new(true),
            valid: AtomicBool::new(true),
            stall_validation: AtomicBool::new(false),
            validations: AtomicUsize::new(0),
        }
    }

    pub fn set_connectable(&self, can_connect: bool) {
        self.can_connect.store(can_connect, Ordering::SeqCst);
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// Makes every future validation take an unrealistically long time.
    pub fn stall_validation(&self) {
        self.stall_validation.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for TestConnector {
    type Connection = TestConnection;

    async fn connect(&self, backend: &Backend) -> Result<Self::Connection, backend::Error> {
        if !self.can_connect.load(Ordering::SeqCst) {
            return Err(backend::Error::Other(anyhow::anyhow!("Failed")));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(TestConnection {
            id,
            backend: backend.clone(),
        })
    }

    async fn is_valid(&self, _conn: &mut Self::Connection) -> Result<(), backend::Error> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if self.stall_validation.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(9999999)).await;
        }
        if self.valid.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(backend::Error::Other(anyhow::anyhow!("Failed")))
        }
    }
}

/// One entry captured by a [RecordingLogger].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub level: tracing::Level,
    pub trace: TraceContext,
    pub tag: String,
    pub fields: LogFields,
}

/// A logger which keeps every entry in memory.
#[derive(Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLogger {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn record(&self, level: tracing::Level, trace: &TraceContext, tag: &str, fields: LogFields) {
        self.entries.lock().unwrap().push(LogEntry {
            level,
            trace: trace.clone(),
            tag: tag.to_string(),
            fields,
        });
    }
}

impl TagLogger for RecordingLogger {
    fn tag_info(&self, trace: &TraceContext, tag: &str, fields: LogFields) {
        self.record(tracing::Level::INFO, trace, tag, fields);
    }

    fn tag_error(&self, trace: &TraceContext, tag: &str, fields: LogFields) {
        self.record(tracing::Level::ERROR, trace, tag, fields);
    }
}

/// How a [MockServer] should treat credentials and databases.
#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    /// When set, every command other than AUTH requires authentication.
    pub password: Option<String>,

    /// The highest database index SELECT accepts.
    pub max_db: i64,
}

#[derive(Default)]
struct MockState {
    config: MockConfig,
    // (connection number, command and arguments)
    commands: Mutex<Vec<(usize, Vec<String>)>>,
    data: Mutex<HashMap<String, Vec<u8>>>,
    connections: AtomicUsize,
    // Connections the client hung up on.
    closed_by_client: AtomicUsize,
}

/// A tiny in-process server speaking just enough of the Redis protocol to
/// exercise connection setup and logged commands.
pub struct MockServer {
    pub address: SocketAddr,
    state: Arc<MockState>,
    kill_tx: watch::Sender<usize>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(config: MockConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bound localhost");
        let address = listener.local_addr().expect("got local_addr");
        let state = Arc::new(MockState {
            config,
            ..Default::default()
        });
        let (kill_tx, _) = watch::channel(0);

        let handle = tokio::spawn({
            let state = state.clone();
            let kill_tx = kill_tx.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let conn_id = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                    let state = state.clone();
                    let mut kill_rx = kill_tx.subscribe();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut read = BufReader::new(read);
                        let mut authenticated = state.config.password.is_none();
                        loop {
                            let args = tokio::select! {
                                args = read_command(&mut read) => args,
                                _ = kill_rx.changed() => return,
                            };
                            let args = match args {
                                Ok(Some(args)) => args,
                                Ok(None) => {
                                    state.closed_by_client.fetch_add(1, Ordering::SeqCst);
                                    return;
                                }
                                Err(_) => return,
                            };
                            let reply = state.respond(conn_id, &mut authenticated, args);
                            if write.write_all(&reply).await.is_err() {
                                return;
                            }
                        }
                    });
                }
            }
        });

        Self {
            address,
            state,
            kill_tx,
            handle,
        }
    }

    /// Every command received so far, in order, without the client library's
    /// own handshake traffic.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state
            .commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, args)| !args[0].eq_ignore_ascii_case("CLIENT"))
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Command names received on a single connection, in order.
    pub fn command_names_on(&self, conn_id: usize) -> Vec<String> {
        self.state
            .commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, args)| *id == conn_id && !args[0].eq_ignore_ascii_case("CLIENT"))
            .map(|(_, args)| args[0].to_uppercase())
            .collect()
    }

    /// The number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// The number of connections the client has closed.
    pub fn closed_by_client(&self) -> usize {
        self.state.closed_by_client.load(Ordering::SeqCst)
    }

    /// Waits until the client has closed `count` connections.
    ///
    /// Panics if that takes more than a few seconds.
    pub async fn wait_for_closed_by_client(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.closed_by_client() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client closed connections in time");
    }

    /// Abruptly closes every open connection. New connections are still
    /// accepted.
    pub fn kill_connections(&self) {
        self.kill_tx.send_modify(|generation| *generation += 1);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.kill_connections();
        self.handle.abort();
    }
}

impl MockState {
    fn respond(&self, conn_id: usize, authenticated: &mut bool, args: Vec<Vec<u8>>) -> Vec<u8> {
        let args: Vec<String> = args
            .into_iter()
            .map(|arg| String::from_utf8_lossy(&arg).into_owned())
            .collect();
        self.commands.lock().unwrap().push((conn_id, args.clone()));

        let name = args[0].to_uppercase();
        match name.as_str() {
            "CLIENT" => return b"+OK\r\n".to_vec(),
            "AUTH" => {
                let supplied = args.last().map(String::as_str);
                return match &self.config.password {
                    None => b"-ERR AUTH called without any password configured\r\n".to_vec(),
                    Some(password) if Some(password.as_str()) == supplied => {
                        *authenticated = true;
                        b"+OK\r\n".to_vec()
                    }
                    Some(_) => b"-WRONGPASS invalid username-password pair\r\n".to_vec(),
                };
            }
            _ if !*authenticated => return b"-NOAUTH Authentication required.\r\n".to_vec(),
            _ => (),
        }

        match (name.as_str(), &args[1..]) {
            ("PING", _) => b"+PONG\r\n".to_vec(),
            ("SELECT", [db]) => match db.parse::<i64>() {
                Ok(db) if (0..=self.config.max_db).contains(&db) => b"+OK\r\n".to_vec(),
                _ => b"-ERR DB index is out of range\r\n".to_vec(),
            },
            ("SET", [key, value]) => {
                self.data
                    .lock()
                    .unwrap()
                    .insert(key.clone(), value.as_bytes().to_vec());
                b"+OK\r\n".to_vec()
            }
            ("GET", [key]) => match self.data.lock().unwrap().get(key) {
                Some(value) => {
                    let mut reply = format!("${}\r\n", value.len()).into_bytes();
                    reply.extend_from_slice(value);
                    reply.extend_from_slice(b"\r\n");
                    reply
                }
                None => b"$-1\r\n".to_vec(),
            },
            ("INCR", [key]) => {
                let mut data = self.data.lock().unwrap();
                let current = data
                    .get(key)
                    .and_then(|value| String::from_utf8_lossy(value).parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + 1;
                data.insert(key.clone(), next.to_string().into_bytes());
                format!(":{next}\r\n").into_bytes()
            }
            _ => format!("-ERR unknown command '{}'\r\n", args[0]).into_bytes(),
        }
    }
}

// Reads one command, sent as an array of bulk strings.
async fn read_command<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    fn bad_frame(line: &str) -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected frame: {line:?}"),
        )
    }

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count: usize = line
        .trim_end()
        .strip_prefix('*')
        .and_then(|count| count.parse().ok())
        .ok_or_else(|| bad_frame(&line))?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len: usize = line
            .trim_end()
            .strip_prefix('$')
            .and_then(|len| len.parse().ok())
            .ok_or_else(|| bad_frame(&line))?;
        let mut arg = vec![0; len + 2];
        reader.read_exact(&mut arg).await?;
        arg.truncate(len);
        args.push(arg);
    }
    if args.is_empty() {
        return Err(bad_frame(&line));
    }
    Ok(Some(args))
}
