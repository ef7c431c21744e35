//! SBS client: reads BaseStation lines from a TCP source.
//!
//! Each received line is optionally recorded to an archive, handed to the
//! raw handler, then parsed and handed to the message handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adsb_core::SbsMessage;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::{Recorder, DEFAULT_BACKUP_COUNT, DEFAULT_MAX_BYTES};
use crate::error::{Result, SbsError};
use crate::protocol::SbsFramer;

/// Called with every raw line, delimiter removed.
pub type RawHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Called with every parsed message that has a valid ICAO.
pub type MessageHandler = Arc<dyn Fn(SbsMessage) + Send + Sync>;

const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Start recording when the client starts.
    pub record: bool,
    pub record_file: Option<PathBuf>,
    pub max_bytes: u64,
    pub backup_count: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 30003,
            record: false,
            record_file: None,
            max_bytes: DEFAULT_MAX_BYTES,
            backup_count: DEFAULT_BACKUP_COUNT,
        }
    }
}

struct Connection {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Client {
    config: ClientConfig,
    on_raw: Option<RawHandler>,
    on_message: Option<MessageHandler>,
    recorder: Recorder,
    connection: Option<Connection>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.record && config.record_file.is_none() {
            return Err(SbsError::RecordFileMissing);
        }
        Ok(Client {
            config,
            on_raw: None,
            on_message: None,
            recorder: Recorder::new(),
            connection: None,
        })
    }

    #[must_use]
    pub fn on_raw(mut self, handler: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_raw = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_message(mut self, handler: impl Fn(SbsMessage) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start recording (if configured) and connect to the configured source.
    pub async fn start(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Err(SbsError::AlreadyRunning("Client"));
        }
        if self.config.record {
            self.start_recording(None, self.config.max_bytes, self.config.backup_count)?;
        }
        let (host, port) = (self.config.host.clone(), self.config.port);
        self.connect(&host, port).await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.stop_recording()?;
        self.disconnect().await;
        Ok(())
    }

    /// Open a TCP connection and spawn the reader task, dropping any
    /// previous connection first.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect().await;
        let stream = TcpStream::connect((host, port)).await?;
        info!("Connected to {host}:{port}");

        let sink = LineSink {
            recorder: self.recorder.clone(),
            on_raw: self.on_raw.clone(),
            on_message: self.on_message.clone(),
        };
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(read_loop(stream, sink, cancel_token.clone()));

        self.connection = Some(Connection { cancel_token, task });
        Ok(())
    }

    /// Drop the connection and wait for the reader task to finish.
    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.cancel_token.cancel();
            if let Err(e) = conn.task.await {
                warn!("Reader task ended abnormally: {e}");
            }
        }
    }

    /// Wait for the reader task to finish. Safe to cancel.
    pub async fn wait_closed(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if let Err(e) = (&mut conn.task).await {
            warn!("Reader task ended abnormally: {e}");
        }
        self.connection = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| !conn.task.is_finished())
    }

    /// Start recording received lines. Falls back to the configured file.
    pub fn start_recording(
        &self,
        record_file: Option<&Path>,
        max_bytes: u64,
        backup_count: u32,
    ) -> Result<()> {
        let path = record_file
            .or(self.config.record_file.as_deref())
            .ok_or(SbsError::NoRecordFile)?;
        self.recorder.start(path, max_bytes, backup_count)
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.recorder.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }
}

/// Per-line processing shared with the reader task.
struct LineSink {
    recorder: Recorder,
    on_raw: Option<RawHandler>,
    on_message: Option<MessageHandler>,
}

impl LineSink {
    fn handle(&self, line: &[u8]) {
        let Ok(text) = std::str::from_utf8(line) else {
            warn!("Dropping non UTF-8 SBS line");
            return;
        };
        self.recorder.record(text);

        if let Some(on_raw) = &self.on_raw {
            on_raw(line);
        }

        let Some(on_message) = &self.on_message else {
            return;
        };
        let msg = match SbsMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                error!("Error parsing message string: {e}");
                return;
            }
        };
        if !msg.has_valid_icao() {
            warn!("Invalid ICAO code detected: {:?}", msg.hex_ident);
            return;
        }
        on_message(msg);
    }
}

async fn read_loop(mut stream: TcpStream, sink: LineSink, cancel_token: CancellationToken) {
    let mut framer = SbsFramer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!("Client connection cancelled");
                return;
            }
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    info!("Connection closed by server");
                    return;
                }
                Ok(n) => {
                    for line in framer.push(&buf[..n]) {
                        sink.handle(&line);
                    }
                }
                Err(e) => {
                    error!("Connection error: {e}");
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const POSITION: &str = "MSG,3,1,1,7C79B7,1,2017/03/25,10:41:45.365,2017/03/25,10:41:45.384,,2850,,,-34.84658,138.67962,,,,,,";
    const SQUAWK: &str =
        "MSG,6,1,1,7C7C76,1,2018/02/18,21:21:06.987,2018/02/18,21:21:07.005,,,,,,,,7220,0,0,0,";

    /// A one-shot source that writes `payload` to the first client then closes.
    async fn source(payload: Vec<u8>) -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&payload).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        (port, task)
    }

    fn payload(lines: &[&str]) -> Vec<u8> {
        let mut data = b"\r\n".to_vec(); // heartbeat
        for line in lines {
            data.extend_from_slice(line.as_bytes());
            data.extend_from_slice(b"\r\n");
        }
        data
    }

    fn config(port: u16) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".into(),
            port,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_record_requires_file() {
        let err = Client::new(ClientConfig {
            record: true,
            ..ClientConfig::default()
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Record is enabled but no record_file is specified!"
        );
    }

    #[test]
    fn test_start_recording_without_file() {
        let client = Client::new(ClientConfig::default()).unwrap();
        assert!(matches!(
            client.start_recording(None, 0, 0),
            Err(SbsError::NoRecordFile)
        ));
    }

    #[tokio::test]
    async fn test_message_handlers() {
        let bad = "MSG,3,1,1,7C79B7,1,garbage";
        let invalid = POSITION.replace("7C79B7", "000000");
        let (port, source_task) = source(payload(&[POSITION, bad, &invalid, SQUAWK])).await;

        let raw_count = Arc::new(AtomicUsize::new(0));
        let messages = Arc::new(Mutex::new(Vec::new()));
        let raw = raw_count.clone();
        let msgs = messages.clone();

        let mut client = Client::new(config(port))
            .unwrap()
            .on_raw(move |_| {
                raw.fetch_add(1, Ordering::SeqCst);
            })
            .on_message(move |msg| msgs.lock().unwrap().push(msg));
        client.start().await.unwrap();
        assert!(matches!(client.start().await, Err(SbsError::AlreadyRunning(_))));

        tokio::time::timeout(Duration::from_secs(5), client.wait_closed())
            .await
            .unwrap();
        source_task.await.unwrap();

        assert_eq!(raw_count.load(Ordering::SeqCst), 4);
        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 2, "bad and invalid lines are dropped");
        assert_eq!(messages[0].hex_ident, "7C79B7");
        assert_eq!(messages[1].squawk.as_deref(), Some("7220"));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.log");
        let mut data = payload(&[POSITION]);
        data.extend_from_slice(b"MSG,3,1,1,\xff\xfe,1\r\n");
        data.extend_from_slice(&payload(&[SQUAWK]));
        let (port, source_task) = source(data).await;

        let mut client = Client::new(ClientConfig {
            record: true,
            record_file: Some(path.clone()),
            ..config(port)
        })
        .unwrap();
        client.start().await.unwrap();
        assert!(client.is_recording());

        tokio::time::timeout(Duration::from_secs(5), client.wait_closed())
            .await
            .unwrap();
        source_task.await.unwrap();
        client.stop().await.unwrap();
        assert!(!client.is_recording());

        let records: Vec<_> = crate::archive::read_archive(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, POSITION);
        assert_eq!(records[1].message, SQUAWK);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let mut client = Client::new(config(port)).unwrap();
        client.start().await.unwrap();
        let (_socket, _) = accept.await.unwrap();
        assert!(client.is_connected());

        tokio::time::timeout(Duration::from_secs(5), client.stop())
            .await
            .unwrap()
            .unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_drops_previous_connection() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second_port = second.local_addr().unwrap().port();

        let mut client = Client::new(config(first.local_addr().unwrap().port())).unwrap();
        client.start().await.unwrap();
        let (mut old_socket, _) = first.accept().await.unwrap();

        client.connect("127.0.0.1", second_port).await.unwrap();
        let (_new_socket, _) = second.accept().await.unwrap();
        assert!(client.is_connected());

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), old_socket.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "previous connection is closed");
        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = Client::new(config(port)).unwrap();
        assert!(matches!(client.start().await, Err(SbsError::Io(_))));
    }
}
