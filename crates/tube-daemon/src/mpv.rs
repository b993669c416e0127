/// mpv IPC driver with separated reader/writer tasks.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → event_tx channel
/// ```
///
/// `MpvHandle::send` awaits the reply; `MpvHandle::fire` queues a command
/// without waiting, keeping order with everything queued before it.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

/// Fixed observe_property IDs.  We match on these in property-change events.
pub const OBS_PAUSE: u64 = 1;
pub const OBS_TIME_POS: u64 = 2;
pub const OBS_DURATION: u64 = 3;
pub const OBS_PAUSED_FOR_CACHE: u64 = 4;

const WRITER_QUEUE: usize = 64;

type ReplyMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct MpvRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    /// `None` for fire-and-forget commands.
    reply: Option<oneshot::Sender<anyhow::Result<Value>>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `reason` field of an `end-file` event.
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }
}

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<MpvRequest>,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl MpvHandle {
    fn new(tx: mpsc::Sender<MpvRequest>, timeout: Duration) -> Self {
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            timeout,
        }
    }

    fn request(&self, command: &Value) -> anyhow::Result<(u64, String)> {
        let req_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');
        Ok((req_id, raw))
    }

    /// Send a command and await mpv's reply.
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let (req_id, payload) = self.request(&command)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MpvRequest {
                req_id,
                payload,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(self.timeout, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Queue a command without waiting.  Fails if the writer is gone or its
    /// queue is full; mpv-side errors are only logged by the reader.
    pub fn fire(&self, command: Value) -> anyhow::Result<()> {
        let (req_id, payload) = self.request(&command)?;
        self.tx
            .try_send(MpvRequest {
                req_id,
                payload,
                reply: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => anyhow::anyhow!("mpv command queue full"),
                mpsc::error::TrySendError::Closed(_) => anyhow::anyhow!("mpv writer task gone"),
            })
    }

    /// Register observe_property for every property the engine adapter reads.
    /// Must be called after every fresh connection.
    pub async fn observe_properties(&self) {
        let props = [
            (OBS_PAUSE, "pause"),
            (OBS_TIME_POS, "time-pos"),
            (OBS_DURATION, "duration"),
            (OBS_PAUSED_FOR_CACHE, "paused-for-cache"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }

    /// Health-check: returns Ok(()) if mpv is responsive.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.send(json!(["get_property", "idle-active"])).await?;
        Ok(())
    }

    pub async fn quit(&self) -> anyhow::Result<()> {
        self.send(json!(["quit"])).await?;
        Ok(())
    }
}

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    system_only: bool,
    ipc_timeout: Duration,
}

impl MpvDriver {
    pub fn new(system_only: bool, ipc_timeout: Duration) -> Self {
        Self {
            socket_name: tube_core::platform::mpv_socket_name(),
            process: None,
            system_only,
            ipc_timeout,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary = tube_core::platform::find_mpv_binary(self.system_only)
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {}", mpv_binary.display());

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--keep-open=no")
            .arg(tube_core::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg("--ytdl-format=bestaudio/best")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    /// Spawn mpv and connect to its IPC endpoint.  The returned handle is
    /// connected but mpv may not answer commands yet; probe with `ping`.
    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(
            BufReader::new(read_half),
            write_half,
            event_tx,
            self.ipc_timeout,
        ))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(
                    BufReader::new(read_half),
                    write_half,
                    event_tx,
                    self.ipc_timeout,
                ));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<MpvEvent>,
    timeout: Duration,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: ReplyMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<MpvRequest>(WRITER_QUEUE);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle::new(cmd_tx, timeout)
}

async fn fail_all(pending: &ReplyMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: ReplyMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    route_response(&pending, req_id, val).await;
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn route_response(pending: &ReplyMap, req_id: u64, val: Value) {
    let result = if val["error"].as_str() == Some("success") {
        Ok(val)
    } else {
        let err = val["error"].as_str().unwrap_or("unknown error").to_string();
        Err(anyhow::anyhow!("mpv error: {}", err))
    };

    let waiter = pending.lock().await.remove(&req_id);
    match (waiter, result) {
        (Some(tx), result) => {
            let _ = tx.send(result);
        }
        (None, Err(e)) => warn!("mpv: fired command req={} failed: {}", req_id, e),
        (None, Ok(_)) => debug!("mpv reader: response req={} ok", req_id),
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<MpvRequest>, pending: ReplyMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        if let Some(reply) = req.reply {
            pending.lock().await.insert(req.req_id, reply);
        }
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_change_is_recognised() {
        let evt = MpvEvent {
            raw: json!({"event": "property-change", "id": OBS_TIME_POS, "name": "time-pos", "data": 12.5}),
        };
        let (id, data) = evt.as_property_change().unwrap();
        assert_eq!(id, OBS_TIME_POS);
        assert_eq!(data.as_f64(), Some(12.5));
        assert_eq!(evt.event_name(), Some("property-change"));
    }

    #[test]
    fn end_file_reason() {
        let evt = MpvEvent {
            raw: json!({"event": "end-file", "reason": "eof", "playlist_entry_id": 1}),
        };
        assert!(evt.as_property_change().is_none());
        assert_eq!(evt.end_reason(), Some("eof"));
    }

    #[tokio::test]
    async fn responses_and_events_are_routed() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = start_io_tasks(
            BufReader::new(client_read),
            client_write,
            event_tx,
            Duration::from_secs(2),
        );

        let (server_read, mut server_write) = tokio::io::split(server);
        let fake_mpv = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            // Fired command first, then the awaited one.
            let fired: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let sent: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(fired["command"][0], "set_property");
            let reply = json!({"request_id": sent["request_id"], "error": "success", "data": false});
            server_write
                .write_all(format!("{}\n{}\n", json!({"event": "file-loaded"}), reply).as_bytes())
                .await
                .unwrap();
        });

        handle.fire(json!(["set_property", "pause", true])).unwrap();
        let resp = handle.send(json!(["get_property", "idle-active"])).await.unwrap();
        assert_eq!(resp["data"], false);
        let evt = event_rx.recv().await.unwrap();
        assert_eq!(evt.event_name(), Some("file-loaded"));
        fake_mpv.await.unwrap();
    }
}
