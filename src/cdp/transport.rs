//! DevTools WebSocket transport
//!
//! A minimal RFC 6455 client over a tokio `TcpStream`. Commands are written
//! as masked text frames; a background task reads replies and resolves the
//! matching pending request. Events are not consumed and are dropped.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// How long Chrome gets to print its DevTools endpoint
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);

type ReplySlot = (String, oneshot::Sender<Result<Value>>);

/// Reply slots of in-flight commands, tagged with their method for errors
///
/// Once the reader is gone the table is closed: waiting slots are failed and
/// new ones are refused.
#[derive(Default)]
struct Inflight {
    closed: bool,
    replies: HashMap<u64, ReplySlot>,
}

impl Inflight {
    fn register(
        &mut self,
        id: u64,
        method: &str,
        reply: oneshot::Sender<Result<Value>>,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::transport(format!("Connection lost before sending {}", method)));
        }
        self.replies.insert(id, (method.to_string(), reply));
        Ok(())
    }

    fn take(&mut self, id: u64) -> Option<ReplySlot> {
        self.replies.remove(&id)
    }

    fn close(&mut self) {
        self.closed = true;
        for (_, (method, reply)) in self.replies.drain() {
            let _ = reply.send(Err(Error::transport(format!(
                "Connection lost while waiting for {}",
                method
            ))));
        }
    }
}

type Pending = Arc<Mutex<Inflight>>;

mod opcode {
    pub const TEXT: u8 = 0x1;
    pub const CLOSE: u8 = 0x8;
    pub const PING: u8 = 0x9;
    pub const PONG: u8 = 0xA;
}

/// Encode one masked client frame
fn encode_frame(op: u8, data: &[u8]) -> Vec<u8> {
    let len = data.len();
    let mut frame = Vec::with_capacity(14 + len);
    frame.push(0x80 | op);

    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mask: [u8; 4] = rand::random();
    frame.extend_from_slice(&mask);
    frame.extend(data.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

/// Read one frame; returns `(opcode, payload)`
async fn read_frame(stream: &mut OwnedReadHalf) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    let op = header[0] & 0x0F;
    let masked = header[1] & 0x80 != 0;
    let len = match header[1] & 0x7F {
        126 => stream.read_u16().await? as usize,
        127 => stream.read_u64().await? as usize,
        n => n as usize,
    };

    let mask = if masked {
        let mut m = [0u8; 4];
        stream.read_exact(&mut m).await?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }
    Ok((op, payload))
}

/// Turn a reply envelope into the command's result
fn parse_reply(method: &str, msg: &Value) -> Result<Value> {
    match msg.get("error") {
        Some(error) => Err(Error::cdp(
            method,
            error.get("code").and_then(Value::as_i64).unwrap_or(-1),
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        )),
        None => Ok(msg.get("result").cloned().unwrap_or_else(|| json!({}))),
    }
}

/// Command channel to one Chrome instance
pub struct Transport {
    child: Mutex<Option<Child>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    next_id: AtomicU64,
    pending: Pending,
    reader: JoinHandle<()>,
}

impl Transport {
    /// Connect to a `ws://host:port/path` DevTools endpoint
    pub async fn connect(child: Option<Child>, ws_url: &str) -> Result<Self> {
        let rest = ws_url
            .strip_prefix("ws://")
            .ok_or_else(|| Error::transport(format!("Unsupported endpoint: {}", ws_url)))?;
        let (host_port, path) = rest.split_once('/').unwrap_or((rest, ""));

        let mut stream = TcpStream::connect(host_port)
            .await
            .map_err(|e| Error::transport_io("Failed to connect to Chrome", e))?;

        let key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            rand::random::<[u8; 16]>(),
        );
        let handshake = format!(
            "GET /{path} HTTP/1.1\r\n\
             Host: {host_port}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        stream
            .write_all(handshake.as_bytes())
            .await
            .map_err(|e| Error::transport_io("Handshake write failed", e))?;

        // Read byte-wise up to the blank line so no frame bytes are swallowed.
        let mut response = Vec::with_capacity(256);
        while !response.ends_with(b"\r\n\r\n") {
            let byte = stream
                .read_u8()
                .await
                .map_err(|e| Error::transport_io("Handshake read failed", e))?;
            response.push(byte);
        }
        let status = String::from_utf8_lossy(&response);
        if !status.starts_with("HTTP/1.1 101") {
            return Err(Error::transport(format!(
                "WebSocket handshake failed: {}",
                status.lines().next().unwrap_or_default()
            )));
        }
        tracing::debug!(endpoint = ws_url, "DevTools socket connected");

        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let pending: Pending = Arc::new(Mutex::new(Inflight::default()));
        let reader = tokio::spawn(Self::read_loop(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&writer),
        ));

        Ok(Self {
            child: Mutex::new(child),
            writer,
            next_id: AtomicU64::new(1),
            pending,
            reader,
        })
    }

    async fn read_loop(
        mut stream: OwnedReadHalf,
        pending: Pending,
        writer: Arc<Mutex<OwnedWriteHalf>>,
    ) {
        loop {
            let (op, payload) = match read_frame(&mut stream).await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(error = %e, "DevTools socket read failed");
                    break;
                }
            };

            match op {
                opcode::TEXT => {
                    let msg: Value = match serde_json::from_slice(&payload) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(error = %e, "unparseable DevTools message");
                            continue;
                        }
                    };
                    let Some(id) = msg.get("id").and_then(Value::as_u64) else {
                        continue;
                    };
                    if let Some((method, reply)) = pending.lock().await.take(id) {
                        let _ = reply.send(parse_reply(&method, &msg));
                    }
                }
                opcode::PING => {
                    let pong = encode_frame(opcode::PONG, &payload);
                    let _ = writer.lock().await.write_all(&pong).await;
                }
                opcode::CLOSE => {
                    tracing::debug!("DevTools socket closed by browser");
                    break;
                }
                _ => {}
            }
        }

        pending.lock().await.close();
    }

    /// Send a command, optionally routed to an attached target session
    pub async fn send<C, R>(&self, session_id: Option<&str>, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.register(id, method, tx)?;

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": serde_json::to_value(params)?,
        });
        if let Some(session_id) = session_id {
            msg["sessionId"] = json!(session_id);
        }
        let frame = encode_frame(opcode::TEXT, serde_json::to_string(&msg)?.as_bytes());

        if let Err(e) = self.writer.lock().await.write_all(&frame).await {
            self.pending.lock().await.take(id);
            return Err(Error::transport_io("WebSocket write failed", e));
        }
        tracing::trace!(method, id, session = session_id, "command sent");

        let result = rx
            .await
            .map_err(|_| Error::transport("Response channel closed"))??;
        Ok(serde_json::from_value(result)?)
    }

    /// Close the socket and terminate the browser process
    pub async fn close(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.write_all(&encode_frame(opcode::CLOSE, &[])).await;
            let _ = writer.shutdown().await;
        }
        self.reader.abort();

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reader.abort();
        if let Ok(mut child) = self.child.try_lock() {
            if let Some(child) = child.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

/// Spawn Chrome and wait for its DevTools endpoint
pub async fn launch_chrome(path: &Path, args: &[String]) -> Result<(Child, String)> {
    let mut child = Command::new(path)
        .args(args)
        .arg("--remote-debugging-port=0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Launch(format!("Failed to spawn {}: {}", path.display(), e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Launch("No stderr from Chrome".into()))?;
    let mut lines = BufReader::new(stderr).lines();

    // Chrome prints: DevTools listening on ws://127.0.0.1:PORT/devtools/browser/GUID
    let find_endpoint = async {
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::trace!(line, "chrome stderr");
            if let Some(start) = line.find("ws://") {
                if line.contains("DevTools listening on") {
                    return Some(line[start..].trim().to_string());
                }
            }
        }
        None
    };

    let ws_url = tokio::time::timeout(LAUNCH_TIMEOUT, find_endpoint)
        .await
        .map_err(|_| Error::Launch("Chrome did not report a DevTools endpoint in time".into()))?
        .ok_or_else(|| Error::Launch("Chrome exited before reporting a DevTools endpoint".into()))?;

    tracing::info!(endpoint = %ws_url, "chrome started");
    Ok((child, ws_url))
}
