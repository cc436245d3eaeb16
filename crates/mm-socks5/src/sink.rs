//! Splices a SOCKS5 client's TCP socket to/from its virtual stream (§4.9
//! "splice bytes bidirectionally"). Structurally the mirror image of
//! `mm-exit`'s `TcpSink`: there the real socket is dialed after the stream
//! exists, so the handle arrives via `bind_handle`; here the client socket
//! already exists before `StreamManager::open` is even called, and `open`
//! only returns once the handle is ready — so the reader task is spawned
//! straight off that return value instead.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use mm_stream::{StreamError, StreamHandle, StreamSink};

const READ_CHUNK: usize = mm_protocol::MAX_PAYLOAD_LEN - 64;

pub struct ClientSink {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ClientSink {
    /// Spawns the writer half and returns a sink ready to hand to
    /// `StreamManager::open`. Call [`spawn_reader`] with the returned handle
    /// once `open` succeeds to start forwarding client bytes the other way.
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(run_writer(write_half, write_rx));
        ClientSink { write_tx }
    }

    /// Pushes raw bytes onto the same write queue as `on_data` — used for
    /// the SOCKS5 reply, which has to go out over this socket but isn't
    /// itself stream application data.
    pub fn write_raw(&self, data: Vec<u8>) {
        let _ = self.write_tx.send(data);
    }
}

async fn run_writer(mut write_half: OwnedWriteHalf, mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(data) = write_rx.recv().await {
        if write_half.write_all(&data).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

/// Reads client bytes and forwards them into the stream until EOF or error,
/// then closes the write side of the stream.
pub fn spawn_reader(mut read_half: OwnedReadHalf, handle: StreamHandle) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    handle.close().await;
                    return;
                }
                Ok(n) => {
                    if handle.send(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
}

#[async_trait]
impl StreamSink for ClientSink {
    async fn on_data(&self, data: Vec<u8>) {
        let _ = self.write_tx.send(data);
    }

    async fn on_closed(&self, _reason: Option<StreamError>) {
        // Dropping the sender ends `run_writer`'s loop, which shuts the
        // client socket's write half down.
    }
}
