//! Splices an exit stream's decrypted application bytes to/from a real TCP
//! socket (§4.9 "splice bytes").

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use mm_stream::{StreamError, StreamHandle, StreamSink};

/// Read chunk size, kept well under [`mm_protocol::MAX_PAYLOAD_LEN`] once the
/// 12-byte nonce and 16-byte AEAD tag `SessionKey::seal` adds are accounted
/// for.
const READ_CHUNK: usize = mm_protocol::MAX_PAYLOAD_LEN - 64;

pub struct TcpSink {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    handle_tx: Mutex<Option<oneshot::Sender<StreamHandle>>>,
}

impl TcpSink {
    pub fn spawn(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (handle_tx, handle_rx) = oneshot::channel::<StreamHandle>();

        tokio::spawn(run_writer(write_half, write_rx));
        tokio::spawn(run_reader(read_half, handle_rx));

        TcpSink {
            write_tx,
            handle_tx: Mutex::new(Some(handle_tx)),
        }
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

async fn run_reader(mut read_half: OwnedReadHalf, handle_rx: oneshot::Receiver<StreamHandle>) {
    let Ok(handle) = handle_rx.await else { return };
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
}

#[async_trait]
impl StreamSink for TcpSink {
    async fn on_data(&self, data: Vec<u8>) {
        let _ = self.write_tx.send(data);
    }

    async fn on_closed(&self, _reason: Option<StreamError>) {
        // Dropping the sender ends `run_writer`'s loop, which shuts the
        // socket's write half down; the reader side ends on its own once
        // the peer notices and closes its end too.
    }

    async fn bind_handle(&self, handle: StreamHandle) {
        if let Some(tx) = self.handle_tx.lock().take() {
            let _ = tx.send(handle);
        }
    }
}
