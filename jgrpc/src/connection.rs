use std::io::IoSlice;

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::tcp::OwnedWriteHalf,
    sync::mpsc,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::{Error, ErrorKind, Result},
    frame,
    message::Message,
};

const SEND_QUEUE_DEPTH: usize = 1024;
const WRITE_BATCH: usize = 64;

/// Outbound half of one TCP connection. Clonable; every producer queues
/// encoded frames on the same channel and a single writer task owns the
/// socket, which serialises writes per connection.
#[derive(Clone, Debug)]
pub struct Connection {
    key: String,
    tx: mpsc::Sender<Bytes>,
}

impl Connection {
    pub(crate) fn spawn(
        key: String,
        write_half: OwnedWriteHalf,
        tracker: &TaskTracker,
        stop: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let conn_key = key.clone();
        tracker.spawn(async move {
            tokio::select! {
                () = stop.cancelled() => {}
                r = write_loop(write_half, rx) => {
                    if let Err(e) = r {
                        tracing::debug!("write loop for {conn_key} ended: {e}");
                    }
                }
            }
        });
        Self { key, tx }
    }

    /// The connection cache key, `"host:port"`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encodes and queues one message.
    ///
    /// # Errors
    ///
    /// Fails on encode errors, or with `SendFailed` once the writer task
    /// is gone.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        let bytes = frame::encode(msg)?;
        self.tx.send(bytes).await.map_err(|_| {
            Error::new(
                ErrorKind::SendFailed,
                format!("connection {} is closed", self.key),
            )
        })
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
) -> Result<()> {
    let mut batch: Vec<Bytes> = Vec::with_capacity(WRITE_BATCH);
    loop {
        let n = rx.recv_many(&mut batch, WRITE_BATCH).await;
        if n == 0 {
            return Ok(());
        }

        let mut bufs = [IoSlice::new(&[]); WRITE_BATCH];
        for (msg, io_slice) in batch.iter().zip(&mut bufs) {
            *io_slice = IoSlice::new(msg);
        }

        let mut slices = &mut bufs[..batch.len()];
        while !slices.is_empty() {
            match write_half.write_vectored(slices).await {
                Ok(written) => IoSlice::advance_slices(&mut slices, written),
                Err(e) => {
                    return Err(Error::new(ErrorKind::SendFailed, e.to_string()));
                }
            }
        }
        batch.clear();
    }
}
