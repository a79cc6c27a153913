//! Sending side of the chunk engine.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::peer::PeerConnection;

/// One file queued for sending, with the size that went into the manifest.
#[derive(Debug, Clone)]
pub struct SendFile {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct ChunkSender {
    peer: Arc<dyn PeerConnection>,
    chunk_size: usize,
    high_water_mark: usize,
    cancel: CancellationToken,
}

impl ChunkSender {
    pub fn new(
        peer: Arc<dyn PeerConnection>,
        chunk_size: usize,
        high_water_mark: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            peer,
            chunk_size,
            high_water_mark,
            cancel,
        }
    }

    /// Stream every file over the data channel in manifest order.
    ///
    /// Returns `Ok(true)` when everything was queued, `Ok(false)` when the
    /// transfer was cancelled; cancellation is checked at each slice
    /// boundary, so at most one already-read slice goes out after it.
    /// `progress` is called with the file index and cumulative bytes sent
    /// for that file.
    pub async fn run(
        &self,
        files: &[SendFile],
        mut progress: impl FnMut(usize, u64) + Send,
    ) -> Result<bool> {
        let mut buf = vec![0u8; self.chunk_size];
        for (index, file) in files.iter().enumerate() {
            let mut source = match tokio::fs::File::open(&file.path).await {
                Ok(f) => f,
                Err(e) => return self.fail_or_stopped(e.into()),
            };
            let mut sent = 0u64;
            progress(index, 0);
            loop {
                if self.cancel.is_cancelled() {
                    tracing::debug!(file = %file.name, "send stopped at slice boundary");
                    return Ok(false);
                }
                if self.peer.buffered_amount() > self.high_water_mark {
                    tokio::select! {
                        _ = self.peer.wait_drained() => {}
                        _ = self.cancel.cancelled() => return Ok(false),
                    }
                    continue;
                }
                let n = match source.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => return self.fail_or_stopped(e.into()),
                };
                if n == 0 {
                    break;
                }
                if let Err(e) = self.peer.send_chunk(Bytes::copy_from_slice(&buf[..n])).await {
                    return self.fail_or_stopped(e);
                }
                sent += n as u64;
                progress(index, sent);
            }
        }
        Ok(true)
    }

    /// A failure racing a cancellation counts as a stop, not an error.
    fn fail_or_stopped(&self, e: crate::error::ClientError) -> Result<bool> {
        if self.cancel.is_cancelled() {
            Ok(false)
        } else {
            Err(e)
        }
    }
}
