//! Receiving side of the chunk engine.

use bytes::{Bytes, BytesMut};

use airlift_proto::FileManifest;

/// A file cut out of the stream, ready to hand to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedFile {
    pub index: usize,
    pub name: String,
    pub data: Bytes,
}

/// Reassembles the concatenated byte stream back into files.
///
/// Holds at most one file of lookahead: bytes are appended to a rolling
/// buffer and a file is split off the front as soon as its announced
/// length is covered. Zero-length files complete without any input, so
/// drain immediately after construction.
pub struct ChunkReceiver {
    manifest: FileManifest,
    buffer: BytesMut,
    next_index: usize,
}

impl ChunkReceiver {
    pub fn new(manifest: FileManifest) -> Self {
        Self {
            manifest,
            buffer: BytesMut::new(),
            next_index: 0,
        }
    }

    /// Append a chunk and return every file it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<CompletedFile> {
        self.buffer.extend_from_slice(chunk);
        self.drain_ready()
    }

    /// Cut all fully buffered files off the front of the stream.
    pub fn drain_ready(&mut self) -> Vec<CompletedFile> {
        let mut completed = Vec::new();
        while let Some(entry) = self.manifest.entries().get(self.next_index) {
            let len = entry.file_bytes as usize;
            if self.buffer.len() < len {
                break;
            }
            let data = self.buffer.split_to(len).freeze();
            completed.push(CompletedFile {
                index: self.next_index,
                name: entry.file_name.clone(),
                data,
            });
            self.next_index += 1;
        }
        completed
    }

    pub fn is_complete(&self) -> bool {
        self.next_index == self.manifest.len()
    }

    /// Bytes accounted for on one file: its full length once done, the
    /// buffered prefix while it is current, zero while it is still queued.
    pub fn progress(&self, index: usize) -> u64 {
        match self.manifest.entries().get(index) {
            Some(entry) if index < self.next_index => entry.file_bytes,
            Some(_) if index == self.next_index => self.buffer.len() as u64,
            _ => 0,
        }
    }

    pub fn current_index(&self) -> usize {
        self.next_index
    }

    pub fn manifest(&self) -> &FileManifest {
        &self.manifest
    }
}
