use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Mutex;

/// One parked `(key, value)` pair in a hinted-handoff queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum DiskQueueError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("queue drained")]
    Eoq,
    #[error("queue not open")]
    QueueNotOpen,
}

/// A local append-only queue for one `(cluster, topic)` pair, backed by a
/// single growing segment file plus a companion cursor file. Framing is
/// `{key_len: u32, value_len: u32, key, value}`, all integers big-endian.
/// A partial trailing block — the tail of a segment truncated mid-write —
/// is silently discarded on open rather than treated as corruption, per
/// the on-disk format contract.
///
/// One writer (the dispatcher, via `push`) and one reader (the flusher,
/// via `next`/`commit`/`rollback`) are expected; `inner` serializes both
/// sides rather than assuming it, since both still touch the same file
/// handle state.
pub struct DiskQueue {
    segment_path: PathBuf,
    cursor_path: PathBuf,
    inner: Mutex<Inner>,
    inflights: AtomicU64,
}

struct Inner {
    segment: File,
    write_offset: u64,
    read_offset: u64,
    pending_read_offset: Option<u64>,
    open: bool,
}

impl DiskQueue {
    /// Open (creating if absent) the queue rooted at `dir`. Restores the
    /// cursor from the last dump; any blocks appended since that dump are
    /// redelivered, which is acceptable under the at-least-once contract.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, DiskQueueError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let segment_path = dir.join("segment.log");
        let cursor_path = dir.join("cursor");

        let mut segment = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&segment_path)
            .await?;

        let write_offset = discard_partial_trailing_block(&mut segment).await?;
        let read_offset = read_cursor(&cursor_path).await?.min(write_offset);

        Ok(Self {
            segment_path,
            cursor_path,
            inner: Mutex::new(Inner {
                segment,
                write_offset,
                read_offset,
                pending_read_offset: None,
                open: true,
            }),
            inflights: AtomicU64::new(0),
        })
    }

    /// Append a block. Called by the dispatcher when an endpoint delivery
    /// exhausts its retry budget.
    pub async fn push(&self, block: &Block) -> Result<(), DiskQueueError> {
        let mut inner = self.inner.lock().await;
        if !inner.open {
            return Err(DiskQueueError::QueueNotOpen);
        }
        let mut framed = Vec::with_capacity(8 + block.key.len() + block.value.len());
        framed.extend_from_slice(&(block.key.len() as u32).to_be_bytes());
        framed.extend_from_slice(&(block.value.len() as u32).to_be_bytes());
        framed.extend_from_slice(&block.key);
        framed.extend_from_slice(&block.value);

        inner.segment.seek(SeekFrom::End(0)).await?;
        inner.segment.write_all(&framed).await?;
        inner.segment.flush().await?;
        inner.write_offset += framed.len() as u64;
        self.inflights.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Read the next un-flushed block without advancing the persisted
    /// cursor. `Err(Eoq)` means the queue is caught up with the writer.
    /// The caller must follow with `commit` or `rollback`.
    pub async fn next(&self) -> Result<Block, DiskQueueError> {
        let mut inner = self.inner.lock().await;
        if !inner.open {
            return Err(DiskQueueError::QueueNotOpen);
        }
        if inner.read_offset >= inner.write_offset {
            return Err(DiskQueueError::Eoq);
        }

        inner.segment.seek(SeekFrom::Start(inner.read_offset)).await?;
        let mut len_buf = [0u8; 8];
        inner.segment.read_exact(&mut len_buf).await?;
        let key_len = u32::from_be_bytes(len_buf[0..4].try_into().unwrap()) as usize;
        let value_len = u32::from_be_bytes(len_buf[4..8].try_into().unwrap()) as usize;

        let mut key = vec![0u8; key_len];
        inner.segment.read_exact(&mut key).await?;
        let mut value = vec![0u8; value_len];
        inner.segment.read_exact(&mut value).await?;

        inner.pending_read_offset = Some(inner.read_offset + 8 + key_len as u64 + value_len as u64);
        Ok(Block { key, value })
    }

    /// Advance the in-memory read cursor past the block just flushed and
    /// decrement the inflight counter. Does not itself touch disk — the
    /// flusher decides when to call `dump_cursor`.
    pub async fn commit(&self) -> Result<(), DiskQueueError> {
        let mut inner = self.inner.lock().await;
        if let Some(next) = inner.pending_read_offset.take() {
            inner.read_offset = next;
        }
        self.inflights.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    /// Undo a `next()` that could not be flushed: the block will be
    /// re-read on the next `next()` call. The persisted cursor already
    /// did not include it, so there is nothing to touch on disk.
    pub async fn rollback(&self) -> Result<(), DiskQueueError> {
        let mut inner = self.inner.lock().await;
        inner.pending_read_offset = None;
        Ok(())
    }

    /// Persist the current read cursor to disk.
    pub async fn dump_cursor(&self) -> Result<(), DiskQueueError> {
        let inner = self.inner.lock().await;
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&0u64.to_be_bytes()); // segment_id, always 0: single-segment queue
        buf.extend_from_slice(&inner.read_offset.to_be_bytes());
        fs::write(&self.cursor_path, &buf).await?;
        Ok(())
    }

    /// Stop accepting reads/writes and force a final cursor dump.
    pub async fn close(&self) -> Result<(), DiskQueueError> {
        {
            let mut inner = self.inner.lock().await;
            inner.open = false;
        }
        self.dump_cursor().await
    }

    pub fn inflights(&self) -> u64 {
        self.inflights.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn segment_path(&self) -> &Path {
        &self.segment_path
    }
}

async fn read_cursor(path: &Path) -> Result<u64, DiskQueueError> {
    match fs::read(path).await {
        Ok(bytes) if bytes.len() >= 16 => Ok(u64::from_be_bytes(bytes[8..16].try_into().unwrap())),
        Ok(_) => Ok(0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Scan the segment from the start, discarding the trailing partial block
/// (if any) left by a write that was interrupted mid-frame, and return
/// the offset of the last complete block.
async fn discard_partial_trailing_block(segment: &mut File) -> Result<u64, DiskQueueError> {
    segment.seek(SeekFrom::Start(0)).await?;
    let mut offset = 0u64;
    loop {
        let mut len_buf = [0u8; 8];
        match segment.read_exact(&mut len_buf).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let key_len = u32::from_be_bytes(len_buf[0..4].try_into().unwrap()) as u64;
        let value_len = u32::from_be_bytes(len_buf[4..8].try_into().unwrap()) as u64;
        let body_len = key_len + value_len;

        let mut body = vec![0u8; body_len as usize];
        match segment.read_exact(&mut body).await {
            Ok(()) => {
                offset += 8 + body_len;
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }
    segment.set_len(offset).await?;
    segment.seek(SeekFrom::End(0)).await?;
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_next_roundtrips_a_block() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::open(dir.path()).await.unwrap();
        let block = Block {
            key: b"k1".to_vec(),
            value: b"v1".to_vec(),
        };
        queue.push(&block).await.unwrap();

        let read = queue.next().await.unwrap();
        assert_eq!(read, block);
        queue.commit().await.unwrap();

        assert!(matches!(queue.next().await, Err(DiskQueueError::Eoq)));
    }

    #[tokio::test]
    async fn rollback_redelivers_the_same_block() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::open(dir.path()).await.unwrap();
        let block = Block {
            key: b"k1".to_vec(),
            value: b"v1".to_vec(),
        };
        queue.push(&block).await.unwrap();

        let read = queue.next().await.unwrap();
        queue.rollback().await.unwrap();

        let read_again = queue.next().await.unwrap();
        assert_eq!(read, read_again);
    }

    #[tokio::test]
    async fn cursor_survives_reopen_after_dump() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = DiskQueue::open(dir.path()).await.unwrap();
            queue.push(&Block { key: b"a".to_vec(), value: b"1".to_vec() }).await.unwrap();
            queue.push(&Block { key: b"b".to_vec(), value: b"2".to_vec() }).await.unwrap();
            let _ = queue.next().await.unwrap();
            queue.commit().await.unwrap();
            queue.close().await.unwrap();
        }

        let queue = DiskQueue::open(dir.path()).await.unwrap();
        let remaining = queue.next().await.unwrap();
        assert_eq!(remaining.key, b"b".to_vec());
    }

    #[tokio::test]
    async fn inflights_tracks_pushes_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::open(dir.path()).await.unwrap();
        queue.push(&Block { key: b"a".to_vec(), value: b"1".to_vec() }).await.unwrap();
        assert_eq!(queue.inflights(), 1);
        let _ = queue.next().await.unwrap();
        queue.commit().await.unwrap();
        assert_eq!(queue.inflights(), 0);
    }

    #[tokio::test]
    async fn truncated_trailing_block_is_discarded_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = DiskQueue::open(dir.path()).await.unwrap();
            queue.push(&Block { key: b"a".to_vec(), value: b"1".to_vec() }).await.unwrap();
        }

        // Corrupt the tail: append a partial frame header with no body.
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(dir.path().join("segment.log"))
                .unwrap();
            f.write_all(&[0, 0, 0, 5, 0, 0, 0, 5]).unwrap();
        }

        let queue = DiskQueue::open(dir.path()).await.unwrap();
        let block = queue.next().await.unwrap();
        assert_eq!(block.key, b"a".to_vec());
        queue.commit().await.unwrap();
        assert!(matches!(queue.next().await, Err(DiskQueueError::Eoq)));
    }
}
