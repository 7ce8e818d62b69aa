//! Database instance: WAL-backed write path, background flusher, flush and
//! truncation, and startup recovery.

use crate::layout;
use burrow_common::{BurrowError, Config, Result};
use burrow_tree::{Tree, WriteTx};
use burrow_wal::{
    encode_frame, replace_contents, FrameError, FrameReader, Operation, OperationBuffer, WalFile,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// An open BurrowDB instance.
///
/// Cheap to clone; all clones share one underlying store. Writes are
/// acknowledged once their frame is in the WAL file and their operation is
/// in the in-memory buffer; a background task periodically drains the buffer
/// into the partition store and truncates the WAL.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

pub(crate) struct DatabaseInner {
    tree: Tree,
    config: Config,
    wal_path: PathBuf,
    wal: tokio::sync::Mutex<WalFile>,
    buffer: Mutex<OperationBuffer>,
    flush_tx: mpsc::Sender<()>,
    close_tx: Mutex<Option<oneshot::Sender<()>>>,
    flusher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Database {
    /// Opens a database with the default configuration.
    pub async fn open(path: impl AsRef<Path>) -> Result<Database> {
        Self::open_with_config(path, Config::default()).await
    }

    /// Opens a database with the given configuration.
    ///
    /// Unset config fields are defaulted first, then the whole configuration
    /// is validated once. Any WAL left by a previous session is replayed
    /// into the partition store before the instance accepts writes.
    pub async fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<Database> {
        let path = path.as_ref();
        let config = config.resolved(path);
        config.validate()?;
        let wal_path = config.wal_path.clone().ok_or(BurrowError::ConfigInvalid {
            field: "wal_path",
            value: String::new(),
            reason: "cannot be empty",
        })?;

        let tree = Tree::open(path)?;
        replay_wal(&tree, &wal_path)?;
        let wal = WalFile::open_append(&wal_path, config.sync_on_write).await?;

        let (flush_tx, flush_rx) = mpsc::channel(config.flush_channel_size);
        let (close_tx, close_rx) = oneshot::channel();
        let interval = config.wal_flush_interval;

        let inner = Arc::new(DatabaseInner {
            tree,
            config,
            wal_path,
            wal: tokio::sync::Mutex::new(wal),
            buffer: Mutex::new(OperationBuffer::new()),
            flush_tx,
            close_tx: Mutex::new(Some(close_tx)),
            flusher: Mutex::new(None),
        });

        let handle = tokio::spawn(run_flusher(
            Arc::downgrade(&inner),
            flush_rx,
            close_rx,
            interval,
        ));
        *inner.flusher.lock() = Some(handle);

        Ok(Database { inner })
    }

    /// Returns the WAL file path.
    pub fn wal_path(&self) -> &Path {
        &self.inner.wal_path
    }

    /// Drains the operation buffer into the partition store and truncates
    /// the WAL. Failures are logged; the operations stay buffered and logged
    /// for the next attempt.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Shuts the instance down: stops the flusher, runs a final flush, and
    /// closes the WAL and the partition store. Best-effort; the first error
    /// encountered is returned after the remaining steps run.
    pub async fn close(&self) -> Result<()> {
        if let Some(close_tx) = self.inner.close_tx.lock().take() {
            let _ = close_tx.send(());
        }
        let handle = self.inner.flusher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("flusher task failed: {}", e);
            }
        }

        self.inner.flush().await;

        let mut first_error = None;
        {
            let mut wal = self.inner.wal.lock().await;
            if let Err(e) = wal.close().await {
                tracing::error!("error closing WAL: {}", e);
                first_error = Some(e);
            }
        }
        if let Err(e) = self.inner.tree.persist() {
            tracing::error!("error closing partition store: {}", e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.inner.tree
    }

    /// Checks the buffer for a pending operation on `(partition, key)`.
    pub(crate) fn buffered_operation(&self, partition: &[u8], key: &str) -> Option<Operation> {
        self.inner.buffer.lock().get(partition, key).cloned()
    }

    pub(crate) async fn write_operation(
        &self,
        ctx: &CancellationToken,
        op: Operation,
    ) -> Result<()> {
        self.inner.write_operations(ctx, vec![op]).await
    }

    pub(crate) async fn write_operations(
        &self,
        ctx: &CancellationToken,
        ops: Vec<Operation>,
    ) -> Result<()> {
        self.inner.write_operations(ctx, ops).await
    }
}

impl DatabaseInner {
    /// Appends the operations to the WAL and inserts them into the buffer.
    ///
    /// The WAL append happens before the buffer insert, so a crash between
    /// the two is recovered by replay. If a flush drains the buffer in that
    /// window, the appended frames may be truncated under the old epoch
    /// before the operations are applied; the writer then re-stamps them
    /// with the new epoch and relogs. Replay tolerates the duplicate frames
    /// because applying an operation twice converges to the same state.
    async fn write_operations(&self, ctx: &CancellationToken, mut ops: Vec<Operation>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        loop {
            let epoch = self.buffer.lock().epoch();
            for op in &mut ops {
                op.epoch = epoch;
            }

            let mut batch = Vec::new();
            let mut frame_lens = Vec::with_capacity(ops.len());
            for op in &ops {
                let frame = encode_frame(op)?;
                frame_lens.push(frame.len());
                batch.extend_from_slice(&frame);
            }

            if ctx.is_cancelled() {
                return Err(BurrowError::Cancelled);
            }

            {
                let mut wal = self.wal.lock().await;
                wal.append(&batch).await?;
            }

            let should_flush = {
                let mut buffer = self.buffer.lock();
                if buffer.epoch() != epoch {
                    continue;
                }
                for (op, frame_len) in ops.into_iter().zip(frame_lens) {
                    buffer.insert(op, frame_len);
                }
                buffer.bytes() >= self.config.max_buffer_bytes
            };
            if should_flush {
                let _ = self.flush_tx.try_send(());
            }
            return Ok(());
        }
    }

    /// Applies the buffered operations to the partition store in one write
    /// transaction, then truncates the WAL at the drained epoch.
    async fn flush(&self) {
        let (snapshot, epoch) = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return;
            }
            buffer.drain()
        };
        let operation_count = snapshot.len();

        let result = {
            let mut tx = self.tree.begin_write();
            for buffered in &snapshot {
                apply_operation(&mut tx, &buffered.operation);
            }
            tx.commit()
        };

        match result {
            Ok(()) => self.truncate_wal(epoch).await,
            Err(e) => {
                let flush_error = BurrowError::Flush {
                    operation_count,
                    source: Box::new(e),
                };
                tracing::error!("{}; operations remain buffered for retry", flush_error);
                self.buffer.lock().restore(snapshot);
            }
        }
    }

    /// Rewrites the WAL keeping only frames with epoch > `committed_epoch`.
    ///
    /// Runs entirely under the WAL mutex, so no append can interleave with
    /// the rewrite. Frames with a bad checksum are dropped with a warning;
    /// an undecodable frame ends the scan and everything after it is
    /// dropped. Failures leave the WAL reopened for append with whatever
    /// contents survived.
    async fn truncate_wal(&self, committed_epoch: u64) {
        let mut wal = self.wal.lock().await;
        if let Err(e) = wal.close().await {
            tracing::error!("error closing WAL for truncation: {}", e);
            return;
        }

        let data = match std::fs::read(&self.wal_path) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("error reading WAL for truncation: {}", e);
                if let Err(e) = wal.reopen_append().await {
                    tracing::error!("error reopening WAL: {}", e);
                }
                return;
            }
        };

        let mut retained = Vec::new();
        let mut reader = FrameReader::new(&data);
        loop {
            match reader.next_frame() {
                None => break,
                Some(Ok((op, range))) => {
                    if op.epoch > committed_epoch {
                        retained.extend_from_slice(&data[range]);
                    }
                }
                Some(Err(FrameError::ChecksumMismatch { index, .. })) => {
                    tracing::warn!("WAL checksum mismatch at operation {} during truncation", index);
                }
                Some(Err(FrameError::Undecodable { index, .. })) => {
                    tracing::error!("undecodable WAL frame at operation {} during truncation", index);
                    break;
                }
            }
        }

        if let Err(e) = replace_contents(&self.wal_path, &retained) {
            tracing::error!("error writing truncated WAL: {}", e);
        }
        if let Err(e) = wal.reopen_append().await {
            tracing::error!("error reopening WAL after truncation: {}", e);
        }
    }
}

/// Background flusher: flushes on the periodic tick and on the flush
/// channel, resetting the timer after a channel-driven flush so the interval
/// measures from the last flush. Exits on the close signal, when the signal
/// channel closes, or when the database has been dropped.
async fn run_flusher(
    db: Weak<DatabaseInner>,
    mut flush_rx: mpsc::Receiver<()>,
    mut close_rx: oneshot::Receiver<()>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(db) = db.upgrade() else { break };
                db.flush().await;
            }
            signal = flush_rx.recv() => {
                match signal {
                    Some(()) => {
                        let Some(db) = db.upgrade() else { break };
                        db.flush().await;
                        ticker.reset();
                    }
                    None => break,
                }
            }
            _ = &mut close_rx => break,
        }
    }
}

/// Applies one operation to an open write transaction: the base put or
/// delete, then each index delta.
pub(crate) fn apply_operation(tx: &mut WriteTx<'_>, op: &Operation) {
    tx.create_partition(&op.partition);
    if op.is_put {
        tx.put(&op.partition, op.key.as_bytes(), &op.value);
    } else {
        tx.delete(&op.partition, op.key.as_bytes());
    }

    for index_op in &op.index_ops {
        let partition = layout::index_partition_name(&op.partition, &index_op.index);
        if !index_op.old_value.is_empty() {
            tx.create_partition(&partition);
            tx.delete(
                &partition,
                &layout::composite_key(&index_op.old_value, &op.key),
            );
        }
        if !index_op.new_value.is_empty() {
            tx.create_partition(&partition);
            tx.put(
                &partition,
                &layout::composite_key(&index_op.new_value, &op.key),
                b"",
            );
        }
    }
}

/// Replays the WAL into the partition store on startup.
///
/// Frames are verified one by one; the first undecodable or checksum-failing
/// frame ends the replay and the WAL is discarded — the partition store is
/// consistent without it, at the cost of the un-flushed tail. Each verified
/// operation is applied in its own write transaction. After a complete
/// replay the WAL is deleted.
fn replay_wal(tree: &Tree, wal_path: &Path) -> Result<()> {
    let data = match std::fs::read(wal_path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(BurrowError::FileSystem {
                path: wal_path.to_path_buf(),
                operation: "open",
                source: e,
            });
        }
    };

    let mut reader = FrameReader::new(&data);
    let mut operation_index = 0usize;
    loop {
        match reader.next_frame() {
            None => break,
            Some(Err(e)) => {
                tracing::warn!(
                    "discarding WAL after corruption at operation {}: {}",
                    e.index(),
                    BurrowError::from(e)
                );
                remove_wal(wal_path);
                return Ok(());
            }
            Some(Ok((op, _))) => {
                let mut tx = tree.begin_write();
                apply_operation(&mut tx, &op);
                tx.commit()
                    .map_err(|e| e.into_replay(wal_path.to_path_buf(), operation_index))?;
            }
        }
        operation_index += 1;
    }

    remove_wal(wal_path);
    Ok(())
}

fn remove_wal(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::error!("error removing WAL at {}: {}", path.display(), e);
        }
    }
}
