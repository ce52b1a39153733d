// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable, capacity-bounded FIFO queue of enriched records.
//!
//! Records are persisted to an append-only JSON-lines log; each entry carries
//! a monotonic sequence number. A small state file records the highest
//! sequence removed from the head (committed after delivery, or evicted at
//! capacity). Replay on open keeps only entries above that sequence, so
//! commits survive crashes regardless of when compaction runs.
//!
//! Crash safety:
//! - `append` returns only after the entry is fsync'd; appended records are
//!   recoverable after an unclean termination.
//! - `commit` persists the state file before dropping records; a committed
//!   record never reappears.
//! - A torn tail (partial last line from an interrupted write) is detected on
//!   replay, logged, and truncated.
//!
//! Overflow policy: when an append would exceed capacity the *oldest* record
//! is evicted with a warning, matching the backpressure behavior of the rest
//! of the intake pipeline. Newest data wins.

use crate::errors::StorageError;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOG_FILE: &str = "queue.log";
const STATE_FILE: &str = "queue.state";

/// Number of dead (removed but still on disk) entries that triggers a
/// compaction rewrite of the log file.
const COMPACT_MIN_DEAD: u64 = 512;

/// Durable state sidecar: everything at or below `removed_seq` is gone.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    removed_seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    seq: u64,
    record: Record,
}

pub struct DurableQueue {
    log_path: PathBuf,
    state_path: PathBuf,
    writer: File,
    entries: VecDeque<Entry>,
    /// Highest sequence removed from the head (committed or evicted).
    removed_seq: u64,
    /// Sequence assigned to the next appended record.
    next_seq: u64,
    /// Entries currently present in the log file, live or dead.
    log_entries: u64,
    capacity: usize,
    /// Records evicted at capacity over this queue's lifetime.
    evicted: u64,
}

impl DurableQueue {
    /// Opens (or creates) the queue at `dir`, replaying any persisted
    /// records in insertion order.
    pub fn open(dir: &Path, capacity: usize) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let log_path = dir.join(LOG_FILE);
        let state_path = dir.join(STATE_FILE);

        let state = Self::read_state(&state_path)?;
        let (entries, max_seq, log_entries) =
            Self::replay(&log_path, state.removed_seq)?;

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let mut queue = Self {
            log_path,
            state_path,
            writer,
            next_seq: max_seq.max(state.removed_seq) + 1,
            entries,
            removed_seq: state.removed_seq,
            log_entries,
            capacity,
            evicted: 0,
        };

        // a crash between append and eviction can leave the log over capacity
        while queue.entries.len() > capacity {
            queue.evict_oldest()?;
        }
        queue.compact_if_needed()?;

        debug!(
            "Opened durable queue with {} pending records (capacity {})",
            queue.entries.len(),
            capacity
        );
        Ok(queue)
    }

    /// Current number of queued records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a record at the tail, durably. On success the record is
    /// recoverable even after an unclean process termination. If the append
    /// fills the queue past capacity, the oldest record is evicted.
    pub fn append(&mut self, record: Record) -> Result<(), StorageError> {
        let entry = Entry {
            seq: self.next_seq,
            record,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.sync_data()?;

        self.next_seq += 1;
        self.log_entries += 1;
        self.entries.push_back(entry);

        if self.entries.len() > self.capacity {
            self.evicted += 1;
            warn!(
                "Queue at capacity ({}), dropping oldest record ({} dropped so far)",
                self.capacity, self.evicted
            );
            self.evict_oldest()?;
        }
        self.compact_if_needed()
    }

    /// Number of records dropped at capacity over this queue's lifetime.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Returns up to `n` of the oldest records, in insertion order, without
    /// removing them.
    pub fn peek_batch(&self, n: usize) -> Vec<Record> {
        self.entries
            .iter()
            .take(n)
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Like [`DurableQueue::peek_batch`], but also returns the sequence
    /// number of the last peeked record. Passing that sequence to
    /// [`DurableQueue::commit_through`] after confirmed delivery removes
    /// exactly the peeked records, even if an eviction at capacity advanced
    /// the head while the batch was in flight.
    pub fn peek_batch_with_seq(&self, n: usize) -> (Vec<Record>, Option<u64>) {
        let records = self.peek_batch(n);
        let last_seq = records
            .len()
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|entry| entry.seq);
        (records, last_seq)
    }

    /// Removes the `n` oldest records after confirmed delivery. Returns the
    /// number actually removed. Callers that peeked before a possibly
    /// concurrent append should use [`DurableQueue::commit_through`]
    /// instead: counting from the head again here would shift onto
    /// undelivered records if an eviction removed part of their batch.
    pub fn commit(&mut self, n: usize) -> Result<usize, StorageError> {
        let n = n.min(self.entries.len());
        if n == 0 {
            return Ok(0);
        }
        let last_seq = self.entries[n - 1].seq;
        self.commit_through(last_seq)
    }

    /// Removes every record whose sequence is at or below `seq`. Records of
    /// the delivered batch that were already evicted from the head are
    /// skipped; records appended after the peek are never touched.
    pub fn commit_through(&mut self, seq: u64) -> Result<usize, StorageError> {
        let n = self
            .entries
            .iter()
            .take_while(|entry| entry.seq <= seq)
            .count();
        if n == 0 {
            return Ok(0);
        }
        // state goes to disk before the records leave memory, so a crash here
        // re-sends at worst and never resurrects a committed record
        let last_seq = self.entries[n - 1].seq;
        self.persist_state(last_seq)?;
        self.entries.drain(..n);
        self.compact_if_needed()?;
        Ok(n)
    }

    fn evict_oldest(&mut self) -> Result<(), StorageError> {
        if let Some(evicted) = self.entries.pop_front() {
            self.persist_state(evicted.seq)?;
        }
        Ok(())
    }

    fn persist_state(&mut self, removed_seq: u64) -> Result<(), StorageError> {
        let tmp = self.state_path.with_extension("state.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(serde_json::to_string(&QueueState { removed_seq })?.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.state_path)?;
        self.removed_seq = removed_seq;
        Ok(())
    }

    /// Rewrites the log with only the live entries once enough dead ones
    /// accumulate. Sequence numbers are retained, so the state sidecar stays
    /// valid whether or not the rename lands before a crash.
    fn compact_if_needed(&mut self) -> Result<(), StorageError> {
        let dead = self.log_entries - self.entries.len() as u64;
        if dead < COMPACT_MIN_DEAD {
            return Ok(());
        }
        let tmp = self.log_path.with_extension("log.tmp");
        {
            let mut file = File::create(&tmp)?;
            for entry in &self.entries {
                let mut line = serde_json::to_string(entry)?;
                line.push('\n');
                file.write_all(line.as_bytes())?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.log_path)?;
        self.writer = OpenOptions::new().append(true).open(&self.log_path)?;
        self.log_entries = self.entries.len() as u64;
        debug!("Compacted queue log, dropped {dead} dead entries");
        Ok(())
    }

    fn read_state(path: &Path) -> Result<QueueState, StorageError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| StorageError::Corrupt {
                    path: path.to_path_buf(),
                    reason: format!("unparsable state file: {e}"),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QueueState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replays the log, keeping entries above `removed_seq`. Returns the live
    /// entries, the highest sequence seen, and the total entry count on disk.
    fn replay(
        log_path: &Path,
        removed_seq: u64,
    ) -> Result<(VecDeque<Entry>, u64, u64), StorageError> {
        let bytes = match fs::read(log_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((VecDeque::new(), 0, 0))
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = VecDeque::new();
        let mut max_seq = 0u64;
        let mut total = 0u64;
        let mut pos = 0usize;

        while pos < bytes.len() {
            let line_end = match bytes[pos..].iter().position(|&b| b == b'\n') {
                Some(offset) => pos + offset,
                None => {
                    // unterminated tail from an interrupted write
                    warn!(
                        "Dropping torn tail of queue log ({} bytes)",
                        bytes.len() - pos
                    );
                    Self::truncate_log(log_path, pos as u64)?;
                    break;
                }
            };
            let line = &bytes[pos..line_end];
            if !line.is_empty() {
                match serde_json::from_slice::<Entry>(line) {
                    Ok(entry) => {
                        total += 1;
                        max_seq = max_seq.max(entry.seq);
                        if entry.seq > removed_seq {
                            entries.push_back(entry);
                        }
                    }
                    Err(e) => {
                        let rest = &bytes[line_end + 1..];
                        if rest.iter().all(|&b| b == b'\n') {
                            // torn final line; everything before it is intact
                            warn!("Dropping torn tail of queue log: {e}");
                            Self::truncate_log(log_path, pos as u64)?;
                            break;
                        }
                        return Err(StorageError::Corrupt {
                            path: log_path.to_path_buf(),
                            reason: format!("unparsable entry at byte {pos}: {e}"),
                        });
                    }
                }
            }
            pos = line_end + 1;
        }

        Ok((entries, max_seq, total))
    }

    fn truncate_log(log_path: &Path, len: u64) -> Result<(), StorageError> {
        let file = OpenOptions::new().write(true).open(log_path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn record(n: u64) -> Record {
        json!({"message": format!("msg-{n}"), "n": n})
            .as_object()
            .unwrap()
            .clone()
    }

    fn messages(records: &[Record]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.get("message").unwrap().as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_append_and_peek_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = DurableQueue::open(dir.path(), 100).unwrap();
        for n in 0..5 {
            queue.append(record(n)).unwrap();
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(
            messages(&queue.peek_batch(5)),
            vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]
        );
        // peek is non-destructive
        assert_eq!(queue.len(), 5);
        assert_eq!(messages(&queue.peek_batch(2)), vec!["msg-0", "msg-1"]);
    }

    #[test]
    fn test_commit_removes_exactly_the_peeked_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = DurableQueue::open(dir.path(), 100).unwrap();
        for n in 0..5 {
            queue.append(record(n)).unwrap();
        }
        let batch = queue.peek_batch(2);
        assert_eq!(queue.commit(batch.len()).unwrap(), 2);
        assert_eq!(queue.len(), 3);
        assert_eq!(
            messages(&queue.peek_batch(3)),
            vec!["msg-2", "msg-3", "msg-4"]
        );
    }

    #[test]
    fn test_commit_more_than_queued_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = DurableQueue::open(dir.path(), 100).unwrap();
        queue.append(record(1)).unwrap();
        assert_eq!(queue.commit(10).unwrap(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.commit(1).unwrap(), 0);
    }

    #[traced_test]
    #[test]
    fn test_capacity_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = DurableQueue::open(dir.path(), 3).unwrap();
        for n in 0..5 {
            queue.append(record(n)).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(
            messages(&queue.peek_batch(3)),
            vec!["msg-2", "msg-3", "msg-4"]
        );
        assert_eq!(queue.evicted(), 2);
        assert!(logs_contain("Queue at capacity"));
        assert!(logs_contain("2 dropped so far"));
    }

    #[test]
    fn test_commit_through_skips_records_evicted_mid_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = DurableQueue::open(dir.path(), 3).unwrap();
        for n in 0..3 {
            queue.append(record(n)).unwrap();
        }
        // a delivery of [msg-0, msg-1] starts
        let (batch, last_seq) = queue.peek_batch_with_seq(2);
        assert_eq!(messages(&batch), vec!["msg-0", "msg-1"]);

        // while it is in flight, an at-capacity append evicts msg-0
        queue.append(record(3)).unwrap();
        assert_eq!(
            messages(&queue.peek_batch(3)),
            vec!["msg-1", "msg-2", "msg-3"]
        );

        // the delivery confirmation must only remove what was delivered:
        // msg-0 is already gone, msg-2 and msg-3 were never sent
        assert_eq!(queue.commit_through(last_seq.unwrap()).unwrap(), 1);
        assert_eq!(messages(&queue.peek_batch(2)), vec!["msg-2", "msg-3"]);
    }

    #[test]
    fn test_commit_through_fully_evicted_batch_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = DurableQueue::open(dir.path(), 2).unwrap();
        for n in 0..2 {
            queue.append(record(n)).unwrap();
        }
        let (_, last_seq) = queue.peek_batch_with_seq(2);
        // both peeked records get evicted before the confirmation arrives
        for n in 2..4 {
            queue.append(record(n)).unwrap();
        }
        assert_eq!(queue.commit_through(last_seq.unwrap()).unwrap(), 0);
        assert_eq!(messages(&queue.peek_batch(2)), vec!["msg-2", "msg-3"]);
    }

    #[test]
    fn test_peek_batch_with_seq_on_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), 10).unwrap();
        let (records, last_seq) = queue.peek_batch_with_seq(5);
        assert!(records.is_empty());
        assert_eq!(last_seq, None);
    }

    #[test]
    fn test_restart_recovers_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut queue = DurableQueue::open(dir.path(), 100).unwrap();
            for n in 0..4 {
                queue.append(record(n)).unwrap();
            }
        }
        let queue = DurableQueue::open(dir.path(), 100).unwrap();
        assert_eq!(queue.len(), 4);
        assert_eq!(
            messages(&queue.peek_batch(4)),
            vec!["msg-0", "msg-1", "msg-2", "msg-3"]
        );
    }

    #[test]
    fn test_committed_records_never_reappear() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut queue = DurableQueue::open(dir.path(), 100).unwrap();
            for n in 0..4 {
                queue.append(record(n)).unwrap();
            }
            queue.commit(2).unwrap();
        }
        let queue = DurableQueue::open(dir.path(), 100).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(messages(&queue.peek_batch(2)), vec!["msg-2", "msg-3"]);
    }

    #[test]
    fn test_eviction_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut queue = DurableQueue::open(dir.path(), 2).unwrap();
            for n in 0..3 {
                queue.append(record(n)).unwrap();
            }
        }
        let queue = DurableQueue::open(dir.path(), 2).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(messages(&queue.peek_batch(2)), vec!["msg-1", "msg-2"]);
    }

    #[test]
    fn test_torn_tail_is_dropped_and_log_stays_usable() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut queue = DurableQueue::open(dir.path(), 100).unwrap();
            for n in 0..3 {
                queue.append(record(n)).unwrap();
            }
        }
        // simulate a crash mid-write: partial, unterminated entry at the tail
        let log = dir.path().join(LOG_FILE);
        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(b"{\"seq\":99,\"reco").unwrap();
        drop(file);

        {
            let mut queue = DurableQueue::open(dir.path(), 100).unwrap();
            assert_eq!(queue.len(), 3);
            queue.append(record(3)).unwrap();
        }
        let queue = DurableQueue::open(dir.path(), 100).unwrap();
        assert_eq!(queue.len(), 4);
        assert_eq!(
            messages(&queue.peek_batch(4)),
            vec!["msg-0", "msg-1", "msg-2", "msg-3"]
        );
    }

    #[test]
    fn test_garbage_mid_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(
            dir.path().join(LOG_FILE),
            b"not json\n{\"seq\":1,\"record\":{}}\n",
        )
        .unwrap();
        let result = DurableQueue::open(dir.path(), 100);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn test_compaction_preserves_pending_records() {
        let dir = tempfile::tempdir().unwrap();
        let total = COMPACT_MIN_DEAD + 8;
        {
            let mut queue = DurableQueue::open(dir.path(), 10_000).unwrap();
            for n in 0..total {
                queue.append(record(n)).unwrap();
            }
            queue.commit(COMPACT_MIN_DEAD as usize + 3).unwrap();
            assert_eq!(queue.len(), 5);
        }
        // the log was rewritten with only the live entries
        let contents = fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        assert_eq!(contents.lines().count(), 5);

        let queue = DurableQueue::open(dir.path(), 10_000).unwrap();
        assert_eq!(queue.len(), 5);
        let expected: Vec<String> = (total - 5..total).map(|n| format!("msg-{n}")).collect();
        assert_eq!(messages(&queue.peek_batch(5)), expected);
    }
}
