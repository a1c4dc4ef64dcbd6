use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use core_types::{Backoff, Record, RecordKind};
use log::{debug, info, warn};
use parking_lot::Mutex;
use segment_store::{SegmentError, SegmentHandle};

use crate::error::{Result, WriterError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterMode {
    /// Appending directly to the active segment.
    Normal,
    /// Rotation in flight; submissions queue in arrival order.
    Buffering,
    /// Replaying the queue into the replacement segment.
    Draining,
    /// Fatal state after buffer overflow or operator halt.
    Halted,
}

/// Point-in-time view of a writer, for status reporting and tests.
#[derive(Debug, Clone)]
pub struct WriterStats {
    pub mode: WriterMode,
    pub appended: u64,
    pub drained: u64,
    pub buffered: usize,
    pub buffered_peak: u64,
    pub errors: u64,
    /// Accepted records by kind, indexed by wire code minus one.
    pub kind_counts: [u64; 4],
}

impl WriterStats {
    pub fn kind_count(&self, kind: RecordKind) -> u64 {
        self.kind_counts[kind.code() as usize - 1]
    }

    pub fn dead_letters(&self) -> u64 {
        self.kind_count(RecordKind::DeadLetter)
    }
}

struct WriterState {
    mode: WriterMode,
    active: Option<SegmentHandle>,
    buffer: VecDeque<Record>,
}

impl WriterState {
    fn enqueue(&mut self, stream: &str, capacity: usize, record: Record) -> Result<()> {
        if self.buffer.len() >= capacity {
            self.mode = WriterMode::Halted;
            warn!("writer {stream}: buffer overflow at {capacity}, halting");
            return Err(WriterError::BufferOverflow { capacity });
        }
        self.buffer.push_back(record);
        Ok(())
    }
}

/// Ingest-side writer for one stream.
pub struct StreamWriter {
    stream: String,
    state: Mutex<WriterState>,
    buffer_capacity: usize,
    retry: Backoff,
    appended: AtomicU64,
    drained: AtomicU64,
    buffered_peak: AtomicU64,
    errors: AtomicU64,
    kind_counts: [AtomicU64; 4],
}

impl StreamWriter {
    pub fn new(
        stream: impl Into<String>,
        active: SegmentHandle,
        buffer_capacity: usize,
        retry: Backoff,
    ) -> Self {
        Self {
            stream: stream.into(),
            state: Mutex::new(WriterState {
                mode: WriterMode::Normal,
                active: Some(active),
                buffer: VecDeque::new(),
            }),
            buffer_capacity: buffer_capacity.max(1),
            retry,
            appended: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            buffered_peak: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            kind_counts: Default::default(),
        }
    }

    fn count_kind(&self, kind: RecordKind) {
        self.kind_counts[kind.code() as usize - 1].fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn mode(&self) -> WriterMode {
        self.state.lock().mode
    }

    pub fn stats(&self) -> WriterStats {
        let state = self.state.lock();
        WriterStats {
            mode: state.mode,
            appended: self.appended.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            buffered: state.buffer.len(),
            buffered_peak: self.buffered_peak.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            kind_counts: [
                self.kind_counts[0].load(Ordering::Relaxed),
                self.kind_counts[1].load(Ordering::Relaxed),
                self.kind_counts[2].load(Ordering::Relaxed),
                self.kind_counts[3].load(Ordering::Relaxed),
            ],
        }
    }

    fn enqueue(&self, state: &mut WriterState, record: Record) -> Result<()> {
        let kind = record.kind;
        if let Err(err) = state.enqueue(&self.stream, self.buffer_capacity, record) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }
        self.count_kind(kind);
        self.buffered_peak
            .fetch_max(state.buffer.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Submit one record. In normal operation this appends to the active
    /// segment with bounded retries on transient io errors. While a
    /// rotation is in flight the record queues instead; a stale segment
    /// handle discovered mid-append re-routes to the queue the same way.
    pub async fn submit(&self, record: Record) -> Result<()> {
        let handle = {
            let mut state = self.state.lock();
            match state.mode {
                WriterMode::Halted => return Err(WriterError::Halted),
                WriterMode::Buffering | WriterMode::Draining => {
                    return self.enqueue(&mut state, record);
                }
                WriterMode::Normal => match state.active.clone() {
                    Some(handle) => handle,
                    None => {
                        state.mode = WriterMode::Buffering;
                        return self.enqueue(&mut state, record);
                    }
                },
            }
        };

        let result = self
            .retry
            .run(
                || async { handle.append(&record) },
                SegmentError::is_transient,
            )
            .await;
        match result {
            Ok(()) => {
                self.count_kind(record.kind);
                self.appended.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SegmentError::SegmentNotFound { .. }) => {
                // The segment rotated out from under us before the
                // coordinator's buffering request arrived.
                let mut state = self.state.lock();
                if state.mode == WriterMode::Normal {
                    debug!("writer {}: active segment rotated, buffering", self.stream);
                    state.mode = WriterMode::Buffering;
                }
                match state.mode {
                    WriterMode::Halted => Err(WriterError::Halted),
                    _ => self.enqueue(&mut state, record),
                }
            }
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(err.into())
            }
        }
    }

    /// Rotation handshake, step one: stop appending and queue instead.
    /// Returning is the acknowledgement the coordinator waits on.
    pub fn begin_buffering(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.mode == WriterMode::Halted {
            return Err(WriterError::Halted);
        }
        state.mode = WriterMode::Buffering;
        debug!("writer {}: buffering for rotation", self.stream);
        Ok(())
    }

    /// Rotation handshake, step two: adopt the replacement segment and
    /// drain the queue into it front-first. Submissions that arrive while
    /// draining join the back of the same queue, preserving order.
    /// Returns the number of records drained.
    pub async fn install_active(&self, handle: SegmentHandle) -> Result<u64> {
        {
            let mut state = self.state.lock();
            if state.mode == WriterMode::Halted {
                return Err(WriterError::Halted);
            }
            state.mode = WriterMode::Draining;
            state.active = Some(handle.clone());
        }

        let mut drained = 0u64;
        loop {
            let record = {
                let mut state = self.state.lock();
                match state.buffer.pop_front() {
                    Some(record) => record,
                    None => {
                        // A newer rotation may have signaled buffering
                        // while this drain was finishing; leave its mode
                        // alone in that case.
                        if state.mode == WriterMode::Draining {
                            state.mode = WriterMode::Normal;
                        }
                        break;
                    }
                }
            };
            let result = self
                .retry
                .run(
                    || async { handle.append(&record) },
                    SegmentError::is_transient,
                )
                .await;
            if let Err(err) = result {
                // Put the record back at the front and keep queueing so
                // the coordinator can retry the drain.
                let mut state = self.state.lock();
                state.buffer.push_front(record);
                state.mode = WriterMode::Buffering;
                self.errors.fetch_add(1, Ordering::Relaxed);
                return Err(err.into());
            }
            drained += 1;
        }

        self.drained.fetch_add(drained, Ordering::Relaxed);
        self.appended.fetch_add(drained, Ordering::Relaxed);
        info!("writer {}: drained {} buffered records", self.stream, drained);
        Ok(drained)
    }

    /// Operator stop. Queued records stay in memory for inspection but
    /// no further submissions are accepted.
    pub fn halt(&self) {
        let mut state = self.state.lock();
        state.mode = WriterMode::Halted;
        warn!("writer {}: halted", self.stream);
    }
}
