// Copyright (c) James Kassemi, SC, US. All rights reserved.
use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use core_types::{Backoff, HourPeriod, RotationConfig};
use export_engine::{ExportArtifact, Exporter};
use log::{error, info, warn};
use parking_lot::Mutex;
use segment_store::{SegmentHandle, SegmentRole, SegmentStore};
use stream_writer::StreamWriter;
use tokio::{task, time::timeout};

use crate::error::{Result, RotationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Signaled,
    Swapped,
    Flushed,
    Exported,
    Cleaned,
}

/// The one in-flight rotation cycle for a stream. Absence of a ticket
/// is the idle state.
#[derive(Debug, Clone, Copy)]
pub struct RotationTicket {
    pub cycle_start: DateTime<Utc>,
    pub period: HourPeriod,
    pub status: TicketStatus,
}

#[derive(Debug)]
pub enum RotationOutcome {
    Completed {
        /// `None` when the closing hour had no records; the empty frozen
        /// segment is dropped without producing an artifact.
        artifact: Option<ExportArtifact>,
        drained: u64,
    },
    /// A ticket was already open; the trigger was ignored.
    AlreadyInFlight,
}

/// Drives the per-stream rotation cycle:
/// signal writers to buffer, swap the active segment out, drain the
/// buffer into the replacement, export the frozen segment, drop it.
pub struct RotationCoordinator {
    stream: String,
    store: Arc<SegmentStore>,
    writer: Arc<StreamWriter>,
    exporter: Arc<Exporter>,
    cfg: RotationConfig,
    export_retry: Backoff,
    ticket: Mutex<Option<RotationTicket>>,
}

impl RotationCoordinator {
    pub fn new(
        stream: impl Into<String>,
        store: Arc<SegmentStore>,
        writer: Arc<StreamWriter>,
        exporter: Arc<Exporter>,
        cfg: RotationConfig,
    ) -> Self {
        let export_retry = Backoff::new(cfg.export_attempts, 250, 5_000, 0.2);
        Self {
            stream: stream.into(),
            store,
            writer,
            exporter,
            cfg,
            export_retry,
            ticket: Mutex::new(None),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn ticket(&self) -> Option<RotationTicket> {
        *self.ticket.lock()
    }

    fn try_open_ticket(&self, period: HourPeriod) -> bool {
        let mut ticket = self.ticket.lock();
        if ticket.is_some() {
            return false;
        }
        *ticket = Some(RotationTicket {
            cycle_start: Utc::now(),
            period,
            status: TicketStatus::Signaled,
        });
        true
    }

    fn set_status(&self, status: TicketStatus) {
        if let Some(ticket) = self.ticket.lock().as_mut() {
            ticket.status = status;
        }
    }

    fn close_ticket(&self) {
        *self.ticket.lock() = None;
    }

    /// Export and drop a frozen segment left behind by an earlier cycle
    /// that failed after the swap. Idempotent through the export log.
    /// Returns the artifact if a non-empty leftover was found.
    pub async fn recover(&self) -> Result<Option<ExportArtifact>> {
        let Some(frozen) = self.store.handle(&self.stream, SegmentRole::Frozen) else {
            return Ok(None);
        };
        warn!(
            "stream {}: recovering leftover frozen segment {}",
            self.stream,
            frozen.id()
        );
        let artifact = self.export_frozen(&frozen, None).await?;
        self.store.drop_segment(&frozen)?;
        Ok(artifact)
    }

    /// Run one rotation cycle for `period`, the hour being closed out.
    /// A no-op returning [`RotationOutcome::AlreadyInFlight`] when a
    /// ticket is already open. The whole cycle runs under the
    /// configured deadline; past it the cycle is stalled and the frozen
    /// segment is left in place for recovery.
    pub async fn rotate_now(&self, period: HourPeriod) -> Result<RotationOutcome> {
        if !self.try_open_ticket(period) {
            warn!(
                "stream {}: rotation trigger ignored, cycle already open",
                self.stream
            );
            return Ok(RotationOutcome::AlreadyInFlight);
        }
        info!(
            "stream {}: rotation cycle opened for {}",
            self.stream,
            period.file_stamp()
        );

        let deadline = Duration::from_secs(self.cfg.cycle_deadline_s);
        let result = match timeout(deadline, self.run_cycle(period)).await {
            Ok(result) => result,
            Err(_) => Err(RotationError::Stalled {
                stream: self.stream.clone(),
            }),
        };
        self.close_ticket();
        match &result {
            Ok(RotationOutcome::Completed { artifact, drained }) => info!(
                "stream {}: rotation complete, drained {}, artifact {:?}",
                self.stream,
                drained,
                artifact.as_ref().map(|a| a.file_path.clone())
            ),
            Ok(RotationOutcome::AlreadyInFlight) => {}
            Err(err) => error!("stream {}: rotation cycle failed: {}", self.stream, err),
        }
        result
    }

    async fn run_cycle(&self, period: HourPeriod) -> Result<RotationOutcome> {
        // A leftover frozen segment from a failed cycle blocks the swap;
        // clear it first.
        if let Some(frozen) = self.store.handle(&self.stream, SegmentRole::Frozen) {
            warn!(
                "stream {}: clearing leftover frozen segment {} before swap",
                self.stream,
                frozen.id()
            );
            self.export_frozen(&frozen, None).await?;
            self.store.drop_segment(&frozen)?;
        }

        // begin_buffering is a synchronous in-process call today, so the
        // ack resolves immediately and the timeout cannot fire; it keeps
        // the wait bounded if the handshake ever moves onto a channel.
        let ack_timeout = Duration::from_millis(self.cfg.ack_timeout_ms);
        timeout(ack_timeout, async { self.writer.begin_buffering() })
            .await
            .map_err(|_| RotationError::AckTimeout {
                stream: self.stream.clone(),
            })??;
        self.set_status(TicketStatus::Signaled);

        let frozen = self
            .store
            .rename(&self.stream, SegmentRole::Active, SegmentRole::Frozen)?;
        let new_active = self.store.create_segment(&self.stream, SegmentRole::Active)?;
        self.set_status(TicketStatus::Swapped);

        // The drain runs on its own task so a timeout (or a cancelled
        // cycle) never drops a record the drain has already taken off
        // the queue; the task keeps draining into the new active
        // segment while the cycle gives up.
        let drain_timeout = Duration::from_millis(self.cfg.drain_timeout_ms);
        let drain = {
            let writer = self.writer.clone();
            tokio::spawn(async move { writer.install_active(new_active).await })
        };
        let drained = match timeout(drain_timeout, drain).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => return Err(RotationError::DrainTask(join_err.to_string())),
            Err(_) => {
                return Err(RotationError::DrainTimeout {
                    stream: self.stream.clone(),
                })
            }
        };
        self.set_status(TicketStatus::Flushed);

        let artifact = self.export_frozen(&frozen, Some(period)).await?;
        self.set_status(TicketStatus::Exported);

        self.store.drop_segment(&frozen)?;
        self.set_status(TicketStatus::Cleaned);

        Ok(RotationOutcome::Completed { artifact, drained })
    }

    /// Export a frozen segment with bounded attempts, each under the
    /// export timeout. An empty segment yields no artifact. When no
    /// period is given (recovery of a leftover) it is derived from the
    /// first record's timestamp.
    async fn export_frozen(
        &self,
        frozen: &SegmentHandle,
        period: Option<HourPeriod>,
    ) -> Result<Option<ExportArtifact>> {
        if frozen.row_count() == 0 {
            info!(
                "stream {}: frozen segment {} is empty, no artifact",
                self.stream,
                frozen.id()
            );
            return Ok(None);
        }
        let period = match period {
            Some(period) => period,
            None => {
                let records = frozen.scan()?;
                let first_ts = records.first().map(|r| r.ts_ns).unwrap_or_default();
                HourPeriod::containing(first_ts)
            }
        };

        let export_timeout = Duration::from_millis(self.cfg.export_timeout_ms);
        let artifact = self
            .export_retry
            .run(
                || {
                    let exporter = self.exporter.clone();
                    let handle = frozen.clone();
                    let stream = self.stream.clone();
                    async move {
                        let task = task::spawn_blocking(move || exporter.export(&handle, &period));
                        match timeout(export_timeout, task).await {
                            Ok(Ok(result)) => result.map_err(RotationError::Export),
                            Ok(Err(join_err)) => {
                                Err(RotationError::ExportTask(join_err.to_string()))
                            }
                            Err(_) => Err(RotationError::ExportTimeout { stream }),
                        }
                    }
                },
                RotationError::export_retryable,
            )
            .await?;
        Ok(Some(artifact))
    }
}
