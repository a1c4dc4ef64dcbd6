// Copyright (c) James Kassemi, SC, US. All rights reserved.
use std::sync::Arc;

use core_types::{AppConfig, Backoff, Record};
use export_engine::Exporter;
use log::{error, warn};
use rotation_engine::{scheduler, RotationCoordinator};
use segment_store::{SegmentRole, SegmentStore};
use stream_writer::{StreamWriter, WriterError, WriterStats};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

const FEED_CHANNEL_DEPTH: usize = 1_024;

/// Everything one stream needs at runtime: the writer, its rotation
/// coordinator with a scheduler task, and the ingest task that moves
/// records from the feed channel into the writer. An upstream source
/// clones [`StreamPipeline::sender`] and submits parsed records.
pub struct StreamPipeline {
    stream: String,
    writer: Arc<StreamWriter>,
    sender: mpsc::Sender<Record>,
    ingest: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

impl StreamPipeline {
    pub async fn start(
        stream: &str,
        store: Arc<SegmentStore>,
        exporter: Arc<Exporter>,
        config: &AppConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let active = match store.handle(stream, SegmentRole::Active) {
            Some(handle) => handle,
            None => store.create_segment(stream, SegmentRole::Active)?,
        };
        let writer = Arc::new(StreamWriter::new(
            stream,
            active,
            config.writer.buffer_capacity,
            Backoff::new(config.writer.append_attempts, 50, 1_000, 0.2),
        ));
        let coordinator = Arc::new(RotationCoordinator::new(
            stream,
            store,
            writer.clone(),
            exporter,
            config.rotation.clone(),
        ));

        // A frozen segment surviving from a crashed cycle is exported
        // and dropped before the schedule starts; failure leaves it for
        // the next cycle to retry.
        if let Err(err) = coordinator.recover().await {
            error!("stream {stream}: startup recovery failed: {err}");
        }

        let (sender, mut receiver) = mpsc::channel::<Record>(FEED_CHANNEL_DEPTH);
        let ingest = {
            let writer = writer.clone();
            let stream = stream.to_string();
            tokio::spawn(async move {
                while let Some(record) = receiver.recv().await {
                    match writer.submit(record).await {
                        Ok(()) => {}
                        Err(err @ (WriterError::BufferOverflow { .. } | WriterError::Halted)) => {
                            error!("stream {stream}: ingest stopped: {err}");
                            return;
                        }
                        Err(err) => warn!("stream {stream}: submit failed: {err}"),
                    }
                }
            })
        };

        let scheduler = tokio::spawn(scheduler::run(
            coordinator,
            config.rotation.schedule_offset_s,
            shutdown,
        ));

        Ok(Self {
            stream: stream.to_string(),
            writer,
            sender,
            ingest,
            scheduler,
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn sender(&self) -> mpsc::Sender<Record> {
        self.sender.clone()
    }

    pub fn stats(&self) -> WriterStats {
        self.writer.stats()
    }

    pub fn writer(&self) -> Arc<StreamWriter> {
        self.writer.clone()
    }

    /// Drop the feed sender and wait for the ingest and scheduler tasks
    /// to finish. The shutdown watch channel must already be flipped.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = futures::future::join(self.ingest, self.scheduler).await;
    }
}
