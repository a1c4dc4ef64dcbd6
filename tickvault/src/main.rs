// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Tickvault runtime: per-stream ingestion into rotating segments with
//! hourly parquet export.

mod pipeline;

use std::{sync::Arc, time::Duration};

use core_types::AppConfig;
use export_engine::Exporter;
use pipeline::StreamPipeline;
use segment_store::SegmentStore;
use tokio::sync::watch;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let config = AppConfig::load().unwrap_or_else(|err| {
        log::warn!("config load failed ({err}), using defaults");
        AppConfig::default()
    });

    let store = Arc::new(SegmentStore::open(&config.data_dir)?);
    let exporter = Arc::new(Exporter::new(
        &config.export_dir,
        config.export.full_verify,
    )?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut pipelines = Vec::new();
    for stream in &config.streams {
        let pipeline = StreamPipeline::start(
            stream,
            store.clone(),
            exporter.clone(),
            &config,
            shutdown_rx.clone(),
        )
        .await?;
        pipelines.push(pipeline);
    }
    println!(
        "tickvault up: {} streams, data {:?}, exports {:?}",
        pipelines.len(),
        config.data_dir,
        config.export_dir
    );

    let status = {
        let mut shutdown = shutdown_rx.clone();
        let writers: Vec<_> = pipelines
            .iter()
            .map(|p| (p.stream().to_string(), p.writer()))
            .collect();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(STATUS_INTERVAL) => {
                        for (stream, writer) in &writers {
                            let s = writer.stats();
                            println!(
                                "status {stream}: mode={:?} appended={} buffered={} peak={} t={} d={} dp={} dl={} errors={}",
                                s.mode,
                                s.appended,
                                s.buffered,
                                s.buffered_peak,
                                s.kind_counts[0],
                                s.kind_counts[1],
                                s.kind_counts[2],
                                s.kind_counts[3],
                                s.errors
                            );
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    println!("tickvault shutting down");
    let _ = shutdown_tx.send(true);
    for pipeline in pipelines {
        pipeline.shutdown().await;
    }
    let _ = status.await;
    Ok(())
}
