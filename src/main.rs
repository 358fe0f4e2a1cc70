// src/main.rs
mod acquisition;
mod config;
mod frontend;
mod types;

use std::path::Path;
use std::sync::{mpsc, Arc};

use anyhow::{bail, Context, Result};
use log::info;

use acquisition::{
    AcquisitionPipeline, FileSource, SampleSource, SerialHeadsetSource, SourceFactory,
};
use config::AcquisitionConfig;
use types::PipelineEvent;

/// Builds the source opener for the configured mode: offline playback from
/// the record file, or the serial headset adapter.
fn source_factory(cfg: &AcquisitionConfig) -> SourceFactory {
    if cfg.offline_mode() {
        let path = cfg.records_path.clone();
        let channel_count = cfg.channels.len();
        let rate = cfg.sample_rate_hz;
        Arc::new(move || {
            let source = FileSource::open(&path, channel_count, rate, true)?;
            Ok(Box::new(source) as Box<dyn SampleSource>)
        })
    } else {
        let port = cfg.serial_port.clone();
        let baud = cfg.baud_rate;
        let channel_count = cfg.channels.len();
        Arc::new(move || {
            let source = SerialHeadsetSource::open(&port, baud, channel_count)?;
            Ok(Box::new(source) as Box<dyn SampleSource>)
        })
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let Some(config_path) = std::env::args().nth(1) else {
        bail!("usage: neurotag <config.json>");
    };
    let cfg = AcquisitionConfig::load(Path::new(&config_path))
        .with_context(|| format!("loading {config_path}"))?;
    info!(
        "starting: {} channels at {} Hz, {} classes, offline={}",
        cfg.channels.len(),
        cfg.sample_rate_hz,
        cfg.classes.len(),
        cfg.offline_mode()
    );

    let (event_tx, event_rx) = mpsc::channel();
    let factory = source_factory(&cfg);
    let model_path = cfg.model_path.clone();
    let pipeline =
        AcquisitionPipeline::new(cfg, factory, event_tx.clone()).context("building pipeline")?;

    match model_path {
        Some(path) => {
            let _ = event_tx.send(PipelineEvent::Message("loading model...".into()));
            pipeline.load_classifier(path);
        }
        None => {
            let _ = event_tx.send(PipelineEvent::Message(
                "no model configured; live prediction disabled".into(),
            ));
        }
    }

    frontend::run(pipeline, event_rx)
}
