use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{info, warn};

use crate::acquisition::{
    spawn_classifier_worker, spawn_monitor, AcquireError, ArrivalCounter, CancelToken,
    CentroidClassifier, Classifier, HealthMonitor, MonitorHandle, PredictionTrigger,
    RecordStore, RecordingParams, RollingBuffer, Session, SessionRecorder, SharedSource,
    SourceFactory,
};
use crate::config::AcquisitionConfig;
use crate::types::PipelineEvent;

/// Per-class session tally: sessions already in the store plus sessions
/// saved during this run.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassCount {
    pub old: u32,
    pub new: u32,
}

impl ClassCount {
    pub fn total(self) -> u32 {
        self.old + self.new
    }
}

/// Context object owning the whole acquisition pipeline: source slot,
/// rolling buffer, classifier worker, health monitor, record store and the
/// per-class counters. Single initialization and teardown lifecycle; workers
/// get handles passed in explicitly instead of reaching for globals.
pub struct AcquisitionPipeline {
    cfg: AcquisitionConfig,
    source: SharedSource,
    factory: SourceFactory,
    buffer: Arc<RollingBuffer>,
    trigger: PredictionTrigger,
    classifier: Arc<Mutex<Option<Box<dyn Classifier>>>>,
    classifier_worker: Option<thread::JoinHandle<()>>,
    arrivals: ArrivalCounter,
    recording: Arc<AtomicBool>,
    recorder: Option<SessionRecorder>,
    monitor: Option<MonitorHandle>,
    store: RecordStore,
    counts: HashMap<String, ClassCount>,
    events: Sender<PipelineEvent>,
    offline: bool,
}

impl AcquisitionPipeline {
    /// Builds the pipeline, scans prior session counts from the store,
    /// attempts an initial source open and starts the background workers.
    /// A failed initial open is reported and left for the health monitor or
    /// a later session start to retry.
    pub fn new(
        cfg: AcquisitionConfig,
        factory: SourceFactory,
        events: Sender<PipelineEvent>,
    ) -> Result<Self, AcquireError> {
        cfg.validate()?;
        let offline = cfg.offline_mode();

        let store = RecordStore::new(cfg.records_path.clone(), cfg.channels.clone());
        let counts = store
            .class_counts(&cfg.classes)?
            .into_iter()
            .map(|(class, old)| (class, ClassCount { old, new: 0 }))
            .collect();

        let source: SharedSource = Arc::new(Mutex::new(None));
        match factory() {
            Ok(fresh) => *lock_slot(&source) = Some(fresh),
            Err(err) => {
                warn!("initial source open failed: {err}");
                let _ = events.send(PipelineEvent::Message(format!("{err}")));
            }
        }

        let buffer = Arc::new(RollingBuffer::new());
        let (window_tx, window_rx) = mpsc::channel();
        let trigger = PredictionTrigger::new(
            buffer.clone(),
            cfg.trigger_size,
            cfg.evict_per_trigger(),
            window_tx,
        );
        let classifier: Arc<Mutex<Option<Box<dyn Classifier>>>> = Arc::new(Mutex::new(None));
        let classifier_worker =
            spawn_classifier_worker(window_rx, classifier.clone(), events.clone());

        let arrivals = ArrivalCounter::new();
        let recording = Arc::new(AtomicBool::new(false));
        let monitor = spawn_monitor(
            HealthMonitor::new(arrivals.clone(), cfg.probe_pause(), offline),
            recording.clone(),
            source.clone(),
            factory.clone(),
            events.clone(),
            cfg.health_tick(),
            cfg.cleaner_period(),
        );

        Ok(Self {
            cfg,
            source,
            factory,
            buffer,
            trigger,
            classifier,
            classifier_worker: Some(classifier_worker),
            arrivals,
            recording,
            recorder: None,
            monitor: Some(monitor),
            store,
            counts,
            events,
            offline,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.cfg
    }

    pub fn class_counts(&self) -> &HashMap<String, ClassCount> {
        &self.counts
    }

    /// Next session index for a label: prior persisted sessions plus the
    /// ones saved during this run.
    pub fn next_iter(&self, label: &str) -> u32 {
        self.counts.get(label).copied().unwrap_or_default().total()
    }

    /// Starts one recording worker. No-op while a session is active. If the
    /// source slot is empty, one reopen attempt is made; on failure the
    /// pipeline stays idle and the error goes back to the caller, who owns
    /// reporting it.
    pub fn start_session(&mut self, label: &str, secs: u32) -> Result<(), AcquireError> {
        if self.is_recording() {
            info!("recording already in progress, start ignored");
            return Ok(());
        }
        if !self.cfg.classes.iter().any(|c| c == label) {
            return Err(AcquireError::Config(format!("unknown class {label:?}")));
        }

        let source = match lock_slot(&self.source).take() {
            Some(source) => source,
            None => (self.factory)()?,
        };

        let iter = self.next_iter(label);
        self.recording.store(true, Ordering::Relaxed);
        let _ = self.events.send(PipelineEvent::RecordingStatus(true));
        info!("recording class {label:?} session {iter} for {secs}s");

        self.recorder = Some(SessionRecorder::start(
            source,
            self.trigger.clone(),
            self.arrivals.clone(),
            CancelToken::new(),
            label.to_string(),
            iter,
            RecordingParams {
                secs,
                sample_rate_hz: self.cfg.sample_rate_hz,
                sync_delay: self.cfg.sync_delay(),
            },
        ));
        Ok(())
    }

    /// Cooperative early stop; already-collected samples are retained.
    pub fn cancel_session(&self) {
        if let Some(recorder) = &self.recorder {
            recorder.cancel();
        }
    }

    pub fn session_finished(&self) -> bool {
        self.recorder.as_ref().map(|r| r.is_finished()).unwrap_or(false)
    }

    /// Joins the worker, returns the source to its slot and wipes the live
    /// window. Yields the session for the accept/discard decision, or `None`
    /// when nothing was recording.
    pub fn finish_session(&mut self) -> Option<Session> {
        let recorder = self.recorder.take()?;
        let (source, session) = recorder.finish();
        if let Some(source) = source {
            *lock_slot(&self.source) = Some(source);
        }
        self.recording.store(false, Ordering::Relaxed);
        let _ = self.events.send(PipelineEvent::RecordingStatus(false));
        self.buffer.clear();
        Some(session)
    }

    /// Persists an accepted session. On failure the outcome is reported and
    /// the session stays with the caller for a retry; the counter only moves
    /// on success.
    pub fn save_session(&mut self, session: &Session) -> Result<(), AcquireError> {
        match self.store.append_session(session) {
            Ok(()) => {
                self.counts.entry(session.label.clone()).or_default().new += 1;
                let _ = self.events.send(PipelineEvent::Message(format!(
                    "saved session {} for class {:?} ({} samples)",
                    session.iter,
                    session.label,
                    session.len()
                )));
                Ok(())
            }
            Err(err) => {
                warn!("save failed: {err}");
                let _ = self
                    .events
                    .send(PipelineEvent::Message(format!("save failed: {err}")));
                Err(err)
            }
        }
    }

    /// Releases a rejected session without persisting anything.
    pub fn discard_session(&self, session: Session) {
        info!(
            "discarded session {} for class {:?} ({} samples)",
            session.iter,
            session.label,
            session.len()
        );
    }

    /// Loads the classifier model on a background thread; the outcome comes
    /// back as a message event.
    pub fn load_classifier(&self, path: PathBuf) {
        let slot = self.classifier.clone();
        let events = self.events.clone();
        let channel_count = self.cfg.channels.len();
        let sample_rate_hz = self.cfg.sample_rate_hz;
        thread::spawn(move || {
            match CentroidClassifier::load(&path, channel_count, sample_rate_hz) {
                Ok(classifier) => {
                    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(classifier));
                    let _ = events.send(PipelineEvent::Message(format!(
                        "model {} loaded",
                        path.display()
                    )));
                }
                Err(err) => {
                    warn!("model load failed: {err}");
                    let _ = events.send(PipelineEvent::Message(format!(
                        "failed to load model {}: {err}",
                        path.display()
                    )));
                }
            }
        });
    }

    /// Installs an already-built classifier (tests, embedding).
    pub fn set_classifier(&self, classifier: Box<dyn Classifier>) {
        *self.classifier.lock().unwrap_or_else(|e| e.into_inner()) = Some(classifier);
    }

    /// Stops the periodic scheduler and the classifier worker. Any active
    /// session is cancelled and dropped unfinished.
    pub fn shutdown(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            recorder.cancel();
            let _ = recorder.finish();
            self.recording.store(false, Ordering::Relaxed);
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        // Replacing the trigger drops the last window sender once the
        // recorder is gone, which lets the classifier worker drain and exit.
        let (orphan_tx, _orphan_rx) = mpsc::channel();
        self.trigger = PredictionTrigger::new(
            self.buffer.clone(),
            self.cfg.trigger_size,
            self.cfg.evict_per_trigger(),
            orphan_tx,
        );
        if let Some(worker) = self.classifier_worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for AcquisitionPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_slot(
    source: &SharedSource,
) -> std::sync::MutexGuard<'_, Option<Box<dyn crate::acquisition::SampleSource>>> {
    source.lock().unwrap_or_else(|e| e.into_inner())
}
