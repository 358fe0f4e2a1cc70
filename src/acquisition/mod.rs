// src/acquisition/mod.rs

pub mod buffer;
pub mod classifier;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod predictor;
pub mod recorder;
pub mod source;
pub mod store;

pub use buffer::RollingBuffer;
pub use classifier::{CentroidClassifier, Classifier};
pub use error::AcquireError;
pub use health::{spawn_monitor, ArrivalCounter, HealthMonitor, HealthState, MonitorHandle};
pub use pipeline::{AcquisitionPipeline, ClassCount};
pub use predictor::{spawn_classifier_worker, PredictionTrigger};
pub use recorder::{
    CancelToken, LabeledSample, RecordingParams, Session, SessionRecorder,
};
pub use source::{
    FileSource, ManualSource, Sample, SampleSource, SerialHeadsetSource, SharedSource,
    SourceFactory,
};
pub use store::RecordStore;
