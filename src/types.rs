// src/types.rs

/// Notifications from the pipeline workers to the operator-facing layer.
///
/// State-change events (`HealthChanged`, `RecordingStatus`) fire exactly once
/// per change; the pipeline never references a concrete UI type, only this
/// channel.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    /// Live classifier produced a label for the latest window.
    Predicted(String),
    /// Data-source health indicator flipped.
    HealthChanged(bool),
    /// A recording session started or stopped.
    RecordingStatus(bool),
    /// Operator feedback line (model load outcome, save errors, ...).
    Message(String),
}
