use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::acquisition::AcquireError;

/// Headset channel order of the 14-sensor Epoc layout; both the store header
/// and every decoded frame follow it.
const DEFAULT_CHANNELS: [&str; 14] = [
    "F3", "FC5", "AF3", "F7", "T7", "P7", "O1", "O2", "P8", "T8", "F8", "AF4", "FC6", "F4",
];

/// Marker file that forces offline mode, same contract as the config flag.
const OFFLINE_MARKER: &str = "debugging";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Nominal device rate.
    pub sample_rate_hz: u32,
    /// Default recording length offered to the operator.
    pub default_session_secs: u32,
    /// Sample count that fires one inference pass.
    pub trigger_size: usize,
    /// Delay between inference passes, as a fraction of a second of samples
    /// evicted per pass. Must stay within 1.0 s or the window outgrows the
    /// eviction.
    pub predict_interval_secs: f32,
    /// Channel names, fixed order, one per sensor.
    pub channels: Vec<String>,
    /// Class labels offered for recording.
    pub classes: Vec<String>,
    /// Settle delay before a session's first read.
    pub sync_delay_ms: u64,
    /// Health probe cadence.
    pub health_tick_ms: u64,
    /// Pause between the probes of one health pass.
    pub probe_pause_ms: u64,
    /// Cadence of the idle arrival-queue cleaner.
    pub cleaner_period_ms: u64,
    pub records_path: PathBuf,
    pub model_path: Option<PathBuf>,
    pub serial_port: String,
    pub baud_rate: u32,
    pub offline: bool,
    /// Per-class session cap used by the random-class picker.
    pub random_session_cap: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 128,
            default_session_secs: 5,
            trigger_size: 128,
            predict_interval_secs: 0.25,
            channels: DEFAULT_CHANNELS.iter().map(|s| s.to_string()).collect(),
            classes: Vec::new(),
            sync_delay_ms: 100,
            health_tick_ms: 500,
            probe_pause_ms: 100,
            cleaner_period_ms: 1000,
            records_path: PathBuf::from("data.csv"),
            model_path: None,
            serial_port: String::from("/dev/ttyUSB0"),
            baud_rate: 115_200,
            offline: false,
            random_session_cap: 10,
        }
    }
}

impl AcquisitionConfig {
    pub fn load(path: &Path) -> Result<Self, AcquireError> {
        let file = File::open(path)
            .map_err(|e| AcquireError::Config(format!("{}: {e}", path.display())))?;
        let cfg: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| AcquireError::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AcquireError> {
        if self.sample_rate_hz == 0 {
            return Err(AcquireError::Config("sample rate must be non-zero".into()));
        }
        if self.trigger_size == 0 {
            return Err(AcquireError::Config("trigger size must be non-zero".into()));
        }
        if !(self.predict_interval_secs > 0.0 && self.predict_interval_secs <= 1.0) {
            return Err(AcquireError::Config(
                "predict interval must be in (0, 1.0] seconds".into(),
            ));
        }
        if self.evict_per_trigger() == 0 {
            return Err(AcquireError::Config(
                "predict interval too short: evicts zero samples per prediction".into(),
            ));
        }
        if self.channels.is_empty() {
            return Err(AcquireError::Config("no channels configured".into()));
        }
        if self.classes.is_empty() {
            return Err(AcquireError::Config("no classes configured".into()));
        }
        Ok(())
    }

    /// Oldest entries dropped after each inference pass. Floor division by
    /// design: with an interval that does not evenly divide the rate this
    /// under-evicts slightly, which the rolling buffer absorbs within one
    /// window.
    pub fn evict_per_trigger(&self) -> usize {
        (self.sample_rate_hz as f32 * self.predict_interval_secs).floor() as usize
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }

    pub fn health_tick(&self) -> Duration {
        Duration::from_millis(self.health_tick_ms)
    }

    pub fn probe_pause(&self) -> Duration {
        Duration::from_millis(self.probe_pause_ms)
    }

    pub fn cleaner_period(&self) -> Duration {
        Duration::from_millis(self.cleaner_period_ms)
    }

    /// Offline/debug mode: sourced from the config flag or the marker file
    /// in the working directory.
    pub fn offline_mode(&self) -> bool {
        self.offline || Path::new(OFFLINE_MARKER).exists()
    }
}
