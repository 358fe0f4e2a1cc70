use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::acquisition::AcquireError;

/// One multi-channel reading at one time step, tagged with a capture
/// sequence index. Immutable once captured.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub seq: u64,
    pub channels: Vec<f32>,
}

impl Sample {
    pub fn new(seq: u64, channels: Vec<f32>) -> Self {
        Self { seq, channels }
    }
}

/// Trait representing something that can yield samples on demand.
///
/// `next_sample` blocks at the device's nominal rate. `Ok(None)` means the
/// source is exhausted (end of offline playback), which the recording layer
/// treats as truncation, not an error.
pub trait SampleSource: Send {
    fn next_sample(&mut self) -> Result<Option<Sample>, AcquireError>;
}

/// Builds a fresh source; used for the initial open and for best-effort
/// reinitialization when the health monitor flags the source.
pub type SourceFactory =
    std::sync::Arc<dyn Fn() -> Result<Box<dyn SampleSource>, AcquireError> + Send + Sync>;

/// Slot holding the source while no recording worker owns it. Empty while a
/// session is running (the worker takes the source) or after a failed open.
pub type SharedSource = std::sync::Arc<std::sync::Mutex<Option<Box<dyn SampleSource>>>>;

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Sample>,
}

impl ManualSource {
    pub fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            queue: samples.into_iter().collect(),
        }
    }

    /// Convenience constructor: one sample per row, sequence numbers assigned
    /// in order.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Self {
        Self::new(
            rows.into_iter()
                .enumerate()
                .map(|(i, channels)| Sample::new(i as u64, channels)),
        )
    }
}

impl SampleSource for ManualSource {
    fn next_sample(&mut self) -> Result<Option<Sample>, AcquireError> {
        Ok(self.queue.pop_front())
    }
}

/// Offline/debug source reading pre-recorded rows from the record store file.
///
/// Rows are `label,iter,v1,...,vN`; only the trailing channel readings are
/// kept. The source paces itself to approximate real time, but sleeping for
/// a single sample period is too imprecise at headset rates, so it sleeps
/// once per pair of samples instead.
pub struct FileSource {
    rows: VecDeque<Vec<f32>>,
    seq: u64,
    sample_period: Duration,
    paced: bool,
}

impl FileSource {
    pub fn open(
        path: &Path,
        channel_count: usize,
        sample_rate_hz: u32,
        paced: bool,
    ) -> Result<Self, AcquireError> {
        if sample_rate_hz == 0 {
            return Err(AcquireError::Config("sample rate must be non-zero".into()));
        }
        let file = File::open(path).map_err(|e| {
            AcquireError::SourceUnavailable(format!("{}: {e}", path.display()))
        })?;
        let reader = BufReader::new(file);
        let mut rows = VecDeque::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line_no == 0 || line.trim().is_empty() {
                // header row, or trailing blank line
                continue;
            }
            rows.push_back(parse_channels(&line, channel_count)?);
        }
        debug!("file source loaded {} samples from {}", rows.len(), path.display());
        Ok(Self {
            rows,
            seq: 0,
            sample_period: Duration::from_secs_f64(1.0 / sample_rate_hz as f64),
            paced,
        })
    }
}

impl SampleSource for FileSource {
    fn next_sample(&mut self) -> Result<Option<Sample>, AcquireError> {
        let Some(channels) = self.rows.pop_front() else {
            return Ok(None);
        };
        let sample = Sample::new(self.seq, channels);
        self.seq += 1;
        if self.paced && self.seq % 2 == 0 {
            thread::sleep(self.sample_period * 2);
        }
        Ok(Some(sample))
    }
}

/// Adapter for a serial-attached headset emitting newline-delimited frames.
///
/// Each frame is a comma-separated list of values; the device prefixes its
/// own counter/status fields, so only the trailing channel readings are
/// decoded. Frame layout is an adapter detail: the rest of the pipeline only
/// ever sees `Sample`s.
pub struct SerialHeadsetSource {
    reader: BufReader<Box<dyn serialport::SerialPort>>,
    channel_count: usize,
    seq: u64,
}

impl SerialHeadsetSource {
    pub fn open(port: &str, baud_rate: u32, channel_count: usize) -> Result<Self, AcquireError> {
        let port = serialport::new(port, baud_rate)
            .timeout(Duration::from_millis(1000))
            .open()
            .map_err(|e| AcquireError::SourceUnavailable(e.to_string()))?;
        Ok(Self {
            reader: BufReader::new(port),
            channel_count,
            seq: 0,
        })
    }
}

impl SampleSource for SerialHeadsetSource {
    fn next_sample(&mut self) -> Result<Option<Sample>, AcquireError> {
        // The headset interleaves status frames with data frames; skip
        // anything that does not decode to a full set of channel readings.
        const MAX_SKIPPED_FRAMES: usize = 16;
        for _ in 0..MAX_SKIPPED_FRAMES {
            let mut line = String::new();
            self.reader
                .read_line(&mut line)
                .map_err(|e| AcquireError::SourceUnavailable(e.to_string()))?;
            match parse_channels(&line, self.channel_count) {
                Ok(channels) => {
                    let sample = Sample::new(self.seq, channels);
                    self.seq += 1;
                    trace!("headset frame {}", sample.seq);
                    return Ok(Some(sample));
                }
                Err(_) => continue,
            }
        }
        Err(AcquireError::BadFrame(format!(
            "no decodable frame in {MAX_SKIPPED_FRAMES} reads"
        )))
    }
}

/// Decodes the trailing `channel_count` comma-separated floats of a frame or
/// store row, ignoring any leading non-numeric fields.
fn parse_channels(line: &str, channel_count: usize) -> Result<Vec<f32>, AcquireError> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() < channel_count {
        return Err(AcquireError::ChannelMismatch {
            expected: channel_count,
            actual: fields.len(),
        });
    }
    let start = fields.len() - channel_count;
    fields[start..]
        .iter()
        .map(|f| {
            f.trim()
                .parse::<f32>()
                .map_err(|_| AcquireError::BadFrame(format!("not a reading: {f:?}")))
        })
        .collect()
}
