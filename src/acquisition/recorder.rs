use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::acquisition::{ArrivalCounter, PredictionTrigger, Sample, SampleSource};

/// A sample plus the class label and session index it was captured under.
/// Produced only during an active recording, never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledSample {
    pub label: String,
    pub iter: u32,
    pub sample: Sample,
}

/// One timed recording run for one class.
#[derive(Debug)]
pub struct Session {
    pub label: String,
    pub iter: u32,
    pub samples: Vec<LabeledSample>,
}

impl Session {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Cooperative cancellation flag, checked once per sample iteration.
/// Worst-case cancellation latency is therefore one sample period; a device
/// read already in flight completes before the flag is observed.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Timing knobs for one recording run.
#[derive(Clone, Copy, Debug)]
pub struct RecordingParams {
    pub secs: u32,
    pub sample_rate_hz: u32,
    /// Settle delay inserted before the first read so the idle-queue cleaner
    /// cannot race the start of the session.
    pub sync_delay: Duration,
}

/// Dedicated worker pulling a bounded number of samples from the source,
/// labeling each one and forwarding the raw sample to the live-prediction
/// window.
///
/// The worker owns the source for the duration of the run and hands it back
/// on `finish`. All failure paths inside the worker end the loop: source
/// exhaustion is truncation (a shorter session, not an error) and read
/// errors are logged, so nothing crosses the worker boundary silently.
pub struct SessionRecorder {
    handle: Option<thread::JoinHandle<(Box<dyn SampleSource>, Vec<LabeledSample>)>>,
    cancel: CancelToken,
    label: String,
    iter: u32,
}

impl SessionRecorder {
    pub fn start(
        mut source: Box<dyn SampleSource>,
        trigger: PredictionTrigger,
        arrivals: ArrivalCounter,
        cancel: CancelToken,
        label: String,
        iter: u32,
        params: RecordingParams,
    ) -> Self {
        let worker_cancel = cancel.clone();
        let worker_label = label.clone();
        let handle = thread::spawn(move || {
            thread::sleep(params.sync_delay);
            // drop whatever the idle path accumulated before the session
            arrivals.clear();

            let total = params.secs as u64 * params.sample_rate_hz as u64;
            let mut samples = Vec::with_capacity(total as usize);
            for _ in 0..total {
                if worker_cancel.is_cancelled() {
                    info!(
                        "recording cancelled after {} samples of {total}",
                        samples.len()
                    );
                    break;
                }
                match source.next_sample() {
                    Ok(Some(sample)) => {
                        arrivals.add(1);
                        samples.push(LabeledSample {
                            label: worker_label.clone(),
                            iter,
                            sample: sample.clone(),
                        });
                        trigger.publish(sample);
                    }
                    Ok(None) => {
                        info!(
                            "source exhausted, session truncated at {} samples",
                            samples.len()
                        );
                        break;
                    }
                    Err(err) => {
                        warn!("sample read failed, ending session early: {err}");
                        break;
                    }
                }
            }
            (source, samples)
        });
        Self {
            handle: Some(handle),
            cancel,
            label,
            iter,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }

    /// Joins the worker and yields the source plus everything collected so
    /// far, in arrival order. Partial (cancelled or truncated) sessions keep
    /// their samples.
    pub fn finish(mut self) -> (Option<Box<dyn SampleSource>>, Session) {
        let (source, samples) = match self.handle.take().map(|h| h.join()) {
            Some(Ok((source, samples))) => (Some(source), samples),
            _ => {
                warn!("recording worker lost, session is empty");
                (None, Vec::new())
            }
        };
        (
            source,
            Session {
                label: self.label,
                iter: self.iter,
                samples,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AcquireError, ManualSource, RollingBuffer};
    use std::sync::mpsc;

    fn params(secs: u32, rate: u32) -> RecordingParams {
        RecordingParams {
            secs,
            sample_rate_hz: rate,
            sync_delay: Duration::ZERO,
        }
    }

    fn trigger_with_rx(
        trigger_size: usize,
        evict: usize,
    ) -> (PredictionTrigger, mpsc::Receiver<Vec<Sample>>, Arc<RollingBuffer>) {
        let buffer = Arc::new(RollingBuffer::new());
        let (tx, rx) = mpsc::channel();
        (
            PredictionTrigger::new(buffer.clone(), trigger_size, evict, tx),
            rx,
            buffer,
        )
    }

    fn rows(n: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32, -(i as f32)]).collect()
    }

    #[test]
    fn completed_session_has_duration_times_rate_samples() {
        let source = Box::new(ManualSource::from_rows(rows(10)));
        let (trigger, _rx, buffer) = trigger_with_rx(1000, 0);
        let arrivals = ArrivalCounter::new();
        let recorder = SessionRecorder::start(
            source,
            trigger,
            arrivals,
            CancelToken::new(),
            "A".into(),
            0,
            params(1, 2),
        );
        let (source, session) = recorder.finish();

        assert!(source.is_some());
        assert_eq!(session.len(), 2);
        assert_eq!(session.label, "A");
        for (i, labeled) in session.samples.iter().enumerate() {
            assert_eq!(labeled.label, "A");
            assert_eq!(labeled.iter, 0);
            assert_eq!(labeled.sample.seq, i as u64);
        }
        // every collected sample was also forwarded to the live window
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn exhausted_source_truncates_instead_of_erroring() {
        let source = Box::new(ManualSource::from_rows(rows(3)));
        let (trigger, _rx, _buffer) = trigger_with_rx(1000, 0);
        let recorder = SessionRecorder::start(
            source,
            trigger,
            ArrivalCounter::new(),
            CancelToken::new(),
            "B".into(),
            4,
            params(5, 128),
        );
        let (source, session) = recorder.finish();
        assert!(source.is_some());
        assert_eq!(session.len(), 3);
        assert_eq!(session.iter, 4);
    }

    /// Source that cancels the recording after yielding `k` samples, so the
    /// worker observes the flag on the next iteration with exactly `k`
    /// collected.
    struct CancelAfter {
        inner: ManualSource,
        remaining: usize,
        token: CancelToken,
    }

    impl SampleSource for CancelAfter {
        fn next_sample(&mut self) -> Result<Option<Sample>, AcquireError> {
            let sample = self.inner.next_sample();
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.token.cancel();
            }
            sample
        }
    }

    #[test]
    fn cancelling_after_k_samples_retains_exactly_k() {
        let k = 3usize;
        let token = CancelToken::new();
        let source = Box::new(CancelAfter {
            inner: ManualSource::from_rows(rows(100)),
            remaining: k,
            token: token.clone(),
        });
        let (trigger, _rx, _buffer) = trigger_with_rx(1000, 0);
        let recorder = SessionRecorder::start(
            source,
            trigger,
            ArrivalCounter::new(),
            token,
            "C".into(),
            0,
            params(50, 2),
        );
        let (_, session) = recorder.finish();
        assert_eq!(session.len(), k);
    }

    #[test]
    fn immediate_cancel_yields_empty_session() {
        let source = Box::new(ManualSource::from_rows(rows(100)));
        let (trigger, _rx, _buffer) = trigger_with_rx(1000, 0);
        let recorder = SessionRecorder::start(
            source,
            trigger,
            ArrivalCounter::new(),
            CancelToken::new(),
            "D".into(),
            0,
            RecordingParams {
                secs: 10,
                sample_rate_hz: 128,
                sync_delay: Duration::from_millis(50),
            },
        );
        recorder.cancel();
        let (_, session) = recorder.finish();
        assert!(session.is_empty());
    }

    #[test]
    fn collected_samples_feed_the_prediction_trigger() {
        let source = Box::new(ManualSource::from_rows(rows(6)));
        let (trigger, rx, buffer) = trigger_with_rx(4, 2);
        let recorder = SessionRecorder::start(
            source,
            trigger,
            ArrivalCounter::new(),
            CancelToken::new(),
            "E".into(),
            0,
            params(3, 2),
        );
        let (_, session) = recorder.finish();
        assert_eq!(session.len(), 6);
        // 6 publishes with trigger size 4 and evict 2: windows at the 4th
        // and 6th publish
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn arrivals_are_counted_per_sample() {
        let source = Box::new(ManualSource::from_rows(rows(4)));
        let (trigger, _rx, _buffer) = trigger_with_rx(1000, 0);
        let arrivals = ArrivalCounter::new();
        let recorder = SessionRecorder::start(
            source,
            trigger,
            arrivals.clone(),
            CancelToken::new(),
            "F".into(),
            0,
            params(2, 2),
        );
        let (_, session) = recorder.finish();
        assert_eq!(session.len(), 4);
        assert_eq!(arrivals.take(), 4);
    }
}
