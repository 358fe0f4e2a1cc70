use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, warn};
use ndarray::Array2;

use crate::acquisition::{Classifier, RollingBuffer, Sample};
use crate::types::PipelineEvent;

/// Periodic inference policy sitting on the publish path.
///
/// Every published sample lands in the rolling buffer; once the buffer holds
/// a full trigger window, a snapshot goes to the classifier worker and the
/// oldest `evict_per_trigger` entries are dropped, sliding the window
/// forward. The publisher is never blocked for longer than the snapshot.
#[derive(Clone)]
pub struct PredictionTrigger {
    buffer: Arc<RollingBuffer>,
    trigger_size: usize,
    evict_per_trigger: usize,
    windows: Sender<Vec<Sample>>,
}

impl PredictionTrigger {
    pub fn new(
        buffer: Arc<RollingBuffer>,
        trigger_size: usize,
        evict_per_trigger: usize,
        windows: Sender<Vec<Sample>>,
    ) -> Self {
        Self {
            buffer,
            trigger_size,
            evict_per_trigger,
            windows,
        }
    }

    pub fn publish(&self, sample: Sample) {
        if let Some(window) =
            self.buffer
                .publish_and_trigger(sample, self.trigger_size, self.evict_per_trigger)
        {
            // A closed channel means the worker is shutting down; the window
            // is simply dropped.
            if self.windows.send(window).is_err() {
                debug!("classifier worker gone, dropping window");
            }
        }
    }
}

/// Runs inference off the ingestion path. A single worker consumes windows
/// in order, so prediction results reach the frontend serialized, one at a
/// time. A classifier failure drops that window's prediction and the loop
/// continues with the next one.
pub fn spawn_classifier_worker(
    windows: Receiver<Vec<Sample>>,
    classifier: Arc<Mutex<Option<Box<dyn Classifier>>>>,
    events: Sender<PipelineEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(window) = windows.recv() {
            let guard = classifier.lock().unwrap_or_else(|e| e.into_inner());
            let Some(classifier) = guard.as_ref() else {
                // no model loaded yet, nothing to predict with
                continue;
            };
            let matrix = match window_matrix(&window) {
                Some(m) => m,
                None => {
                    warn!("ragged window, skipping inference");
                    continue;
                }
            };
            match classifier.predict(&matrix) {
                Ok(label) => {
                    let _ = events.send(PipelineEvent::Predicted(label));
                }
                Err(err) => warn!("inference failed, window dropped: {err}"),
            }
        }
        debug!("classifier worker stopped");
    })
}

/// Rearranges an ordered window of samples into the channels x samples
/// matrix the classifier boundary expects. Returns `None` when sample
/// arities disagree.
fn window_matrix(window: &[Sample]) -> Option<Array2<f32>> {
    let channel_count = window.first()?.channels.len();
    if window.iter().any(|s| s.channels.len() != channel_count) {
        return None;
    }
    let mut matrix = Array2::zeros((channel_count, window.len()));
    for (s, sample) in window.iter().enumerate() {
        for (c, &value) in sample.channels.iter().enumerate() {
            matrix[[c, s]] = value;
        }
    }
    Some(matrix)
}
