use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::acquisition::{AcquireError, Session};

/// Append-only flat-file store of labeled samples.
///
/// Row format: `class,iter,<v1>,...,<vN>`. The header row is written only
/// when the file is empty, so readers tolerate a missing header on an empty
/// file and nothing else.
pub struct RecordStore {
    path: PathBuf,
    channels: Vec<String>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>, channels: Vec<String>) -> Self {
        Self {
            path: path.into(),
            channels,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends every sample of a session. On failure the caller keeps the
    /// session in memory for a retry.
    pub fn append_session(&self, session: &Session) -> Result<(), AcquireError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;
        let mut w = BufWriter::new(file);
        if needs_header {
            write!(w, "class,iter")?;
            for channel in &self.channels {
                write!(w, ",{channel}")?;
            }
            writeln!(w)?;
        }
        for labeled in &session.samples {
            write!(w, "{},{}", labeled.label, labeled.iter)?;
            for value in &labeled.sample.channels {
                write!(w, ",{value}")?;
            }
            writeln!(w)?;
        }
        w.flush()?;
        info!(
            "saved {} samples for class {:?} session {}",
            session.len(),
            session.label,
            session.iter
        );
        Ok(())
    }

    /// Scans the store and tallies already-saved sessions per class, one per
    /// distinct (class, iter) pair. Unknown classes in the file are ignored;
    /// a missing or empty file yields all zeros.
    pub fn class_counts(&self, classes: &[String]) -> Result<HashMap<String, u32>, AcquireError> {
        let mut counts: HashMap<String, u32> =
            classes.iter().map(|c| (c.clone(), 0)).collect();
        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(counts),
            Err(e) => return Err(e.into()),
        };
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line_no == 0 || line.trim().is_empty() {
                continue;
            }
            let mut fields = line.splitn(3, ',');
            let (Some(class), Some(iter)) = (fields.next(), fields.next()) else {
                warn!("skipping malformed store row {}", line_no + 1);
                continue;
            };
            let Some(count) = counts.get_mut(class) else {
                continue;
            };
            if seen.insert((class.to_string(), iter.to_string())) {
                *count += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{LabeledSample, Sample};

    fn session(label: &str, iter: u32, n: usize) -> Session {
        Session {
            label: label.into(),
            iter,
            samples: (0..n)
                .map(|i| LabeledSample {
                    label: label.into(),
                    iter,
                    sample: Sample::new(i as u64, vec![i as f32 * 0.5, 1.25]),
                })
                .collect(),
        }
    }

    fn classes() -> Vec<String> {
        vec!["left".into(), "right".into()]
    }

    fn store_in(dir: &tempfile::TempDir) -> RecordStore {
        RecordStore::new(dir.path().join("data.csv"), vec!["C1".into(), "C2".into()])
    }

    #[test]
    fn header_written_only_on_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append_session(&session("left", 0, 2)).unwrap();
        store.append_session(&session("right", 0, 1)).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "class,iter,C1,C2");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "left,0,0,1.25");
        assert_eq!(lines[3], "right,0,0,1.25");
        assert_eq!(content.matches("class,iter").count(), 1);
    }

    #[test]
    fn counts_round_trip_by_distinct_label_iter_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append_session(&session("left", 0, 3)).unwrap();
        store.append_session(&session("left", 1, 3)).unwrap();
        store.append_session(&session("right", 0, 2)).unwrap();

        let counts = store.class_counts(&classes()).unwrap();
        assert_eq!(counts["left"], 2);
        assert_eq!(counts["right"], 1);
    }

    #[test]
    fn missing_file_counts_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let counts = store.class_counts(&classes()).unwrap();
        assert_eq!(counts["left"], 0);
        assert_eq!(counts["right"], 0);
    }

    #[test]
    fn unknown_classes_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append_session(&session("left", 0, 1)).unwrap();
        store.append_session(&session("blink", 0, 1)).unwrap();

        let counts = store.class_counts(&classes()).unwrap();
        assert_eq!(counts["left"], 1);
        assert!(!counts.contains_key("blink"));
    }
}
