//! Checkpoint and run-history files.
//!
//! The checkpoint holds only the strategy's opaque snapshot; the history is a
//! separate JSON document that grows by one record per fold-in. Both are
//! best-effort: callers log failures and keep running.

use chrono::{DateTime, Utc};
use hb_types::{BestResult, Observation, ParameterVector, PersistenceError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RunId;

/// One fold-in as written to the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "X")]
    pub xs: Vec<ParameterVector>,
    #[serde(rename = "Y")]
    pub ys: Vec<f64>,
    #[serde(rename = "Hash")]
    pub hashes: Vec<String>,
    #[serde(rename = "fX")]
    pub best_params: ParameterVector,
    #[serde(rename = "fY")]
    pub best_fom: f64,
    /// Evaluation index the fold happened at.
    pub step: usize,
    /// Block of each observation, parallel to `X`.
    pub blocks: Vec<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only log of fold-ins plus the checkpoint paths touched by the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    pub run_id: RunId,
    pub label: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub save: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub load: Option<String>,
    #[serde(default)]
    pub tell: Vec<HistoryRecord>,
}

impl RunHistory {
    pub fn new(run_id: RunId, label: impl Into<String>) -> Self {
        Self {
            run_id,
            label: label.into(),
            started_at: Utc::now(),
            save: None,
            load: None,
            tell: Vec::new(),
        }
    }

    pub fn record_fold(&mut self, batch: &[Observation], best: &BestResult, step: usize) {
        self.tell.push(HistoryRecord {
            xs: batch.iter().map(|o| o.params.clone()).collect(),
            ys: batch.iter().map(|o| o.fom.value()).collect(),
            hashes: batch.iter().map(|o| o.params.content_hash()).collect(),
            best_params: best.params.clone(),
            best_fom: best.fom,
            step,
            blocks: batch.iter().map(|o| o.block).collect(),
            timestamp: Utc::now(),
        });
    }

    /// First checkpoint written wins.
    pub fn note_save(&mut self, path: &Path) {
        self.save
            .get_or_insert_with(|| path.display().to_string());
    }

    /// First checkpoint loaded wins.
    pub fn note_load(&mut self, path: &Path) {
        self.load
            .get_or_insert_with(|| path.display().to_string());
    }

    /// Vectors across every record.
    pub fn vectors_recorded(&self) -> usize {
        self.tell.iter().map(|record| record.xs.len()).sum()
    }
}

/// Deterministic file names for one coordinator process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFiles {
    dir: PathBuf,
    label: String,
    pid: u32,
}

impl RunFiles {
    pub fn new(dir: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self::with_pid(dir, label, std::process::id())
    }

    pub fn with_pid(dir: impl Into<PathBuf>, label: impl Into<String>, pid: u32) -> Self {
        Self {
            dir: dir.into(),
            label: label.into(),
            pid,
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir
            .join(format!("coordinator-{}-{}.ckpt.json", self.label, self.pid))
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir
            .join(format!("coordinator-{}-{}.json", self.label, self.pid))
    }
}

/// Write `blob` to `path` through a sibling temp file so a crash never leaves
/// a half-written checkpoint.
pub fn write_checkpoint(path: &Path, blob: &[u8]) -> Result<(), PersistenceError> {
    let write_err = |source| PersistenceError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, blob).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(write_err)
}

pub fn read_checkpoint(path: &Path) -> Result<Vec<u8>, PersistenceError> {
    let blob = fs::read(path).map_err(|source| PersistenceError::Read {
        path: path.display().to_string(),
        source,
    })?;
    if blob.is_empty() {
        return Err(PersistenceError::Corrupt {
            path: path.display().to_string(),
            message: "file is empty".to_string(),
        });
    }
    Ok(blob)
}

/// Rewrite the whole history document.
pub fn write_history(path: &Path, history: &RunHistory) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec_pretty(history).map_err(|e| PersistenceError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    write_checkpoint(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hb_types::{FigureOfMerit, ParamValue};
    use uuid::Uuid;

    fn observation(x: f64, fom: f64, block: usize) -> Observation {
        Observation {
            params: ParameterVector::new(vec![
                ParamValue::Real(x),
                ParamValue::Categorical("a".into()),
            ]),
            fom: FigureOfMerit::new(fom).unwrap(),
            block,
        }
    }

    #[test]
    fn file_names_follow_label_and_pid() {
        let files = RunFiles::with_pid("/tmp/out", "demo", 42);
        assert_eq!(
            files.checkpoint_path(),
            PathBuf::from("/tmp/out/coordinator-demo-42.ckpt.json")
        );
        assert_eq!(
            files.history_path(),
            PathBuf::from("/tmp/out/coordinator-demo-42.json")
        );
    }

    #[test]
    fn history_uses_short_keys() {
        let mut history = RunHistory::new(Uuid::new_v4(), "demo");
        let batch = vec![observation(0.2, 0.5, 1), observation(0.7, 0.3, 2)];
        let best = BestResult {
            params: batch[1].params.clone(),
            fom: 0.3,
        };
        history.record_fold(&batch, &best, 2);
        history.note_save(Path::new("first.ckpt.json"));
        history.note_save(Path::new("second.ckpt.json"));

        let json = serde_json::to_value(&history).unwrap();
        let record = &json["tell"][0];
        for key in ["X", "Y", "Hash", "fX", "fY"] {
            assert!(record.get(key).is_some(), "missing {key}");
        }
        assert_eq!(record["Y"], serde_json::json!([0.5, 0.3]));
        assert_eq!(record["Hash"][0].as_str().unwrap().len(), 64);
        assert_eq!(json["save"], "first.ckpt.json");
        assert!(json.get("load").is_none());
        assert_eq!(history.vectors_recorded(), 2);
    }

    #[test]
    fn checkpoint_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.ckpt.json");
        write_checkpoint(&path, b"{\"state\":1}").unwrap();
        assert_eq!(read_checkpoint(&path).unwrap(), b"{\"state\":1}");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_or_empty_checkpoint_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.ckpt.json");
        assert!(matches!(
            read_checkpoint(&path),
            Err(PersistenceError::Read { .. })
        ));
        fs::write(&path, b"").unwrap();
        assert!(matches!(
            read_checkpoint(&path),
            Err(PersistenceError::Corrupt { .. })
        ));
    }

    #[test]
    fn write_into_a_file_path_fails() {
        let dir = tempfile::NamedTempFile::new().unwrap();
        let path = dir.path().join("state.ckpt.json");
        assert!(matches!(
            write_checkpoint(&path, b"{}"),
            Err(PersistenceError::Write { .. })
        ));
    }
}
