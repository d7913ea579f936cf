//! Directory-backed result store
//!
//! ```text
//! <root>/
//!   noise_<level>/rep_<nnn>/stage_<kk>_<skill>.txt
//!   noise_<level>/rep_<nnn>/experiment.json
//!   cost_report.json
//!   analysis_report.json
//! ```

use crate::cost::CostReport;
use crate::error::PersistenceError;
use crate::pipeline::Experiment;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const EXPERIMENT_FILE: &str = "experiment.json";
pub const COST_REPORT_FILE: &str = "cost_report.json";
pub const ANALYSIS_REPORT_FILE: &str = "analysis_report.json";

#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Keep skill ids filesystem-safe
fn file_safe(skill_id: &str) -> String {
    skill_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn experiment_dir(&self, noise_level: u8, repetition: u32) -> PathBuf {
        self.root
            .join(format!("noise_{}", noise_level))
            .join(format!("rep_{:03}", repetition))
    }

    pub fn stage_path(
        &self,
        noise_level: u8,
        repetition: u32,
        stage_index: usize,
        skill_id: &str,
    ) -> PathBuf {
        self.experiment_dir(noise_level, repetition)
            .join(format!("stage_{:02}_{}.txt", stage_index, file_safe(skill_id)))
    }

    pub fn write_stage_output(
        &self,
        noise_level: u8,
        repetition: u32,
        stage_index: usize,
        skill_id: &str,
        text: &str,
    ) -> Result<PathBuf, PersistenceError> {
        let dir = self.experiment_dir(noise_level, repetition);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let path = self.stage_path(noise_level, repetition, stage_index, skill_id);
        fs::write(&path, text).map_err(io_err(&path))?;
        debug!(path = %path.display(), "stage output written");
        Ok(path)
    }

    /// Stage output files of one experiment, in stage order
    pub fn stage_files(
        &self,
        noise_level: u8,
        repetition: u32,
    ) -> Result<Vec<PathBuf>, PersistenceError> {
        let dir = self.experiment_dir(noise_level, repetition);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
            let path = entry.map_err(io_err(&dir))?.path();
            let is_stage = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("stage_") && n.ends_with(".txt"));
            if is_stage {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn write_experiment(&self, experiment: &Experiment) -> Result<PathBuf, PersistenceError> {
        let dir = self.experiment_dir(experiment.noise_level, experiment.repetition);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        self.write_json_at(&dir.join(EXPERIMENT_FILE), experiment)
    }

    pub fn write_cost_report(&self, report: &CostReport) -> Result<PathBuf, PersistenceError> {
        self.write_json(COST_REPORT_FILE, report)
    }

    pub fn write_analysis_report<T: Serialize>(
        &self,
        report: &T,
    ) -> Result<PathBuf, PersistenceError> {
        self.write_json(ANALYSIS_REPORT_FILE, report)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, PersistenceError> {
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;
        self.write_json_at(&self.root.join(name), value)
    }

    fn write_json_at<T: Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<PathBuf, PersistenceError> {
        let json = serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err(path))?;
        debug!(path = %path.display(), "json written");
        Ok(path.to_path_buf())
    }

    /// Load every `experiment.json` below the root, ordered by key
    pub fn load_experiments(&self) -> Result<Vec<Experiment>, PersistenceError> {
        let mut experiments = Vec::new();
        if !self.root.exists() {
            return Ok(experiments);
        }
        for level_dir in sorted_subdirs(&self.root, "noise_")? {
            for rep_dir in sorted_subdirs(&level_dir, "rep_")? {
                let path = rep_dir.join(EXPERIMENT_FILE);
                if !path.exists() {
                    continue;
                }
                let content = fs::read_to_string(&path).map_err(io_err(&path))?;
                let experiment: Experiment =
                    serde_json::from_str(&content).map_err(|source| PersistenceError::Json {
                        path: path.clone(),
                        source,
                    })?;
                experiments.push(experiment);
            }
        }
        experiments.sort_by_key(|e| (e.noise_level, e.repetition));
        Ok(experiments)
    }
}

fn sorted_subdirs(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, PersistenceError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix));
        if matches && path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ExperimentStatus;
    use tempfile::TempDir;

    fn experiment(noise_level: u8, repetition: u32) -> Experiment {
        Experiment {
            noise_level,
            repetition,
            seed: 42,
            original_text: "hello world".to_string(),
            noisy_text: "helo world".to_string(),
            stage_outputs: Vec::new(),
            final_text: Some("hello world".to_string()),
            status: ExperimentStatus::Completed,
        }
    }

    #[test]
    fn test_stage_path_layout() {
        let store = ResultStore::new("/tmp/results");
        let path = store.stage_path(25, 2, 1, "french-to-hebrew-translator");
        assert_eq!(
            path,
            PathBuf::from("/tmp/results/noise_25/rep_002/stage_01_french-to-hebrew-translator.txt")
        );
    }

    #[test]
    fn test_skill_id_sanitized() {
        assert_eq!(file_safe("a/b c"), "a_b_c");
    }

    #[test]
    fn test_write_and_list_stage_files() {
        let temp = TempDir::new().unwrap();
        let store = ResultStore::new(temp.path());
        store.write_stage_output(10, 0, 1, "b", "second").unwrap();
        store.write_stage_output(10, 0, 0, "a", "first").unwrap();

        let files = store.stage_files(10, 0).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "first");
        assert!(store.stage_files(99, 0).unwrap().is_empty());
    }

    #[test]
    fn test_experiment_roundtrip_via_load() {
        let temp = TempDir::new().unwrap();
        let store = ResultStore::new(temp.path());
        store.write_experiment(&experiment(50, 1)).unwrap();
        store.write_experiment(&experiment(0, 0)).unwrap();

        let loaded = store.load_experiments().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].noise_level, 0);
        assert_eq!(loaded[1], experiment(50, 1));
    }

    #[test]
    fn test_load_from_missing_root() {
        let store = ResultStore::new("/nonexistent/semdrift/results");
        assert!(store.load_experiments().unwrap().is_empty());
    }
}
