use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cv::CvConfig;
use crate::features::FeatureConfig;
use crate::labels::Emotion;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,

    /// Dataset description (`{id: {path, emotion}}`)
    pub dataset_path: PathBuf,
    /// Where the trained model is written
    pub model_path: PathBuf,

    // Experiment tracking
    pub tracking_uri: String,
    pub experiment_name: String,

    /// Emotion dropped from training
    pub excluded_emotion: Option<Emotion>,

    pub features: FeatureConfig,
    pub cv: CvConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            dataset_path: PathBuf::from("modified_shemo.json"),
            model_path: PathBuf::from("model.json"),
            tracking_uri: "http://mlflow:5000".to_string(),
            experiment_name: "svm-shemo-docker".to_string(),
            excluded_emotion: Some(Emotion::Fear),
            features: FeatureConfig::default(),
            cv: CvConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .context("Failed to read config file")?;
            serde_json::from_str(&content)
                .context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, content)
            .context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Failed to get home directory")?;
        Ok(home.join(".ser-svm"))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }

    /// Worker threads for both feature extraction and inner folds
    pub fn set_jobs(&mut self, n_jobs: usize) {
        self.features.n_jobs = n_jobs;
        self.cv.search.n_jobs = n_jobs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::SearchSpace;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.excluded_emotion, Some(Emotion::Fear));
        assert_eq!(config.cv.outer_folds, 5);
        assert_eq!(config.cv.search.inner_folds, 10);
        assert_eq!(config.cv.search.n_iter, 50);
        assert_eq!(config.cv.search.n_initial_points, 10);
        assert_eq!(config.cv.search.seed, 42);
        assert_eq!(config.features.sample_rate, 16000);
        assert_eq!(config.model_path, PathBuf::from("model.json"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_load_preserves_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");

        let mut config = Config::default();
        config.tracking_uri = "file:/tmp/runs".to_string();
        config.excluded_emotion = None;
        config.set_jobs(3);
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.cv.search.n_jobs, 3);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"experiment_name": "local", "excluded_emotion": "neutral"}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.experiment_name, "local");
        assert_eq!(config.excluded_emotion, Some(Emotion::Neutral));
        assert_eq!(config.cv, CvConfig::default());
    }

    #[test]
    fn test_partial_nested_sections_fill_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"cv": {"search": {"n_iter": 20, "space": {"c": [1.0, 10.0]}}}, "features": {"n_jobs": 4}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.cv.outer_folds, 5);
        assert_eq!(config.cv.search.n_iter, 20);
        assert_eq!(config.cv.search.n_initial_points, 10);
        assert_eq!(config.cv.search.seed, 42);
        assert_eq!(config.cv.search.space.c, vec![1.0, 10.0]);
        assert_eq!(config.cv.search.space.gamma, SearchSpace::default().gamma);
        assert_eq!(config.features.n_jobs, 4);
        assert_eq!(
            config.features,
            FeatureConfig {
                n_jobs: 4,
                ..FeatureConfig::default()
            }
        );
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
