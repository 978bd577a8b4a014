//! Dataset description loading.
//!
//! The description is a JSON object mapping a sample id to
//! `{"path": "...", "emotion": "..."}`. Entries keep document order so that
//! seeded fold assignment is reproducible against the file.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::labels::{Emotion, LabelError};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset description {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed dataset description: {0}")]
    Parse(String),

    #[error("Sample {id}: {source}")]
    UnknownEmotion { id: String, source: LabelError },

    #[error("Dataset is empty")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    path: PathBuf,
    emotion: String,
}

/// One labelled audio clip
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: String,
    pub path: PathBuf,
    pub emotion: Emotion,
}

/// Ordered collection of samples
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    /// Load a dataset description, dropping every sample labelled `excluded`
    pub fn load(path: &Path, excluded: Option<Emotion>) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::parse(&content, excluded)?;
        info!(
            "Loaded {} samples from {:?} (excluded: {})",
            dataset.len(),
            path,
            excluded.map(|e| e.as_str()).unwrap_or("none")
        );
        Ok(dataset)
    }

    /// Parse a dataset description from a JSON string
    pub fn parse(content: &str, excluded: Option<Emotion>) -> Result<Self, DatasetError> {
        let entries: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(content).map_err(|e| DatasetError::Parse(e.to_string()))?;

        let mut samples = Vec::with_capacity(entries.len());
        for (id, value) in entries {
            let raw: RawEntry = serde_json::from_value(value)
                .map_err(|e| DatasetError::Parse(format!("sample {}: {}", id, e)))?;

            let emotion: Emotion = raw
                .emotion
                .parse()
                .map_err(|source| DatasetError::UnknownEmotion {
                    id: id.clone(),
                    source,
                })?;

            if Some(emotion) == excluded {
                debug!("Skipping sample {} ({})", id, emotion);
                continue;
            }

            samples.push(Sample {
                id,
                path: raw.path,
                emotion,
            });
        }

        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Label vector in sample order
    pub fn labels(&self) -> Vec<Emotion> {
        self.samples.iter().map(|s| s.emotion).collect()
    }

    /// Pick one sample uniformly at random
    pub fn random_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&Sample, DatasetError> {
        self.samples.choose(rng).ok_or(DatasetError::Empty)
    }
}
