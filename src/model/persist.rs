use std::path::Path;
use tracing::info;

use super::{EmotionModel, ModelError};

impl EmotionModel {
    /// Write the model as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let io_err = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)?;

        info!("Saved model to {:?}", path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model: Self = serde_json::from_str(&content)?;
        info!(
            "Loaded model from {:?} ({} classes, C={}, gamma={})",
            path,
            model.classes.len(),
            model.params().c,
            model.params().gamma
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureConfig;
    use crate::model::{SvcParams, SvmPipeline};
    use ndarray::array;
    use tempfile::tempdir;

    fn small_model() -> EmotionModel {
        let x = array![[0.0, 1.0], [0.1, 0.9], [2.0, -1.0], [2.1, -1.2], [4.0, 3.0], [4.2, 3.1]];
        let y = [0, 0, 3, 3, 4, 4];
        let pipeline = SvmPipeline::fit(x.view(), &y, SvcParams::new(1.0, 0.5)).unwrap();
        EmotionModel::new(pipeline, FeatureConfig::default()).unwrap()
    }

    #[test]
    fn test_saved_model_predicts_identically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let model = small_model();
        model.save(&path).unwrap();

        let loaded = EmotionModel::load(&path).unwrap();
        assert_eq!(loaded, model);
        for row in [[0.0, 1.0], [2.0, -1.0], [4.1, 3.0], [1.0, 0.0]] {
            assert_eq!(loaded.predict(&row).unwrap(), model.predict(&row).unwrap());
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = EmotionModel::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ModelError::Io { .. }));
    }

    #[test]
    fn test_load_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{\"pipeline\": 3}").unwrap();
        assert!(matches!(
            EmotionModel::load(&path),
            Err(ModelError::Serialize(_))
        ));
    }
}
