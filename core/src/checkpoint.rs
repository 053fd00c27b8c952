//! Saved experiment directories: `config.yaml` next to a `checkpoint/` folder of model files.

use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use safetensors::SafeTensors;
use serde_json::Value;
use tracing::info;

use crate::{config::read_yaml_config, Error, Result};

pub const CONFIG_FILE: &str = "config.yaml";
pub const CHECKPOINT_DIR: &str = "checkpoint";

/// Which model file of a run to load.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckpointSelector {
    Latest,
    Best,
    Epoch(u64),
}

impl CheckpointSelector {
    /// An explicit epoch wins over `best`, which wins over the latest snapshot.
    pub fn resolve(best: bool, epoch: Option<u64>) -> Self {
        match (epoch, best) {
            (Some(epoch), _) => Self::Epoch(epoch),
            (None, true) => Self::Best,
            (None, false) => Self::Latest,
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            Self::Latest => "model.pt".to_string(),
            Self::Best => "model_best.pt".to_string(),
            Self::Epoch(epoch) => format!("model_epoch-{epoch}.pt"),
        }
    }

    pub fn path_in(&self, run_dir: &Path) -> PathBuf {
        run_dir.join(CHECKPOINT_DIR).join(self.file_name())
    }
}

impl fmt::Display for CheckpointSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Best => write!(f, "best"),
            Self::Epoch(epoch) => write!(f, "epoch {epoch}"),
        }
    }
}

/// One tensor copied out of a checkpoint into host memory.
#[derive(Clone, Debug, PartialEq)]
pub struct HostTensor {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl HostTensor {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Deserialized model parameters. Every tensor lives on the host regardless of
/// the device it was saved from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelState {
    pub tensors: BTreeMap<String, HostTensor>,
    pub metadata: BTreeMap<String, String>,
}

impl ModelState {
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, safetensors::SafeTensorError> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let metadata: BTreeMap<String, String> = header
            .metadata()
            .as_ref()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let parsed = SafeTensors::deserialize(bytes)?;
        let tensors: BTreeMap<String, HostTensor> = parsed
            .tensors()
            .into_iter()
            .map(|(name, view)| {
                let tensor = HostTensor {
                    dtype: format!("{:?}", view.dtype()),
                    shape: view.shape().to_vec(),
                    data: view.data().to_vec(),
                };
                (name, tensor)
            })
            .collect();

        Ok(Self { tensors, metadata })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| Error::file("read checkpoint", path, e))?;
        Self::from_bytes(&bytes).map_err(|e| Error::Checkpoint {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(HostTensor::numel).sum()
    }
}

/// Load the configuration and a trained model from a run directory.
///
/// Fails before touching any file when `path` does not exist.
pub fn load_config_and_model(
    path: &Path,
    best: bool,
    epoch: Option<u64>,
) -> Result<(Value, ModelState)> {
    if !path.exists() {
        return Err(Error::MissingPath(path.to_path_buf()));
    }

    let config_file = path.join(CONFIG_FILE);
    info!("load config from {}", config_file.display());
    let config = read_yaml_config(&config_file)?;

    let selector = CheckpointSelector::resolve(best, epoch);
    let model_path = selector.path_in(path);
    info!("load {selector} model from {}", model_path.display());
    let model = ModelState::load(&model_path)?;

    Ok((config, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::{tensor::TensorView, Dtype};
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn write_checkpoint(path: &Path, marker: f32) {
        let weight = f32_bytes(&[marker, 2.0, 3.0, 4.0]);
        let bias = f32_bytes(&[0.5, -0.5]);
        let tensors = vec![
            ("actor.weight", TensorView::new(Dtype::F32, vec![2, 2], &weight).unwrap()),
            ("actor.bias", TensorView::new(Dtype::F32, vec![2], &bias).unwrap()),
        ];
        let mut info = HashMap::new();
        info.insert("epoch".to_string(), marker.to_string());
        let bytes = safetensors::serialize(tensors, &Some(info)).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn run_dir() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "task: SafetyCarCircle\ncost_limit: 20\nhidden_sizes: [64, 64]\n",
        )
        .unwrap();
        let ckpt = dir.path().join(CHECKPOINT_DIR);
        write_checkpoint(&ckpt.join("model.pt"), 1.0);
        write_checkpoint(&ckpt.join("model_best.pt"), 7.0);
        write_checkpoint(&ckpt.join("model_epoch-3.pt"), 3.0);
        dir
    }

    fn first_weight(model: &ModelState) -> f32 {
        let data = &model.tensors["actor.weight"].data;
        f32::from_le_bytes([data[0], data[1], data[2], data[3]])
    }

    #[test]
    fn selector_priority() {
        assert_eq!(CheckpointSelector::resolve(false, None), CheckpointSelector::Latest);
        assert_eq!(CheckpointSelector::resolve(true, None), CheckpointSelector::Best);
        assert_eq!(CheckpointSelector::resolve(true, Some(4)), CheckpointSelector::Epoch(4));
        assert_eq!(CheckpointSelector::Epoch(12).file_name(), "model_epoch-12.pt");
        assert_eq!(CheckpointSelector::Best.file_name(), "model_best.pt");
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");

        let err = load_config_and_model(&missing, false, None).unwrap_err();
        assert!(matches!(err, Error::MissingPath(ref p) if p == &missing));
        assert!(err.to_string().ends_with("doesn't exist!"));
    }

    #[test]
    fn loads_latest_model_and_config() {
        let dir = run_dir();
        let (config, model) = load_config_and_model(dir.path(), false, None).unwrap();

        assert_eq!(config["cost_limit"], json!(20));
        assert_eq!(config["hidden_sizes"], json!([64, 64]));
        assert_eq!(first_weight(&model), 1.0);
        assert_eq!(model.tensors["actor.weight"].dtype, "F32");
        assert_eq!(model.tensors["actor.bias"].shape, vec![2]);
        assert_eq!(model.parameter_count(), 6);
        assert_eq!(model.metadata.get("epoch").map(String::as_str), Some("1"));
    }

    #[test]
    fn best_and_epoch_pick_their_files() {
        let dir = run_dir();
        let (_, best) = load_config_and_model(dir.path(), true, None).unwrap();
        let (_, epoch) = load_config_and_model(dir.path(), true, Some(3)).unwrap();

        assert_eq!(first_weight(&best), 7.0);
        assert_eq!(first_weight(&epoch), 3.0);
    }

    #[test]
    fn absent_checkpoint_file_is_an_io_error() {
        let dir = run_dir();
        let err = load_config_and_model(dir.path(), false, Some(99)).unwrap_err();
        assert!(matches!(err, Error::File { .. }));
        assert!(err.to_string().contains("model_epoch-99.pt"));
    }

    #[test]
    fn corrupt_checkpoint_is_rejected() {
        let dir = run_dir();
        fs::write(dir.path().join(CHECKPOINT_DIR).join("model.pt"), b"garbage").unwrap();
        let err = load_config_and_model(dir.path(), false, None).unwrap_err();
        assert!(matches!(err, Error::Checkpoint { .. }));
    }
}
