use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enums::{HeaderMode, LeftoverPolicy};
use crate::error::Result;
use crate::model::CommandModel;
use crate::reinjector::{DEFAULT_ANNOTATION, ReinjectOptions};

/// Settings for a batch defacing run, loadable from a JSON file.
///
/// Every field has a default, so `{}` is a valid configuration (apart from
/// the model program, which the command line usually supplies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub work_root: PathBuf,
    /// Keep `nifti_in`/`nifti_out` after each case.
    pub keep_intermediate: bool,
    /// Mirror of the selected NIfTI volumes, one per case.
    pub nifti_root_out: Option<PathBuf>,
    pub header_mode: HeaderMode,
    pub annotation: String,
    /// Cases processed at the same time.
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            work_root: PathBuf::from("work_deface_batch"),
            keep_intermediate: false,
            nifti_root_out: None,
            header_mode: HeaderMode::Preserve,
            annotation: DEFAULT_ANNOTATION.to_string(),
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub env: BTreeMap<String, String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        // CPU-only unless the configuration says otherwise
        let env = BTreeMap::from([("CUDA_VISIBLE_DEVICES".to_string(), String::new())]);
        Self {
            program: None,
            args: Vec::new(),
            timeout_secs: 3600,
            env,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn reinject_options(&self) -> ReinjectOptions {
        ReinjectOptions {
            header_mode: self.header_mode,
            leftover: LeftoverPolicy::CopyVerbatim,
            annotation: self.annotation.clone(),
        }
    }

    /// The configured model command, or `None` when no program is set.
    pub fn command_model(&self) -> Option<CommandModel> {
        let program = self.model.program.as_ref()?;
        let mut model = CommandModel::new(program);
        model.args = self.model.args.clone();
        model.env = self.model.env.clone();
        model.timeout = Duration::from_secs(self.model.timeout_secs);
        Some(model)
    }
}
