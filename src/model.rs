//! Boundary to the external defacing model.
//!
//! The model is a black box that reads one NIfTI volume from an input
//! directory and writes a mask and, normally, a defaced volume into an output
//! directory. Its results are returned as a [`ModelOutput`] so the rest of the
//! crate never inspects output file names itself.

use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::nifti_io::is_nifti;

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Volumes found in a model output directory, by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOutput {
    pub dir: PathBuf,
    /// Volumes explicitly marked as the defaced result
    pub processed: Vec<PathBuf>,
    pub masks: Vec<PathBuf>,
    /// Volumes carrying neither marker
    pub unlabeled: Vec<PathBuf>,
}

impl ModelOutput {
    /// Classify the NIfTI files of `dir`. Each list is sorted, so the result
    /// does not depend on directory enumeration order.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut output = ModelOutput {
            dir: dir.to_path_buf(),
            ..Default::default()
        };

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_nifti(path))
            .collect();
        paths.sort();

        for path in paths {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if name.contains("mask") {
                output.masks.push(path);
            } else if name.contains("defaced") {
                output.processed.push(path);
            } else {
                output.unlabeled.push(path);
            }
        }
        Ok(output)
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty() && self.masks.is_empty() && self.unlabeled.is_empty()
    }
}

pub trait DefacingModel {
    /// Run the model on `request.input_dir`, writing into `request.output_dir`.
    fn invoke(&self, request: &ModelRequest) -> impl Future<Output = Result<ModelOutput>> + Send;
}

/// Runs the model as a subprocess: `<program> <args> -i <in> -o <out> <extra_args>`.
#[derive(Debug, Clone)]
pub struct CommandModel {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub extra_args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl CommandModel {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            extra_args: Vec::new(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(3600),
        }
    }

    fn command(&self, request: &ModelRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("-i")
            .arg(&request.input_dir)
            .arg("-o")
            .arg(&request.output_dir)
            .args(&self.extra_args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl DefacingModel for CommandModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelOutput> {
        let program = self.program.display().to_string();
        info!(%program, input = %request.input_dir.display(), "invoking defacing model");

        let mut child = self
            .command(request)
            .spawn()
            .map_err(|e| Error::ModelInvocation(format!("failed to start {program}: {e}")))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                if let Err(error) = child.kill().await {
                    warn!(%program, %error, "failed to kill timed out model");
                }
                return Err(Error::ModelInvocation(format!(
                    "{program} timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        let output = ModelOutput::from_directory(&request.output_dir)?;
        if output.is_empty() {
            return Err(Error::ModelInvocation(format!(
                "{program} exited with {status} and wrote no NIfTI output to {}",
                request.output_dir.display()
            )));
        }
        // the model may fail in post-processing after its volumes are written
        if !status.success() {
            warn!(%program, %status, "model exited unsuccessfully but produced output, continuing");
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn classifies_outputs_by_role() {
        let dir = tempfile::tempdir().unwrap();
        let mask = touch(dir.path(), "case_mask.nii.gz");
        let defaced = touch(dir.path(), "case_defaced.nii.gz");
        let plain = touch(dir.path(), "case.nii.gz");
        touch(dir.path(), "plans.json");

        let output = ModelOutput::from_directory(dir.path()).unwrap();
        assert_eq!(output.masks, vec![mask]);
        assert_eq!(output.processed, vec![defaced]);
        assert_eq!(output.unlabeled, vec![plain]);
    }

    #[test]
    fn a_defaced_mask_is_still_a_mask() {
        let dir = tempfile::tempdir().unwrap();
        let mask = touch(dir.path(), "case_defaced_mask.nii");
        let output = ModelOutput::from_directory(dir.path()).unwrap();
        assert_eq!(output.masks, vec![mask]);
        assert!(output.processed.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_without_output_is_an_invocation_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = ModelRequest {
            input_dir: dir.path().join("in"),
            output_dir: dir.path().to_path_buf(),
        };
        let model = CommandModel::new("false");
        let error = model.invoke(&request).await.unwrap_err();
        assert!(matches!(error, Error::ModelInvocation(_)), "{error}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let request = ModelRequest {
            input_dir: dir.path().to_path_buf(),
            output_dir: dir.path().to_path_buf(),
        };
        let mut model = CommandModel::new("sh");
        model.args = vec!["-c".into(), "sleep 5".into(), "model".into()];
        model.timeout = Duration::from_millis(100);
        let error = model.invoke(&request).await.unwrap_err();
        assert!(error.to_string().contains("timed out"), "{error}");
    }
}
