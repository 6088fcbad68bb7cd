use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::ModelOutput;
use crate::nifti_io;
use crate::volume::Volume;

/// The processed volume chosen from a model run.
#[derive(Debug, Clone)]
pub struct Selection {
    pub path: PathBuf,
    pub volume: Volume,
    /// Voxels that differ from the input, `None` when the shapes differ.
    pub changed_voxels: Option<usize>,
}

pub struct CandidateSelector;

impl CandidateSelector {
    /// Pick the processed volume from the model output.
    ///
    /// A volume marked as processed wins; otherwise the single unlabeled
    /// volume is used. Masks are never candidates.
    ///
    /// # Errors
    ///
    /// [`Error::AmbiguousOutput`] when more than one candidate qualifies at the
    /// deciding rule, [`Error::MissingOutput`] when nothing but masks exists.
    pub fn choose(output: &ModelOutput) -> Result<&Path> {
        let candidates = if output.processed.is_empty() {
            &output.unlabeled
        } else {
            &output.processed
        };

        match candidates.as_slice() {
            [single] => Ok(single),
            [] => Err(Error::MissingOutput {
                dir: output.dir.clone(),
                masks: output.masks.clone(),
            }),
            many => Err(Error::AmbiguousOutput {
                candidates: many.to_vec(),
            }),
        }
    }

    /// Reject a candidate that is bit-identical to the model input.
    ///
    /// Returns the number of changed voxels, or `None` when the shapes differ
    /// (the model resampled or cropped), which is accepted as processed.
    pub fn verify(path: &Path, candidate: &Volume, input: &Volume) -> Result<Option<usize>> {
        match candidate.count_differences(input) {
            Some(0) => Err(Error::NoDefacingApplied {
                candidate: path.to_path_buf(),
            }),
            Some(changed) => {
                info!(candidate = %path.display(), changed, "voxels changed by model");
                Ok(Some(changed))
            }
            None => {
                warn!(
                    candidate = %path.display(),
                    candidate_dim = ?candidate.dim(),
                    input_dim = ?input.dim(),
                    "candidate shape differs from input, assuming defacing applied"
                );
                Ok(None)
            }
        }
    }

    /// Choose, read and verify the processed volume.
    pub fn select(output: &ModelOutput, input: &Volume) -> Result<Selection> {
        let path = Self::choose(output)?.to_path_buf();
        let volume = nifti_io::read_volume(&path)?;
        let changed_voxels = Self::verify(&path, &volume, input)?;
        Ok(Selection {
            path,
            volume,
            changed_voxels,
        })
    }
}
