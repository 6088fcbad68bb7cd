use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No DICOM series found under {}", root.display())]
    NoSeriesFound { root: PathBuf },

    #[error("Inconsistent geometry in series {series_uid}: {reason}")]
    InconsistentGeometry { series_uid: String, reason: String },

    #[error(
        "No defacing applied: {} is voxel-wise identical to the input volume",
        candidate.display()
    )]
    NoDefacingApplied { candidate: PathBuf },

    #[error("Ambiguous model output, candidates: {}", display_paths(candidates))]
    AmbiguousOutput { candidates: Vec<PathBuf> },

    #[error("Missing model output in {}: found only {}", dir.display(), display_paths(masks))]
    MissingOutput { dir: PathBuf, masks: Vec<PathBuf> },

    #[error("No DICOM series matches a volume of shape {shape:?} ({series_count} series inspected)")]
    NoMatchingSeries {
        shape: (usize, usize, usize),
        series_count: usize,
    },

    #[error("Series {uid} not found under {}", root.display())]
    UnknownSeries { uid: String, root: PathBuf },

    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("Missing or invalid attribute {name} in {}", path.display())]
    MissingAttribute { name: &'static str, path: PathBuf },

    #[error("Unsupported pixel layout in {}: {reason}", path.display())]
    UnsupportedPixelData { path: PathBuf, reason: String },

    #[error("Unsupported volume {}: {reason}", path.display())]
    UnsupportedVolume { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM read error: {0}")]
    DicomRead(#[from] dicom::object::ReadError),

    #[error("DICOM write error: {0}")]
    DicomWrite(#[from] dicom::object::WriteError),

    #[error("DICOM file meta error: {0}")]
    DicomMeta(#[from] dicom::object::meta::Error),

    #[error("Pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("Sidecar error: {0}")]
    Sidecar(#[from] serde_json::Error),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pipeline stage at which a case failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Group,
    Assemble,
    Model,
    Select,
    Match,
    Reinject,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Group => "series grouping",
            Stage::Assemble => "volume assembly",
            Stage::Model => "model invocation",
            Stage::Select => "candidate selection",
            Stage::Match => "series matching",
            Stage::Reinject => "slice reinjection",
            Stage::Publish => "publishing",
        };
        f.write_str(name)
    }
}

/// A failure recorded against one case of a batch run.
#[derive(Debug, Error)]
#[error("case '{case}' failed at {stage}: {source}")]
pub struct CaseError {
    pub case: String,
    pub stage: Stage,
    #[source]
    pub source: Error,
}

/// Attaches the failing [`Stage`] to a per-case result.
pub(crate) trait StageContext<T> {
    fn at(self, case: &str, stage: Stage) -> Result<T, CaseError>;
}

impl<T> StageContext<T> for Result<T> {
    fn at(self, case: &str, stage: Stage) -> Result<T, CaseError> {
        self.map_err(|source| CaseError {
            case: case.to_owned(),
            stage,
            source,
        })
    }
}
