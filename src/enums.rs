use serde::{Deserialize, Serialize};

/// Ordering applied to the slices of a series.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    /// Position projected onto the slice normal, ties broken by InstanceNumber.
    #[default]
    ImagePositionPatient,
    InstanceNumber,
}

/// How identifiers are treated when a processed volume is written back.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    /// Every attribute except PixelData is kept as-is.
    #[default]
    Preserve,
    /// New SeriesInstanceUID/SOPInstanceUIDs and an annotated SeriesDescription.
    Mint,
}

/// What happens to original slices past the end of the processed volume.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LeftoverPolicy {
    /// Copy them to the output unchanged so the series stays complete.
    #[default]
    CopyVerbatim,
    /// Leave them out of the output.
    Drop,
}
