//! # DICOM-deface library
//!
//! This crate converts DICOM image series to NIfTI volumes and back without
//! disturbing the DICOM metadata, so that a volumetric model (a defacing
//! model, typically) can be run on a series and its result written back as
//! a viewer-valid series.

//!
//! The crate builds on the dicom-rs ecosystem for reading and writing DICOM
//! objects and on the `nifti` crate for volumes. Slices are parsed and
//! decoded in parallel using rayon. Two reconstruction paths exist:
//!  - Reinjection: a processed volume is written back into the original
//!    series. Every attribute except PixelData is kept, optionally with new
//!    series/instance UIDs and an annotated SeriesDescription.
//!  - Sidecar: a bare volume is turned into a new series using the JSON
//!    metadata captured during the forward conversion.
//!
//! DICOM files are assumed to have the following attributes:
//!   - Single frame, single sample per pixel (multiframe objects are skipped)
//!   - One SeriesInstanceUID per acquisition
//!
//! Sequence attributes survive reinjection but are not carried by the
//! sidecar.
//!
//! # Examples
//!
//! ## Converting a series to NIfTI
//!
//! ```no_run
//! # use dicom_deface::{SeriesGrouper, SortBy, VolumeLoader};
//! let set = SeriesGrouper::scan("dicom", SortBy::ImagePositionPatient)
//!     .expect("should have found a series");
//! let series = set.single().expect("should contain exactly one series");
//! let assembled = VolumeLoader::assemble_to(series, "nifti_in", series.uid())
//!     .expect("should have written the volume");
//! println!("{}", assembled.nifti_path.display());
//! ```
//!
//! ## Writing a processed volume back
//!
//! ```no_run
//! # use dicom_deface::{nifti_io, ReinjectOptions, SeriesGrouper, SeriesMatcher, SliceReinjector, SortBy};
//! let volume = nifti_io::read_volume("nifti_out/case_defaced.nii.gz")
//!     .expect("should have read the processed volume");
//! let set = SeriesGrouper::scan("dicom", SortBy::default()).expect("should have found a series");
//! let series = SeriesMatcher::best_match(&volume, &set).expect("should match a series");
//! SliceReinjector::new(ReinjectOptions::default())
//!     .reinject(series, &volume, "dicom_defaced")
//!     .expect("should have written the series");
//! ```

pub mod candidate;
pub mod config;
pub mod enums;
pub mod error;
pub mod geometry;
pub mod matcher;
pub mod model;
pub mod nifti_io;
pub mod pipeline;
mod pixels;
pub mod reinjector;
pub mod series;
pub mod series_grouper;
pub mod sidecar;
pub mod slice;
pub mod uid;
pub mod volume;
pub mod volume_loader;

pub use candidate::{CandidateSelector, Selection};
pub use config::PipelineConfig;
pub use enums::{HeaderMode, LeftoverPolicy, SortBy};
pub use error::{CaseError, Error, Result, Stage};
pub use geometry::Geometry;
pub use matcher::SeriesMatcher;
pub use model::{CommandModel, DefacingModel, ModelOutput, ModelRequest};
pub use pipeline::{BatchReport, CaseReport, ConversionJob, Pipeline};
pub use reinjector::{ReinjectOptions, ReinjectPlan, ReinjectReport, SliceReinjector};
pub use series::Series;
pub use series_grouper::{SeriesGrouper, SeriesSet};
pub use sidecar::MetadataSidecar;
pub use slice::Slice;
pub use volume::Volume;
pub use volume_loader::{AssembledVolume, VolumeLoader};
