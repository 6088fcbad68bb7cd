use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::enums::SortBy;
use crate::error::{Error, Result};
use crate::nifti_io;
use crate::series::Series;
use crate::series_grouper::SeriesGrouper;
use crate::sidecar::MetadataSidecar;
use crate::volume::Volume;

/// Channel suffix the defacing model expects on its single input volume.
pub const CHANNEL_SUFFIX: &str = "_0000";

/// Files produced by a forward conversion.
#[derive(Debug, Clone)]
pub struct AssembledVolume {
    pub volume: Volume,
    pub nifti_path: PathBuf,
    pub sidecar_path: PathBuf,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from an ordered series
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentGeometry`] if the slices do not share one
    /// in-plane shape, or a decoding error for unreadable pixel data.
    pub fn load_from_series(series: &Series) -> Result<Volume> {
        let (rows, columns) = series
            .in_plane_shape()
            .ok_or_else(|| Error::InconsistentGeometry {
                series_uid: series.uid().to_string(),
                reason: "series has no slices".to_string(),
            })?;
        Self::validate_dimensions(series, rows, columns)?;

        let images: Vec<Array2<f32>> = series
            .slices()
            .par_iter()
            .map(|slice| slice.load_pixels())
            .collect::<Result<_>>()?;

        for (slice, image) in series.slices().iter().zip(&images) {
            if image.dim() != (rows, columns) {
                return Err(Error::InconsistentGeometry {
                    series_uid: series.uid().to_string(),
                    reason: format!(
                        "decoded pixel data of {} is {:?}, expected {:?}",
                        slice.path.display(),
                        image.dim(),
                        (rows, columns)
                    ),
                });
            }
        }

        let geometry = series.geometry();
        debug!(
            series = series.uid(),
            spacing = ?geometry.spacing,
            "assembled series geometry"
        );
        Ok(Volume::new(Self::build_volume_array(&images), geometry))
    }

    /// Load the default series found under a directory
    pub fn load_from_directory(path: impl AsRef<Path>) -> Result<Volume> {
        let set = SeriesGrouper::scan(path, SortBy::default())?;
        let series = set.primary().ok_or_else(|| Error::NoSeriesFound {
            root: set.root().to_path_buf(),
        })?;
        Self::load_from_series(series)
    }

    /// Forward conversion: write `<stem>_0000.nii.gz` and its sidecar into `out_dir`.
    pub fn assemble_to(series: &Series, out_dir: impl AsRef<Path>, stem: &str) -> Result<AssembledVolume> {
        let out_dir = out_dir.as_ref();
        std::fs::create_dir_all(out_dir)?;

        let volume = Self::load_from_series(series)?;
        let nifti_path = out_dir.join(format!("{stem}{CHANNEL_SUFFIX}.nii.gz"));
        nifti_io::write_volume(&nifti_path, &volume)?;

        let sidecar = MetadataSidecar::from_series(series, &volume.geometry);
        let sidecar_path = MetadataSidecar::path_for(&nifti_path);
        sidecar.write(&sidecar_path)?;

        info!(
            series = series.uid(),
            dim = ?volume.dim(),
            nifti = %nifti_path.display(),
            "wrote NIfTI volume"
        );
        Ok(AssembledVolume {
            volume,
            nifti_path,
            sidecar_path,
        })
    }

    fn validate_dimensions(series: &Series, rows: usize, columns: usize) -> Result<()> {
        match series
            .slices()
            .iter()
            .find(|slice| (slice.rows, slice.columns) != (rows, columns))
        {
            Some(slice) => Err(Error::InconsistentGeometry {
                series_uid: series.uid().to_string(),
                reason: format!(
                    "{} is {}x{}, expected {}x{}",
                    slice.path.display(),
                    slice.rows,
                    slice.columns,
                    rows,
                    columns
                ),
            }),
            None => Ok(()),
        }
    }

    fn build_volume_array(images: &[Array2<f32>]) -> Array3<f32> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }
}
