//! Reading and writing volumes as NIfTI-1 files.
//!
//! NIfTI arrays are indexed `[x, y, z]` with x varying fastest on disk,
//! which is exactly the memory order of a `(slice, row, column)` volume, so
//! conversion is an axis reversal in both directions.

use std::path::Path;

use ndarray::{Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::volume::Volume;

const NIFTI_UNITS_MM: u8 = 2;
const NIFTI_XFORM_SCANNER_ANAT: i16 = 1;

/// Whether `path` names a NIfTI file (`.nii` or `.nii.gz`).
pub fn is_nifti(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            let name = name.to_ascii_lowercase();
            name.ends_with(".nii") || name.ends_with(".nii.gz")
        })
}

/// File name with the `.nii` / `.nii.gz` extension removed.
pub fn stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    name.strip_suffix(".nii").unwrap_or(name).to_string()
}

/// Write a volume, compressed when the path ends in `.gz`.
///
/// Integral volumes inside the int16 range are stored as int16, anything
/// else as float32. The scaling slope is always 1.
pub fn write_volume(path: impl AsRef<Path>, volume: &Volume) -> Result<()> {
    let path = path.as_ref();
    let header = header_for(&volume.geometry);
    let writer = WriterOptions::new(path).reference_header(&header);

    if volume.fits_i16() {
        let data = volume.data.mapv(|v| v as i16);
        writer.write_nifti(&data.view().reversed_axes())?;
    } else {
        writer.write_nifti(&volume.data.view().reversed_axes())?;
    }
    debug!(path = %path.display(), dim = ?volume.dim(), "wrote NIfTI");
    Ok(())
}

/// Read a 3D volume (or the first volume of a 4D series).
pub fn read_volume(path: impl AsRef<Path>) -> Result<Volume> {
    let path = path.as_ref();
    let object = ReaderOptions::new().read_file(path)?;
    let geometry = geometry_from_header(object.header());

    let array = object.into_volume().into_ndarray::<f32>()?;
    let array = match array.ndim() {
        3 => array,
        4 => array.index_axis_move(Axis(3), 0),
        n => {
            return Err(Error::UnsupportedVolume {
                path: path.to_path_buf(),
                reason: format!("{n} dimensions"),
            });
        }
    };

    let data = array
        .into_dimensionality::<Ix3>()?
        .reversed_axes()
        .as_standard_layout()
        .into_owned();
    debug!(path = %path.display(), dim = ?data.dim(), "read NIfTI");
    Ok(Volume::new(data, geometry))
}

fn header_for(geometry: &Geometry) -> NiftiHeader {
    let affine = geometry.to_ras_affine();
    let (dx, dy, dz) = geometry.spacing;
    let row = |r: usize| affine[r].map(|v| v as f32);

    NiftiHeader {
        pixdim: [1.0, dx as f32, dy as f32, dz as f32, 1.0, 1.0, 1.0, 1.0],
        sform_code: NIFTI_XFORM_SCANNER_ANAT,
        srow_x: row(0),
        srow_y: row(1),
        srow_z: row(2),
        scl_slope: 1.0,
        scl_inter: 0.0,
        xyzt_units: NIFTI_UNITS_MM,
        ..NiftiHeader::default()
    }
}

fn geometry_from_header(header: &NiftiHeader) -> Geometry {
    if header.sform_code > 0 {
        let row = |r: &[f32; 4]| r.map(f64::from);
        let affine = [
            row(&header.srow_x),
            row(&header.srow_y),
            row(&header.srow_z),
            [0.0, 0.0, 0.0, 1.0],
        ];
        return Geometry::from_ras_affine(&affine);
    }

    let spacing = |i: usize| {
        let value = f64::from(header.pixdim[i]).abs();
        if value > 0.0 { value } else { 1.0 }
    };
    let affine = [
        [spacing(1), 0.0, 0.0, 0.0],
        [0.0, spacing(2), 0.0, 0.0],
        [0.0, 0.0, spacing(3), 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    Geometry::from_ras_affine(&affine)
}
