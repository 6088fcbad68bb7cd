use std::path::{Path, PathBuf};

use dicom::object::{FileDicomObject, InMemDicomObject, OpenFileOptions, open_file};
use dicom::pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption};
use dicom_dictionary_std::tags;
use ndarray::{Array2, s};

use crate::error::{Error, Result};
use crate::geometry::{Vec3, dot};

pub type DicomObject = FileDicomObject<InMemDicomObject>;

/// Modality LUT parameters of a slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl Rescale {
    pub fn to_stored(&self, value: f64) -> f64 {
        (value - self.intercept) / self.slope
    }
}

/// Layout of the stored pixel samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub signed: bool,
}

impl PixelFormat {
    /// Inclusive range of representable stored values.
    pub fn stored_range(&self) -> (f64, f64) {
        let bits = i32::from(self.bits_stored.clamp(1, 32));
        if self.signed {
            let half = 2f64.powi(bits - 1);
            (-half, half - 1.0)
        } else {
            (0.0, 2f64.powi(bits) - 1.0)
        }
    }
}

/// One image of a series: its header (read up to PixelData) and the
/// attributes needed to place it in a volume.
#[derive(Debug, Clone)]
pub struct Slice {
    pub path: PathBuf,
    pub header: DicomObject,
    pub series_uid: String,
    pub instance_number: Option<i32>,
    pub position: Option<Vec3>,
    pub orientation: Option<[f64; 6]>,
    pub rows: usize,
    pub columns: usize,
    pub pixel_spacing: Option<[f64; 2]>,
    pub rescale: Rescale,
    pub format: PixelFormat,
}

impl Slice {
    /// Reads the header of a DICOM file, stopping before the pixel data.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let header = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)?;
        Self::from_header(path, header)
    }

    pub fn from_header(path: &Path, header: DicomObject) -> Result<Self> {
        let missing = |name: &'static str| Error::MissingAttribute {
            name,
            path: path.to_path_buf(),
        };

        let series_uid = get_string(&header, tags::SERIES_INSTANCE_UID)
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| missing("SeriesInstanceUID"))?;
        let rows = get_int::<usize>(&header, tags::ROWS).ok_or_else(|| missing("Rows"))?;
        let columns = get_int::<usize>(&header, tags::COLUMNS).ok_or_else(|| missing("Columns"))?;

        let frames = get_int::<u32>(&header, tags::NUMBER_OF_FRAMES).unwrap_or(1);
        let samples = get_int::<u16>(&header, tags::SAMPLES_PER_PIXEL).unwrap_or(1);
        if frames > 1 || samples != 1 {
            return Err(Error::UnsupportedPixelData {
                path: path.to_path_buf(),
                reason: format!("{frames} frame(s), {samples} sample(s) per pixel"),
            });
        }

        let bits_allocated = get_int::<u16>(&header, tags::BITS_ALLOCATED).unwrap_or(16);
        let format = PixelFormat {
            bits_allocated,
            bits_stored: get_int::<u16>(&header, tags::BITS_STORED).unwrap_or(bits_allocated),
            signed: get_int::<u16>(&header, tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1,
        };

        let rescale = Rescale {
            slope: get_float(&header, tags::RESCALE_SLOPE)
                .filter(|slope| *slope != 0.0)
                .unwrap_or(1.0),
            intercept: get_float(&header, tags::RESCALE_INTERCEPT).unwrap_or(0.0),
        };

        Ok(Self {
            path: path.to_path_buf(),
            series_uid,
            instance_number: get_int::<i32>(&header, tags::INSTANCE_NUMBER),
            position: get_floats(&header, tags::IMAGE_POSITION_PATIENT)
                .and_then(|v| <Vec3>::try_from(v.as_slice()).ok()),
            orientation: get_floats(&header, tags::IMAGE_ORIENTATION_PATIENT)
                .and_then(|v| <[f64; 6]>::try_from(v.as_slice()).ok()),
            pixel_spacing: get_floats(&header, tags::PIXEL_SPACING)
                .and_then(|v| <[f64; 2]>::try_from(v.as_slice()).ok()),
            rows,
            columns,
            rescale,
            format,
            header,
        })
    }

    /// Distance of this slice along `normal`, if it carries a position.
    pub fn distance_along(&self, normal: Vec3) -> Option<f64> {
        self.position.map(|position| dot(position, normal))
    }

    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }

    /// Opens the complete object, pixel data included.
    pub fn open(&self) -> Result<DicomObject> {
        Ok(open_file(&self.path)?)
    }

    /// Decodes the pixel data into modality values (rescale applied, no VOI LUT).
    pub fn load_pixels(&self) -> Result<Array2<f32>> {
        let object = self.open()?;
        let pixel_data = object.decode_pixel_data()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        let image = pixel_data
            .to_ndarray_with_options::<f32>(&options)?
            .slice_move(s![0, .., .., 0]);
        Ok(image)
    }
}

pub(crate) fn get_string(object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
    object
        .element(tag)
        .ok()?
        .to_str()
        .ok()
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
}

pub(crate) fn get_int<T: TryFrom<i64>>(object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<T> {
    let value = object.element(tag).ok()?.to_int::<i64>().ok()?;
    T::try_from(value).ok()
}

pub(crate) fn get_float(object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<f64> {
    object.element(tag).ok()?.to_float64().ok()
}

pub(crate) fn get_floats(object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<Vec<f64>> {
    object.element(tag).ok()?.to_multi_float64().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_range_follows_pixel_representation() {
        let unsigned = PixelFormat {
            bits_allocated: 16,
            bits_stored: 12,
            signed: false,
        };
        assert_eq!(unsigned.stored_range(), (0.0, 4095.0));

        let signed = PixelFormat {
            bits_allocated: 16,
            bits_stored: 16,
            signed: true,
        };
        assert_eq!(signed.stored_range(), (-32768.0, 32767.0));
    }

    #[test]
    fn rescale_inverts_modality_lut() {
        let rescale = Rescale {
            slope: 1.0,
            intercept: -1024.0,
        };
        assert_eq!(rescale.to_stored(-1024.0), 0.0);
        assert_eq!(rescale.to_stored(40.0), 1064.0);
    }
}
