//! Metadata sidecar: the DICOM attributes needed to rebuild a series from a
//! bare volume, stored as JSON next to the NIfTI file it describes.
//!
//! Only the attributes listed on [`MetadataSidecar`] survive this path.
//! Sequence attributes, private tags and anything else not captured here are
//! not restored by [`MetadataSidecar::synthesize_series`]; use the
//! reinjection path when the original series is still available.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{FileDicomObject, FileMetaTableBuilder};
use dicom_dictionary_std::{StandardDataDictionary, tags, uids};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::geometry::{Geometry, Vec3};
use crate::nifti_io;
use crate::pixels;
use crate::series::Series;
use crate::slice::{PixelFormat, Rescale, get_float, get_int, get_string};
use crate::uid::mint_uid;
use crate::volume::Volume;

pub const SIDECAR_VERSION: u32 = 1;

/// Per-slice placement captured from the source series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SliceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_number: Option<i32>,
    pub image_position_patient: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_orientation_patient: Option<[f64; 6]>,
    /// Per-slice modality LUT; the series-level values apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescale_slope: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescale_intercept: Option<f64>,
}

impl SliceRecord {
    fn rescale(&self, series: Rescale) -> Rescale {
        Rescale {
            slope: self.rescale_slope.filter(|slope| *slope != 0.0).unwrap_or(series.slope),
            intercept: self.rescale_intercept.unwrap_or(series.intercept),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataSidecar {
    pub sidecar_version: u32,

    #[serde(rename = "SOPClassUID")]
    pub sop_class_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(rename = "PatientID", default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_sex: Option<String>,

    #[serde(rename = "StudyInstanceUID", default, skip_serializing_if = "Option::is_none")]
    pub study_instance_uid: Option<String>,
    #[serde(rename = "StudyID", default, skip_serializing_if = "Option::is_none")]
    pub study_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accession_number: Option<String>,

    /// Reused on reconstruction when present; a new UID is minted otherwise.
    #[serde(rename = "SeriesInstanceUID", default, skip_serializing_if = "Option::is_none")]
    pub series_instance_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_number: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_description: Option<String>,
    #[serde(rename = "FrameOfReferenceUID", default, skip_serializing_if = "Option::is_none")]
    pub frame_of_reference_uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_thickness: Option<f64>,
    pub pixel_spacing: [f64; 2],
    pub image_orientation_patient: [f64; 6],
    pub rows: usize,
    pub columns: usize,

    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub high_bit: u16,
    pub pixel_representation: u16,
    pub photometric_interpretation: String,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_center: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_width: Option<f64>,
    #[serde(rename = "KVP", default, skip_serializing_if = "Option::is_none")]
    pub kvp: Option<f64>,

    #[serde(default)]
    pub slices: Vec<SliceRecord>,
}

impl MetadataSidecar {
    /// Capture the sidecar attributes of an ordered series.
    pub fn from_series(series: &Series, geometry: &Geometry) -> Self {
        let mut sidecar = Self::minimal(geometry, series.in_plane_shape().unwrap_or((0, 0)));
        let Some(first) = series.first() else {
            return sidecar;
        };
        let header = &first.header;
        let text = |tag: Tag| get_string(header, tag).filter(|s| !s.is_empty());

        sidecar.sop_class_uid = text(tags::SOP_CLASS_UID).unwrap_or(sidecar.sop_class_uid);
        sidecar.modality = text(tags::MODALITY);
        sidecar.patient_name = text(tags::PATIENT_NAME);
        sidecar.patient_id = text(tags::PATIENT_ID);
        sidecar.patient_birth_date = text(tags::PATIENT_BIRTH_DATE);
        sidecar.patient_sex = text(tags::PATIENT_SEX);
        sidecar.study_instance_uid = text(tags::STUDY_INSTANCE_UID);
        sidecar.study_id = text(tags::STUDY_ID);
        sidecar.study_date = text(tags::STUDY_DATE);
        sidecar.study_time = text(tags::STUDY_TIME);
        sidecar.study_description = text(tags::STUDY_DESCRIPTION);
        sidecar.accession_number = text(tags::ACCESSION_NUMBER);
        sidecar.series_instance_uid = Some(series.uid().to_string());
        sidecar.series_number = get_int(header, tags::SERIES_NUMBER);
        sidecar.series_description = text(tags::SERIES_DESCRIPTION);
        sidecar.frame_of_reference_uid = text(tags::FRAME_OF_REFERENCE_UID);
        sidecar.slice_thickness = get_float(header, tags::SLICE_THICKNESS);
        if let Some(spacing) = first.pixel_spacing {
            sidecar.pixel_spacing = spacing;
        }
        if let Some(orientation) = first.orientation {
            sidecar.image_orientation_patient = orientation;
        }

        sidecar.bits_allocated = first.format.bits_allocated;
        sidecar.bits_stored = first.format.bits_stored;
        sidecar.high_bit = get_int(header, tags::HIGH_BIT).unwrap_or(first.format.bits_stored.saturating_sub(1));
        sidecar.pixel_representation = u16::from(first.format.signed);
        sidecar.photometric_interpretation =
            text(tags::PHOTOMETRIC_INTERPRETATION).unwrap_or(sidecar.photometric_interpretation);
        sidecar.rescale_slope = first.rescale.slope;
        sidecar.rescale_intercept = first.rescale.intercept;
        sidecar.window_center = get_float(header, tags::WINDOW_CENTER);
        sidecar.window_width = get_float(header, tags::WINDOW_WIDTH);
        sidecar.kvp = get_float(header, tags::KVP);

        sidecar.slices = series
            .slices()
            .iter()
            .enumerate()
            .map(|(k, slice)| SliceRecord {
                instance_number: slice.instance_number,
                image_position_patient: slice.position.unwrap_or_else(|| geometry.position_of(k)),
                image_orientation_patient: slice.orientation,
                rescale_slope: Some(slice.rescale.slope),
                rescale_intercept: Some(slice.rescale.intercept),
            })
            .collect();
        sidecar
    }

    /// Defaults for a signed 16-bit CT image when no source metadata exists.
    pub fn minimal(geometry: &Geometry, (rows, columns): (usize, usize)) -> Self {
        Self {
            sidecar_version: SIDECAR_VERSION,
            sop_class_uid: uids::CT_IMAGE_STORAGE.to_string(),
            modality: Some("CT".to_string()),
            patient_name: None,
            patient_id: None,
            patient_birth_date: None,
            patient_sex: None,
            study_instance_uid: None,
            study_id: None,
            study_date: None,
            study_time: None,
            study_description: None,
            accession_number: None,
            series_instance_uid: None,
            series_number: None,
            series_description: None,
            frame_of_reference_uid: None,
            slice_thickness: None,
            pixel_spacing: [geometry.spacing.1, geometry.spacing.0],
            image_orientation_patient: geometry.orientation(),
            rows,
            columns,
            bits_allocated: 16,
            bits_stored: 16,
            high_bit: 15,
            pixel_representation: 1,
            photometric_interpretation: "MONOCHROME2".to_string(),
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            window_center: None,
            window_width: None,
            kvp: None,
            slices: Vec::new(),
        }
    }

    /// `<volume stem>.json` next to the volume.
    pub fn path_for(volume_path: &Path) -> PathBuf {
        let stem = nifti_io::stem(volume_path);
        volume_path.with_file_name(format!("{stem}.json"))
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat {
            bits_allocated: self.bits_allocated,
            bits_stored: self.bits_stored,
            signed: self.pixel_representation == 1,
        }
    }

    pub fn rescale(&self) -> Rescale {
        Rescale {
            slope: if self.rescale_slope == 0.0 { 1.0 } else { self.rescale_slope },
            intercept: self.rescale_intercept,
        }
    }

    /// Build a complete DICOM series from a bare volume, one file per slice
    /// (`slice_0001.dcm`, ...), written as Explicit VR Little Endian.
    ///
    /// Captured per-slice positions are reused when their count equals the
    /// volume depth; otherwise positions are recomputed from the volume
    /// geometry and the slice index.
    pub fn synthesize_series(&self, volume: &Volume, out_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let out_dir = out_dir.as_ref();
        fs::create_dir_all(out_dir)?;

        let (depth, rows, columns) = volume.dim();
        if (rows, columns) != (self.rows, self.columns) {
            warn!(
                sidecar = ?(self.rows, self.columns),
                volume = ?(rows, columns),
                "sidecar in-plane shape differs from volume, using volume shape"
            );
        }
        let unsupported = |axis: &str, size: usize| Error::UnsupportedVolume {
            path: out_dir.to_path_buf(),
            reason: format!("{size} {axis} exceed the DICOM limit of {}", u16::MAX),
        };
        let rows_value = u16::try_from(rows).map_err(|_| unsupported("rows", rows))?;
        let columns_value = u16::try_from(columns).map_err(|_| unsupported("columns", columns))?;

        let reuse_slices = self.slices.len() == depth;
        if !reuse_slices && !self.slices.is_empty() {
            warn!(
                captured = self.slices.len(),
                depth, "slice count changed, recomputing positions from geometry"
            );
        }

        let series_uid = self.series_instance_uid.clone().unwrap_or_else(mint_uid);
        let study_uid = self.study_instance_uid.clone().unwrap_or_else(mint_uid);
        let format = self.pixel_format();
        let series_rescale = self.rescale();
        let mut written = Vec::with_capacity(depth);

        for k in 0..depth {
            let record = reuse_slices.then(|| &self.slices[k]);
            let position = record.map_or_else(|| volume.geometry.position_of(k), |r| r.image_position_patient);
            let orientation = record
                .and_then(|r| r.image_orientation_patient)
                .unwrap_or(self.image_orientation_patient);
            let instance_number = record
                .and_then(|r| r.instance_number)
                .unwrap_or((k + 1) as i32);
            let rescale = record.map_or(series_rescale, |r| r.rescale(series_rescale));
            let sop_instance_uid = mint_uid();

            let meta = FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(self.sop_class_uid.as_str())
                .media_storage_sop_instance_uid(sop_instance_uid.as_str())
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .build()?;
            let mut object = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);

            let mut put = |tag: Tag, vr: VR, value: String| {
                object.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
            };
            put(tags::SOP_CLASS_UID, VR::UI, self.sop_class_uid.clone());
            put(tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid.clone());
            put(tags::SERIES_INSTANCE_UID, VR::UI, series_uid.clone());
            put(tags::STUDY_INSTANCE_UID, VR::UI, study_uid.clone());
            put(tags::INSTANCE_NUMBER, VR::IS, instance_number.to_string());
            put(tags::IMAGE_POSITION_PATIENT, VR::DS, ds_multi(&position));
            put(tags::IMAGE_ORIENTATION_PATIENT, VR::DS, ds_multi(&orientation));
            put(tags::PIXEL_SPACING, VR::DS, ds_multi(&self.pixel_spacing));
            put(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, self.photometric_interpretation.clone());
            put(tags::RESCALE_SLOPE, VR::DS, ds(rescale.slope));
            put(tags::RESCALE_INTERCEPT, VR::DS, ds(rescale.intercept));

            let optional_text = [
                (tags::MODALITY, VR::CS, &self.modality),
                (tags::PATIENT_NAME, VR::PN, &self.patient_name),
                (tags::PATIENT_ID, VR::LO, &self.patient_id),
                (tags::PATIENT_BIRTH_DATE, VR::DA, &self.patient_birth_date),
                (tags::PATIENT_SEX, VR::CS, &self.patient_sex),
                (tags::STUDY_ID, VR::SH, &self.study_id),
                (tags::STUDY_DATE, VR::DA, &self.study_date),
                (tags::STUDY_TIME, VR::TM, &self.study_time),
                (tags::STUDY_DESCRIPTION, VR::LO, &self.study_description),
                (tags::ACCESSION_NUMBER, VR::SH, &self.accession_number),
                (tags::SERIES_DESCRIPTION, VR::LO, &self.series_description),
                (tags::FRAME_OF_REFERENCE_UID, VR::UI, &self.frame_of_reference_uid),
            ];
            for (tag, vr, value) in optional_text {
                if let Some(value) = value {
                    put(tag, vr, value.clone());
                }
            }
            let optional_numbers = [
                (tags::SLICE_THICKNESS, self.slice_thickness),
                (tags::WINDOW_CENTER, self.window_center),
                (tags::WINDOW_WIDTH, self.window_width),
                (tags::KVP, self.kvp),
            ];
            for (tag, value) in optional_numbers {
                if let Some(value) = value {
                    put(tag, VR::DS, ds(value));
                }
            }
            if let Some(number) = self.series_number {
                put(tags::SERIES_NUMBER, VR::IS, number.to_string());
            }

            let unsigned = |tag: Tag, value: u16| DataElement::new(tag, VR::US, PrimitiveValue::from(value));
            object.put(unsigned(tags::SAMPLES_PER_PIXEL, 1));
            object.put(unsigned(tags::ROWS, rows_value));
            object.put(unsigned(tags::COLUMNS, columns_value));
            object.put(unsigned(tags::BITS_ALLOCATED, self.bits_allocated));
            object.put(unsigned(tags::BITS_STORED, self.bits_stored));
            object.put(unsigned(tags::HIGH_BIT, self.high_bit));
            object.put(unsigned(tags::PIXEL_REPRESENTATION, self.pixel_representation));

            let path = out_dir.join(format!("slice_{:04}.dcm", k + 1));
            let image = volume.data.slice(ndarray::s![k, .., ..]);
            let bytes = pixels::encode(image, rescale, format, &path)?;
            pixels::put_pixel_data(&mut object, bytes, format);

            object.write_to_file(&path)?;
            written.push(path);
        }

        info!(
            slices = written.len(),
            series = %series_uid,
            out = %out_dir.display(),
            "synthesized DICOM series from sidecar"
        );
        Ok(written)
    }
}

/// Format a decimal string value within the 16 character DS limit.
pub(crate) fn ds(value: f64) -> String {
    let plain = value.to_string();
    if plain.len() <= 16 {
        return plain;
    }
    for precision in (0..=10).rev() {
        let formatted = format!("{value:.precision$}");
        let trimmed = if formatted.contains('.') {
            formatted.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            formatted
        };
        if trimmed.len() <= 16 {
            return trimmed;
        }
    }
    format!("{value:.6e}")
}

pub(crate) fn ds_multi(values: &[f64]) -> String {
    values.iter().map(|v| ds(*v)).collect::<Vec<_>>().join("\\")
}
