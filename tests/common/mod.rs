#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use dicom::core::header::Header;
use dicom::core::value::{PixelFragmentSequence, Value};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{FileDicomObject, FileMetaTableBuilder, open_file};
use dicom_deface::Slice;
use dicom_dictionary_std::{StandardDataDictionary, tags, uids};
use ndarray::Array2;

pub const STUDY_UID: &str = "1.2.826.0.1.3680043.2.1125.1";
pub const FRAME_OF_REFERENCE_UID: &str = "1.2.826.0.1.3680043.2.1125.2";
pub const PRIVATE_CREATOR: Tag = Tag(0x0009, 0x0010);
pub const PRIVATE_VALUE: Tag = Tag(0x0009, 0x1001);

/// Parameters of a synthetic CT series.
#[derive(Debug, Clone)]
pub struct CtSeries {
    pub series_uid: String,
    pub slices: usize,
    pub rows: usize,
    pub columns: usize,
    pub slice_spacing: f64,
    pub description: String,
    /// Explicit VR LE, Implicit VR LE or RLE Lossless.
    pub transfer_syntax: &'static str,
}

impl CtSeries {
    pub fn new(series_uid: &str, slices: usize, rows: usize, columns: usize) -> Self {
        Self {
            series_uid: series_uid.to_string(),
            slices,
            rows,
            columns,
            slice_spacing: 1.0,
            description: "Head CTA".to_string(),
            transfer_syntax: uids::EXPLICIT_VR_LITTLE_ENDIAN,
        }
    }

    /// Write one file per slice into `dir`. File names run opposite to the
    /// slice position so ordering by name would be wrong.
    pub fn write(&self, dir: &Path) -> Vec<PathBuf> {
        fs::create_dir_all(dir).unwrap();
        (0..self.slices)
            .map(|k| {
                let path = dir.join(format!("ct_{:03}.dcm", self.slices - k));
                self.write_slice(k, &path);
                path
            })
            .collect()
    }

    fn write_slice(&self, k: usize, path: &Path) {
        let sop_instance_uid = format!("{}.{}", self.series_uid, k + 1);
        let meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(sop_instance_uid.as_str())
            .transfer_syntax(self.transfer_syntax)
            .build()
            .unwrap();
        let mut object = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);

        let mut put = |tag: Tag, vr: VR, value: &str| {
            object.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        };
        put(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE);
        put(tags::SOP_INSTANCE_UID, VR::UI, &sop_instance_uid);
        put(tags::STUDY_INSTANCE_UID, VR::UI, STUDY_UID);
        put(tags::SERIES_INSTANCE_UID, VR::UI, &self.series_uid);
        put(tags::FRAME_OF_REFERENCE_UID, VR::UI, FRAME_OF_REFERENCE_UID);
        put(tags::PATIENT_NAME, VR::PN, "Doe^Jane");
        put(tags::PATIENT_ID, VR::LO, "PAT-0042");
        put(tags::STUDY_DATE, VR::DA, "20240115");
        put(tags::MODALITY, VR::CS, "CT");
        put(tags::SERIES_DESCRIPTION, VR::LO, &self.description);
        put(tags::SERIES_NUMBER, VR::IS, "3");
        put(tags::INSTANCE_NUMBER, VR::IS, &(k + 1).to_string());
        put(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            &format!("-32\\-32\\{}", k as f64 * self.slice_spacing),
        );
        put(tags::IMAGE_ORIENTATION_PATIENT, VR::DS, "1\\0\\0\\0\\1\\0");
        put(tags::PIXEL_SPACING, VR::DS, "0.5\\0.5");
        put(tags::SLICE_THICKNESS, VR::DS, &self.slice_spacing.to_string());
        put(tags::KVP, VR::DS, "120");
        put(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
        put(tags::RESCALE_INTERCEPT, VR::DS, "-1024");
        put(tags::RESCALE_SLOPE, VR::DS, "1");
        put(PRIVATE_CREATOR, VR::LO, "ACME SCANNER");
        put(PRIVATE_VALUE, VR::LO, "kernel B30f");

        let unsigned = |tag: Tag, value: u16| DataElement::new(tag, VR::US, PrimitiveValue::from(value));
        object.put(unsigned(tags::SAMPLES_PER_PIXEL, 1));
        object.put(unsigned(tags::ROWS, self.rows as u16));
        object.put(unsigned(tags::COLUMNS, self.columns as u16));
        object.put(unsigned(tags::BITS_ALLOCATED, 16));
        object.put(unsigned(tags::BITS_STORED, 12));
        object.put(unsigned(tags::HIGH_BIT, 11));
        object.put(unsigned(tags::PIXEL_REPRESENTATION, 0));

        if self.transfer_syntax == uids::RLE_LOSSLESS {
            let fragment = self.rle_frame(k);
            object.put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OB,
                Value::PixelSequence(PixelFragmentSequence::new(Vec::<u32>::new(), vec![fragment])),
            ));
        } else {
            let mut bytes = Vec::with_capacity(self.rows * self.columns * 2);
            for r in 0..self.rows {
                for c in 0..self.columns {
                    bytes.extend_from_slice(&stored_value(k, r, c).to_le_bytes());
                }
            }
            object.put(DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(bytes)));
        }
        object.write_to_file(path).unwrap();
    }

    /// One RLE Lossless frame: high-byte segment then low-byte segment, each
    /// row stored as a single literal run. Needs at most 128 columns and an
    /// even row count so that both segments have even length.
    fn rle_frame(&self, k: usize) -> Vec<u8> {
        assert!(self.columns <= 128 && self.rows % 2 == 0);
        let segment = |byte: fn(u16) -> u8| {
            let mut out = Vec::with_capacity(self.rows * (self.columns + 1));
            for r in 0..self.rows {
                out.push((self.columns - 1) as u8);
                out.extend((0..self.columns).map(|c| byte(stored_value(k, r, c))));
            }
            out
        };
        let high = segment(|v| (v >> 8) as u8);
        let low = segment(|v| (v & 0xFF) as u8);

        let mut header = [0u32; 16];
        header[0] = 2;
        header[1] = 64;
        header[2] = 64 + high.len() as u32;
        let mut frame: Vec<u8> = header.iter().flat_map(|v| v.to_le_bytes()).collect();
        frame.extend(high);
        frame.extend(low);
        frame
    }
}

/// Stored sample of the synthetic series at slice `k`, row `r`, column `c`.
pub fn stored_value(k: usize, r: usize, c: usize) -> u16 {
    ((k * 7 + r * 3 + c) % 4096) as u16
}

/// Hounsfield value of the synthetic series.
pub fn hu_value(k: usize, r: usize, c: usize) -> f32 {
    f32::from(stored_value(k, r, c)) - 1024.0
}

/// Decoded modality values of one file.
pub fn read_hu(path: &Path) -> Array2<f32> {
    Slice::read(path).unwrap().load_pixels().unwrap()
}

/// Every element except PixelData as (tag, VR, value text).
pub fn non_pixel_elements(path: &Path) -> Vec<(Tag, VR, String)> {
    let object = open_file(path).unwrap();
    object
        .iter()
        .filter(|element| element.tag() != tags::PIXEL_DATA)
        .map(|element| {
            let value = element
                .to_str()
                .map(|value| value.trim_end_matches(['\0', ' ']).to_string())
                .unwrap_or_default();
            (element.tag(), element.vr(), value)
        })
        .collect()
}

pub fn element_text(path: &Path, tag: Tag) -> String {
    let object = open_file(path).unwrap();
    object
        .element(tag)
        .unwrap()
        .to_str()
        .unwrap()
        .trim_end_matches(['\0', ' '])
        .to_string()
}

/// `*.dcm` files directly in `dir`, sorted.
pub fn dicom_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "dcm"))
        .collect();
    files.sort();
    files
}

/// Transfer syntax UID in the file meta, without padding.
pub fn transfer_syntax(path: &Path) -> String {
    open_file(path)
        .unwrap()
        .meta()
        .transfer_syntax()
        .trim_end_matches(['\0', ' '])
        .to_string()
}
