//! Conversion of modality values back into stored pixel samples.

use std::path::Path;

use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use ndarray::ArrayView2;

use crate::error::{Error, Result};
use crate::slice::{PixelFormat, Rescale};

/// Invert the modality LUT and clamp to the stored range.
pub fn to_stored_values(image: ArrayView2<'_, f32>, rescale: Rescale, format: PixelFormat) -> Vec<i64> {
    let (low, high) = format.stored_range();
    image
        .iter()
        .map(|&v| rescale.to_stored(f64::from(v)).round().clamp(low, high) as i64)
        .collect()
}

/// Pack an image as little-endian native pixel data for the given format.
pub fn encode(
    image: ArrayView2<'_, f32>,
    rescale: Rescale,
    format: PixelFormat,
    path: &Path,
) -> Result<Vec<u8>> {
    let stored = to_stored_values(image, rescale, format);
    let mut bytes: Vec<u8> = match (format.bits_allocated, format.signed) {
        (8, false) => stored.iter().map(|&v| v as u8).collect(),
        (8, true) => stored.iter().map(|&v| v as i8 as u8).collect(),
        (16, false) => {
            let samples: Vec<u16> = stored.iter().map(|&v| v as u16).collect();
            to_le_bytes(&samples)
        }
        (16, true) => {
            let samples: Vec<i16> = stored.iter().map(|&v| v as i16).collect();
            to_le_bytes(&samples)
        }
        (32, false) => {
            let samples: Vec<u32> = stored.iter().map(|&v| v as u32).collect();
            to_le_bytes(&samples)
        }
        (32, true) => {
            let samples: Vec<i32> = stored.iter().map(|&v| v as i32).collect();
            to_le_bytes(&samples)
        }
        (bits, _) => {
            return Err(Error::UnsupportedPixelData {
                path: path.to_path_buf(),
                reason: format!("{bits} bits allocated"),
            });
        }
    };
    // value length must be even
    if bytes.len() % 2 == 1 {
        bytes.push(0);
    }
    Ok(bytes)
}

/// Replace the PixelData element of `object` with native samples.
pub fn put_pixel_data(object: &mut InMemDicomObject, bytes: Vec<u8>, format: PixelFormat) {
    let vr = if format.bits_allocated > 8 { VR::OW } else { VR::OB };
    object.put(DataElement::new(tags::PIXEL_DATA, vr, PrimitiveValue::from(bytes)));
}

fn to_le_bytes<T: bytemuck::Pod>(samples: &[T]) -> Vec<u8> {
    if cfg!(target_endian = "little") {
        bytemuck::cast_slice(samples).to_vec()
    } else {
        let size = std::mem::size_of::<T>();
        bytemuck::cast_slice::<T, u8>(samples)
            .chunks_exact(size)
            .flat_map(|chunk| chunk.iter().rev().copied())
            .collect()
    }
}
