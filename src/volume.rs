use ndarray::{Array3, ArrayView2, Zip, s};

use crate::geometry::Geometry;

/// Dense voxel grid of modality values (Hounsfield units for CT),
/// indexed `(slice, row, column)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Volume {
    pub data: Array3<f32>,
    pub geometry: Geometry,
}

impl Volume {
    pub fn new(data: Array3<f32>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// Get the dimensions of the volume (depth, rows, columns)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    /// (rows, columns) of every slice
    pub fn in_plane_shape(&self) -> (usize, usize) {
        let (_, rows, columns) = self.data.dim();
        (rows, columns)
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        (index < self.depth()).then(|| self.data.slice(s![index, .., ..]))
    }

    /// Number of voxels that differ from `other`, or `None` when the shapes differ.
    pub fn count_differences(&self, other: &Volume) -> Option<usize> {
        if self.dim() != other.dim() {
            return None;
        }
        let mut changed = 0usize;
        Zip::from(&self.data).and(&other.data).for_each(|a, b| {
            if a.to_bits() != b.to_bits() {
                changed += 1;
            }
        });
        Some(changed)
    }

    /// Whether every voxel is an integer representable as `i16`.
    pub fn fits_i16(&self) -> bool {
        self.data.iter().all(|&v| {
            v.fract() == 0.0 && v >= f32::from(i16::MIN) && v <= f32::from(i16::MAX)
        })
    }
}
