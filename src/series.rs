use std::cmp::Ordering;

use dicom_dictionary_std::tags;

use crate::enums::SortBy;
use crate::geometry::{Geometry, Vec3, dot};
use crate::slice::{Slice, get_float, get_string};

/// Slices sharing one SeriesInstanceUID, in acquisition order.
#[derive(Debug, Clone)]
pub struct Series {
    uid: String,
    slices: Vec<Slice>,
}

impl Series {
    pub fn new(uid: impl Into<String>, mut slices: Vec<Slice>, sort_by: SortBy) -> Self {
        Self::sort_slices(&mut slices, sort_by);
        Self {
            uid: uid.into(),
            slices,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn first(&self) -> Option<&Slice> {
        self.slices.first()
    }

    /// (rows, columns) of the first slice.
    pub fn in_plane_shape(&self) -> Option<(usize, usize)> {
        self.first().map(|slice| (slice.rows, slice.columns))
    }

    pub fn description(&self) -> Option<String> {
        self.first()
            .and_then(|slice| get_string(&slice.header, tags::SERIES_DESCRIPTION))
    }

    /// Slice normal derived from the first slice's ImageOrientationPatient.
    pub fn normal(&self) -> Option<Vec3> {
        let orientation = self.first()?.orientation?;
        Some(Geometry::from_orientation(orientation, (1.0, 1.0, 1.0), [0.0; 3]).normal)
    }

    /// Geometry of the series as read from its headers.
    ///
    /// In-plane orientation and spacing come from the first slice; the slice
    /// spacing is measured from consecutive positions along the normal and
    /// only falls back to SpacingBetweenSlices or SliceThickness when fewer
    /// than two usable positions exist.
    pub fn geometry(&self) -> Geometry {
        let Some(first) = self.first() else {
            return Geometry::default();
        };
        let [row_spacing, column_spacing] = first.pixel_spacing.unwrap_or([1.0, 1.0]);
        let orientation = first.orientation.unwrap_or([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let origin = first.position.unwrap_or([0.0; 3]);

        let mut geometry =
            Geometry::from_orientation(orientation, (column_spacing, row_spacing, 1.0), origin);
        let slice_spacing = self
            .measured_slice_spacing(geometry.normal)
            .or_else(|| get_float(&first.header, tags::SPACING_BETWEEN_SLICES))
            .or_else(|| get_float(&first.header, tags::SLICE_THICKNESS))
            .filter(|spacing| *spacing > 0.0)
            .unwrap_or(1.0);
        geometry.spacing.2 = slice_spacing;
        geometry
    }

    fn measured_slice_spacing(&self, normal: Vec3) -> Option<f64> {
        let distances: Vec<f64> = self
            .slices
            .iter()
            .map(|slice| slice.distance_along(normal))
            .collect::<Option<_>>()?;
        if distances.len() < 2 {
            return None;
        }
        let total: f64 = distances.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        let mean = total / (distances.len() - 1) as f64;
        (mean > 1e-6).then_some(mean)
    }

    fn sort_slices(slices: &mut [Slice], sort_by: SortBy) {
        let by_instance = |a: &Slice, b: &Slice| {
            a.instance_number
                .cmp(&b.instance_number)
                .then_with(|| a.path.cmp(&b.path))
        };

        let normal = slices.first().and_then(|slice| slice.orientation).map(|orientation| {
            Geometry::from_orientation(orientation, (1.0, 1.0, 1.0), [0.0; 3]).normal
        });
        let positioned = slices.iter().all(|slice| slice.position.is_some());

        match (sort_by, normal) {
            (SortBy::ImagePositionPatient, Some(normal)) if positioned => {
                slices.sort_by(|a, b| {
                    let da = a.position.map_or(0.0, |p| dot(p, normal));
                    let db = b.position.map_or(0.0, |p| dot(p, normal));
                    da.partial_cmp(&db)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| by_instance(a, b))
                });
            }
            _ => slices.sort_by(by_instance),
        }
    }
}
