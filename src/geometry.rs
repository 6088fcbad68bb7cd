//! Patient-space geometry of a volume.
//!
//! DICOM describes positions in LPS (+x left, +y posterior, +z superior)
//! while NIfTI affines are RAS. Converting between the two only flips the
//! sign of the first two world axes; voxel data is never reordered, so the
//! stored orientation of the source series is carried through unchanged.

pub type Vec3 = [f64; 3];

#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// (column spacing, row spacing, slice spacing) in millimetres
    pub spacing: (f64, f64, f64),
    /// Direction of increasing column index (first ImageOrientationPatient triplet)
    pub row_cosine: Vec3,
    /// Direction of increasing row index (second ImageOrientationPatient triplet)
    pub column_cosine: Vec3,
    /// Direction of increasing slice index
    pub normal: Vec3,
    /// ImagePositionPatient of the first voxel of the first slice
    pub origin: Vec3,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            spacing: (1.0, 1.0, 1.0),
            row_cosine: [1.0, 0.0, 0.0],
            column_cosine: [0.0, 1.0, 0.0],
            normal: [0.0, 0.0, 1.0],
            origin: [0.0; 3],
        }
    }
}

impl Geometry {
    /// Builds the geometry from an ImageOrientationPatient value.
    pub fn from_orientation(orientation: [f64; 6], spacing: (f64, f64, f64), origin: Vec3) -> Self {
        let row_cosine = normalize([orientation[0], orientation[1], orientation[2]]);
        let column_cosine = normalize([orientation[3], orientation[4], orientation[5]]);
        Self {
            spacing,
            row_cosine,
            column_cosine,
            normal: normalize(cross(row_cosine, column_cosine)),
            origin,
        }
    }

    /// ImageOrientationPatient value: row cosine followed by column cosine.
    pub fn orientation(&self) -> [f64; 6] {
        let [a, b, c] = self.row_cosine;
        let [d, e, f] = self.column_cosine;
        [a, b, c, d, e, f]
    }

    /// Patient position of the first voxel of slice `index`.
    pub fn position_of(&self, index: usize) -> Vec3 {
        let step = self.spacing.2 * index as f64;
        [
            self.origin[0] + self.normal[0] * step,
            self.origin[1] + self.normal[1] * step,
            self.origin[2] + self.normal[2] * step,
        ]
    }

    /// Voxel-to-world affine in RAS, row-major.
    pub fn to_ras_affine(&self) -> [[f64; 4]; 4] {
        let (dx, dy, dz) = self.spacing;
        let flip = [-1.0, -1.0, 1.0];
        let mut affine = [[0.0; 4]; 4];
        for axis in 0..3 {
            affine[axis][0] = flip[axis] * self.row_cosine[axis] * dx;
            affine[axis][1] = flip[axis] * self.column_cosine[axis] * dy;
            affine[axis][2] = flip[axis] * self.normal[axis] * dz;
            affine[axis][3] = flip[axis] * self.origin[axis];
        }
        affine[3][3] = 1.0;
        affine
    }

    /// Inverse of [`Geometry::to_ras_affine`].
    pub fn from_ras_affine(affine: &[[f64; 4]; 4]) -> Self {
        let flip = [-1.0, -1.0, 1.0];
        let column = |c: usize| -> Vec3 {
            [
                flip[0] * affine[0][c],
                flip[1] * affine[1][c],
                flip[2] * affine[2][c],
            ]
        };
        let (x, y, z) = (column(0), column(1), column(2));
        let spacing = (norm(x), norm(y), norm(z));
        Self {
            spacing,
            row_cosine: normalize(x),
            column_cosine: normalize(y),
            normal: normalize(z),
            origin: column(3),
        }
    }

    pub fn spacing_distance(&self, other: &Geometry) -> f64 {
        let (a, b) = (self.spacing, other.spacing);
        norm([a.0 - b.0, a.1 - b.1, a.2 - b.2])
    }

    pub fn orientation_distance(&self, other: &Geometry) -> f64 {
        let a = self.orientation();
        let b = other.orientation();
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }
}

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

fn normalize(a: Vec3) -> Vec3 {
    let n = norm(a);
    if n == 0.0 {
        return a;
    }
    [a[0] / n, a[1] / n, a[2] / n]
}
