use thiserror::Error;

/// Violations of the point cloud invariants.
#[derive(Debug, Error, PartialEq)]
pub enum PointCloudError {
    #[error("point cloud has no vertices")]
    Empty,

    #[error("vertex {index} has a non-finite coordinate")]
    NonFiniteVertex { index: usize },

    #[error("normal {index} has a non-finite component")]
    NonFiniteNormal { index: usize },

    #[error("{attribute} has {actual} entries, expected one per vertex ({expected})")]
    AttributeLength {
        attribute: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// A scanned point cloud with optional per-vertex normals and colors.
///
/// Always non-empty and finite; the only way to build one is through
/// [`PointCloud::new`], which checks both.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    points: Vec<[f64; 3]>,
    normals: Option<Vec<[f64; 3]>>,
    colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    pub fn new(
        points: Vec<[f64; 3]>,
        normals: Option<Vec<[f64; 3]>>,
        colors: Option<Vec<[u8; 3]>>,
    ) -> Result<Self, PointCloudError> {
        if points.is_empty() {
            return Err(PointCloudError::Empty);
        }
        if let Some(index) = points.iter().position(|p| !p.iter().all(|c| c.is_finite())) {
            return Err(PointCloudError::NonFiniteVertex { index });
        }
        if let Some(normals) = &normals {
            if normals.len() != points.len() {
                return Err(PointCloudError::AttributeLength {
                    attribute: "normals",
                    expected: points.len(),
                    actual: normals.len(),
                });
            }
            if let Some(index) = normals.iter().position(|n| !n.iter().all(|c| c.is_finite())) {
                return Err(PointCloudError::NonFiniteNormal { index });
            }
        }
        if let Some(colors) = &colors {
            if colors.len() != points.len() {
                return Err(PointCloudError::AttributeLength {
                    attribute: "colors",
                    expected: points.len(),
                    actual: colors.len(),
                });
            }
        }

        Ok(Self {
            points,
            normals,
            colors,
        })
    }

    /// Convenience constructor for a bare vertex list.
    pub fn from_points(points: Vec<[f64; 3]>) -> Result<Self, PointCloudError> {
        Self::new(points, None, None)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false for a constructed cloud; kept for API symmetry with `len`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Mean of all vertices, accumulated in vertex order. Each term is
    /// divided by the count first so finite inputs give a finite mean.
    pub fn centroid(&self) -> [f64; 3] {
        let n = self.points.len() as f64;
        let mut mean = [0.0f64; 3];
        for p in &self.points {
            mean[0] += p[0] / n;
            mean[1] += p[1] / n;
            mean[2] += p[2] / n;
        }
        mean
    }

    /// True when every coordinate and normal component is finite.
    pub fn is_finite(&self) -> bool {
        let finite = |v: &[f64; 3]| v.iter().all(|c| c.is_finite());
        self.points.iter().all(finite) && self.normals().map_or(true, |n| n.iter().all(finite))
    }

    /// Axis-aligned bounds as `(min, max)`.
    pub fn bounds(&self) -> ([f64; 3], [f64; 3]) {
        let mut min = self.points[0];
        let mut max = self.points[0];
        for p in &self.points[1..] {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        (min, max)
    }

    /// Extent along X, Y and Z.
    pub fn extents(&self) -> [f64; 3] {
        let (min, max) = self.bounds();
        [max[0] - min[0], max[1] - min[1], max[2] - min[2]]
    }

    /// Length of the bounding-box diagonal.
    pub fn diagonal(&self) -> f64 {
        let [w, h, d] = self.extents();
        (w * w + h * h + d * d).sqrt()
    }

    /// Builds a cloud from already-validated parts produced by a transform
    /// of another cloud.
    pub(crate) fn from_transformed(
        points: Vec<[f64; 3]>,
        normals: Option<Vec<[f64; 3]>>,
        colors: Option<Vec<[u8; 3]>>,
    ) -> Self {
        debug_assert!(!points.is_empty());
        Self {
            points,
            normals,
            colors,
        }
    }
}
