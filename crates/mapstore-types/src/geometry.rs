//! Geometric value types shared by the map graph and the persistence engine.
//!
//! These are plain data carriers: producing poses, registering scans or
//! rectifying images happens elsewhere.  Every type here maps 1:1 onto a
//! fixed byte layout in `mapstore-sqlite::codec`.

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Transform
// ────────────────────────────────────────────────────────────────────────────

/// Number of `f32` values in a packed [`Transform`].
pub const TRANSFORM_LEN: usize = 12;

/// A rigid-body transform stored as a row-major 3×4 matrix
/// `[r00 r01 r02 tx; r10 r11 r12 ty; r20 r21 r22 tz]`.
///
/// The all-zero matrix is the *null* transform: it marks a pose or link
/// constraint that was never populated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    data: [f32; TRANSFORM_LEN],
}

impl Transform {
    /// Wrap 12 row-major values.
    pub fn from_array(data: [f32; TRANSFORM_LEN]) -> Self {
        Self { data }
    }

    /// Build a transform from a translation and a row-major 3×3 rotation.
    pub fn from_parts(rotation: [[f32; 3]; 3], translation: [f32; 3]) -> Self {
        let mut data = [0.0; TRANSFORM_LEN];
        for (row, r) in rotation.iter().enumerate() {
            data[row * 4..row * 4 + 3].copy_from_slice(r);
            data[row * 4 + 3] = translation[row];
        }
        Self { data }
    }

    /// Pure translation.
    pub fn from_translation(x: f32, y: f32, z: f32) -> Self {
        Self::from_parts([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], [x, y, z])
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self::from_translation(0.0, 0.0, 0.0)
    }

    /// The null (all-zero) transform.
    pub fn null() -> Self {
        Self {
            data: [0.0; TRANSFORM_LEN],
        }
    }

    pub fn is_null(&self) -> bool {
        self.data.iter().all(|v| *v == 0.0)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Row-major values.
    pub fn data(&self) -> &[f32; TRANSFORM_LEN] {
        &self.data
    }

    pub fn x(&self) -> f32 {
        self.data[3]
    }

    pub fn y(&self) -> f32 {
        self.data[7]
    }

    pub fn z(&self) -> f32 {
        self.data[11]
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::null()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Camera models
// ────────────────────────────────────────────────────────────────────────────

/// Pinhole intrinsics plus the camera's offset from the robot base.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub local_transform: Transform,
}

impl CameraModel {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, local_transform: Transform) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            local_transform,
        }
    }
}

/// Rectified stereo pair: left-camera intrinsics plus the baseline in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StereoCameraModel {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub baseline: f32,
    pub local_transform: Transform,
}

impl StereoCameraModel {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, baseline: f32, local_transform: Transform) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            baseline,
            local_transform,
        }
    }
}

/// Calibration attached to a node's sensor payload.
///
/// Multi-camera and stereo calibrations are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Calibration {
    #[default]
    None,
    /// One or more pinhole cameras (e.g. an RGB-D rig).
    Cameras(Vec<CameraModel>),
    Stereo(StereoCameraModel),
}

impl Calibration {
    pub fn is_none(&self) -> bool {
        match self {
            Calibration::None => true,
            Calibration::Cameras(models) => models.is_empty(),
            Calibration::Stereo(_) => false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Keypoints
// ────────────────────────────────────────────────────────────────────────────

/// A 2-D image feature.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the meaningful neighbourhood, persisted as an integer.
    pub size: f32,
    /// Orientation in degrees, `-1` when not applicable.
    pub angle: f32,
    pub response: f32,
}

impl KeyPoint {
    pub fn new(x: f32, y: f32, size: f32, angle: f32, response: f32) -> Self {
        Self {
            x,
            y,
            size,
            angle,
            response,
        }
    }
}

/// A 3-D point in the node's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_has_unit_diagonal() {
        let t = Transform::identity();
        assert_eq!(t.data()[0], 1.0);
        assert_eq!(t.data()[5], 1.0);
        assert_eq!(t.data()[10], 1.0);
        assert!(t.is_identity());
        assert!(!t.is_null());
    }

    #[test]
    fn translation_lands_in_last_column() {
        let t = Transform::from_translation(1.0, 2.0, 3.0);
        assert_eq!((t.x(), t.y(), t.z()), (1.0, 2.0, 3.0));
    }

    #[test]
    fn default_transform_is_null() {
        assert!(Transform::default().is_null());
    }

    #[test]
    fn empty_camera_list_counts_as_no_calibration() {
        assert!(Calibration::Cameras(vec![]).is_none());
        assert!(Calibration::None.is_none());
        let stereo = StereoCameraModel::new(500.0, 500.0, 320.0, 240.0, 0.12, Transform::identity());
        assert!(!Calibration::Stereo(stereo).is_none());
    }
}
