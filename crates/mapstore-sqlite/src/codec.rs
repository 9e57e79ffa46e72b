//! Fixed byte layouts for geometric and descriptor blobs.
//!
//! All float blobs are little-endian IEEE-754 `f32` sequences:
//!
//! | blob                 | layout                                         | bytes    |
//! |----------------------|------------------------------------------------|----------|
//! | transform            | 12 row-major values of a 3×4 matrix            | 48       |
//! | calibration (multi)  | `[fx, fy, cx, cy, transform]` per camera       | 64 × N   |
//! | calibration (stereo) | `[fx, fy, cx, cy, baseline, transform]`        | 68       |
//! | float descriptor     | one `f32` per element                          | 4 × size |
//! | binary descriptor    | one byte per element                           | size     |
//!
//! Compressed image/depth/scan bytes are opaque.  An absent payload field is
//! stored as [`ABSENT_BLOB`], four zero bytes, and anything of that length
//! or shorter reads back as absent.

use mapstore_types::{
    Calibration, CameraModel, Descriptor, KeyPoint, Point3, StereoCameraModel, TRANSFORM_LEN,
    Transform,
};

use crate::error::StoreError;

pub const TRANSFORM_BYTES: usize = TRANSFORM_LEN * 4;
pub const CAMERA_BYTES: usize = (4 + TRANSFORM_LEN) * 4;
pub const STEREO_BYTES: usize = (5 + TRANSFORM_LEN) * 4;
/// Placeholder written for payload fields that were never populated.
pub const ABSENT_BLOB: [u8; 4] = [0; 4];

// ─────────────────────────────────────────────────────────────────────────────
// Float helpers
// ─────────────────────────────────────────────────────────────────────────────

fn floats_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn transform_from_floats(values: &[f32]) -> Transform {
    let mut data = [0.0f32; TRANSFORM_LEN];
    data.copy_from_slice(&values[..TRANSFORM_LEN]);
    Transform::from_array(data)
}

// ─────────────────────────────────────────────────────────────────────────────
// Transform
// ─────────────────────────────────────────────────────────────────────────────

pub fn encode_transform(transform: &Transform) -> Vec<u8> {
    floats_to_bytes(transform.data())
}

/// `None` unless the blob is exactly [`TRANSFORM_BYTES`] long.
pub fn decode_transform(bytes: &[u8]) -> Option<Transform> {
    (bytes.len() == TRANSFORM_BYTES).then(|| transform_from_floats(&bytes_to_floats(bytes)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Calibration
// ─────────────────────────────────────────────────────────────────────────────

/// `None` when there is nothing to calibrate, stored as SQL `NULL`.
pub fn encode_calibration(calibration: &Calibration) -> Option<Vec<u8>> {
    match calibration {
        Calibration::None => None,
        Calibration::Cameras(models) if models.is_empty() => None,
        Calibration::Cameras(models) => {
            let mut values = Vec::with_capacity(models.len() * (4 + TRANSFORM_LEN));
            for m in models {
                values.extend([m.fx, m.fy, m.cx, m.cy]);
                values.extend_from_slice(m.local_transform.data());
            }
            Some(floats_to_bytes(&values))
        }
        Calibration::Stereo(s) => {
            let mut values = Vec::with_capacity(5 + TRANSFORM_LEN);
            values.extend([s.fx, s.fy, s.cx, s.cy, s.baseline]);
            values.extend_from_slice(s.local_transform.data());
            Some(floats_to_bytes(&values))
        }
    }
}

/// Decode a calibration blob.  The layout is chosen solely by length:
/// a multiple of [`CAMERA_BYTES`] is a camera list, exactly
/// [`STEREO_BYTES`] is a stereo model, an empty blob is no calibration.
pub fn decode_calibration(bytes: &[u8]) -> Result<Calibration, StoreError> {
    if bytes.is_empty() {
        return Ok(Calibration::None);
    }
    let values = bytes_to_floats(bytes);
    if bytes.len() % CAMERA_BYTES == 0 {
        let models = values
            .chunks_exact(4 + TRANSFORM_LEN)
            .map(|c| CameraModel::new(c[0], c[1], c[2], c[3], transform_from_floats(&c[4..])))
            .collect();
        Ok(Calibration::Cameras(models))
    } else if bytes.len() == STEREO_BYTES {
        Ok(Calibration::Stereo(StereoCameraModel::new(
            values[0],
            values[1],
            values[2],
            values[3],
            values[4],
            transform_from_floats(&values[5..]),
        )))
    } else {
        Err(StoreError::CalibrationFormat(bytes.len()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

pub fn encode_descriptor(descriptor: &Descriptor) -> Vec<u8> {
    match descriptor {
        Descriptor::Binary(d) => d.clone(),
        Descriptor::Float(d) => floats_to_bytes(d),
    }
}

/// Decode `bytes` given the stored element count.  Equal lengths mean a
/// binary descriptor, four bytes per element a float one; any other ratio
/// is a format error.
pub fn decode_descriptor(bytes: &[u8], elements: usize) -> Result<Descriptor, StoreError> {
    if bytes.len() == elements {
        Ok(Descriptor::Binary(bytes.to_vec()))
    } else if bytes.len() == elements * 4 {
        Ok(Descriptor::Float(bytes_to_floats(bytes)))
    } else {
        Err(StoreError::DescriptorFormat {
            bytes: bytes.len(),
            elements,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keypoints
// ─────────────────────────────────────────────────────────────────────────────

/// One `Map_Node_Word` row minus the ids.  Keypoints are stored as scalar
/// columns rather than a blob so the store can filter and sort on them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeypointColumns {
    pub pos_x: f64,
    pub pos_y: f64,
    /// Truncated to an integer on write.
    pub size: i32,
    pub dir: f64,
    pub response: f64,
    pub depth_x: f64,
    pub depth_y: f64,
    pub depth_z: f64,
}

pub fn encode_keypoint(kp: &KeyPoint, point: &Point3) -> KeypointColumns {
    KeypointColumns {
        pos_x: f64::from(kp.x),
        pos_y: f64::from(kp.y),
        size: kp.size as i32,
        dir: f64::from(kp.angle),
        response: f64::from(kp.response),
        depth_x: f64::from(point.x),
        depth_y: f64::from(point.y),
        depth_z: f64::from(point.z),
    }
}

pub fn decode_keypoint(cols: &KeypointColumns) -> (KeyPoint, Point3) {
    (
        KeyPoint::new(
            cols.pos_x as f32,
            cols.pos_y as f32,
            cols.size as f32,
            cols.dir as f32,
            cols.response as f32,
        ),
        Point3::new(cols.depth_x as f32, cols.depth_y as f32, cols.depth_z as f32),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Optional payload blobs
// ─────────────────────────────────────────────────────────────────────────────

/// Bytes to bind for an optional payload field.
pub fn payload_blob(bytes: Option<&[u8]>) -> &[u8] {
    match bytes {
        Some(b) if !b.is_empty() => b,
        _ => &ABSENT_BLOB,
    }
}

/// Interpret a stored payload field; the placeholder and `NULL` are absent.
pub fn payload_field(bytes: Option<Vec<u8>>) -> Option<Vec<u8>> {
    bytes.filter(|b| b.len() > ABSENT_BLOB.len())
}
