pub mod geometry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use geometry::{
    Calibration, CameraModel, KeyPoint, Point3, StereoCameraModel, TRANSFORM_LEN, Transform,
};

/// How a spatial constraint between two nodes was established.
///
/// The discriminants are the integers persisted in the `Link.type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkType {
    /// Odometry constraint between consecutive nodes.
    Neighbor = 0,
    GlobalClosure = 1,
    LocalSpaceClosure = 2,
    LocalTimeClosure = 3,
    UserClosure = 4,
    /// Transient constraint used during planning; never persisted.
    VirtualClosure = 5,
    /// Wildcard when used as a filter.
    Undefined = 6,
}

impl LinkType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Map a persisted integer back to a link type.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(LinkType::Neighbor),
            1 => Some(LinkType::GlobalClosure),
            2 => Some(LinkType::LocalSpaceClosure),
            3 => Some(LinkType::LocalTimeClosure),
            4 => Some(LinkType::UserClosure),
            5 => Some(LinkType::VirtualClosure),
            6 => Some(LinkType::Undefined),
            _ => None,
        }
    }
}

/// A spatial constraint (edge) between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from: i32,
    pub to: i32,
    pub link_type: LinkType,
    /// Pose of `to` expressed in the frame of `from`.
    pub transform: Transform,
    pub rot_variance: f32,
    pub trans_variance: f32,
}

impl Link {
    pub fn new(
        from: i32,
        to: i32,
        link_type: LinkType,
        transform: Transform,
        rot_variance: f32,
        trans_variance: f32,
    ) -> Self {
        Self {
            from,
            to,
            link_type,
            transform,
            rot_variance,
            trans_variance,
        }
    }
}

/// Raw bytes of a quantized feature descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Descriptor {
    /// Binary descriptor, one byte per element (ORB, BRIEF, ...).
    Binary(Vec<u8>),
    /// Real-valued descriptor, one `f32` per element (SURF, SIFT, ...).
    Float(Vec<f32>),
}

impl Descriptor {
    /// Element count, the value persisted as `Word.descriptor_size`.
    pub fn len(&self) -> usize {
        match self {
            Descriptor::Binary(d) => d.len(),
            Descriptor::Float(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A word of the place-recognition vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualWord {
    /// Positive ids are real words; `id <= 0` means "no match".
    pub id: i32,
    pub descriptor: Descriptor,
    /// Set once the word has a row in the store.
    pub saved: bool,
}

impl VisualWord {
    pub fn new(id: i32, descriptor: Descriptor) -> Self {
        Self {
            id,
            descriptor,
            saved: false,
        }
    }
}

/// User data attached to a sensor payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserData {
    /// Bytes already passed through the compression codec.
    Compressed(Vec<u8>),
    /// Uncompressed bytes, as older stores kept them on the node row.
    Raw(Vec<u8>),
}

impl UserData {
    pub fn bytes(&self) -> &[u8] {
        match self {
            UserData::Compressed(b) | UserData::Raw(b) => b,
        }
    }
}

/// Compressed raw sensory data for one node.
///
/// Image, depth and scan bytes are opaque to the store.  `None` means the
/// field was never populated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorData {
    pub image: Option<Vec<u8>>,
    /// Depth image for RGB-D sensors, right image for stereo.
    pub depth_or_right: Option<Vec<u8>>,
    pub calibration: Calibration,
    pub scan: Option<Vec<u8>>,
    /// Maximum point count of the laser scan, `0` when unknown.
    pub scan_max_pts: i32,
    pub user_data: Option<UserData>,
}

impl SensorData {
    /// True when no compressed bytes and no calibration are present.
    pub fn is_empty(&self) -> bool {
        self.image.is_none()
            && self.depth_or_right.is_none()
            && self.scan.is_none()
            && self.user_data.is_none()
            && self.calibration.is_none()
    }
}

/// One robot pose observation of the map graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    pub id: i32,
    pub map_id: i32,
    pub weight: i32,
    pub stamp: f64,
    /// Unique user-assigned name, empty when unset.
    pub label: String,
    pub pose: Transform,
    /// Outgoing links keyed by target node id.
    pub links: BTreeMap<i32, Link>,
    /// When set, an update replaces every persisted outgoing link.
    pub links_modified: bool,
    /// Keypoints quantized to word ids, ordered by word id.
    pub words: Vec<(i32, KeyPoint)>,
    /// 3-D points paired by position with `words`; may be empty.
    pub words3: Vec<(i32, Point3)>,
    pub sensor_data: SensorData,
    pub saved: bool,
}

impl Node {
    pub fn new(id: i32, map_id: i32, weight: i32, stamp: f64, label: &str, pose: Transform) -> Self {
        Self {
            id,
            map_id,
            weight,
            stamp,
            label: label.to_string(),
            pose,
            ..Self::default()
        }
    }

    /// Insert or replace the outgoing link to `link.to` and flag the link
    /// set as modified.
    pub fn add_link(&mut self, link: Link) {
        self.links.insert(link.to, link);
        self.links_modified = true;
    }

    pub fn remove_links(&mut self) {
        self.links.clear();
        self.links_modified = true;
    }
}

/// The scalar columns of a node row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub pose: Transform,
    pub map_id: i32,
    pub weight: i32,
    pub label: String,
    pub stamp: f64,
}

/// Re-point one node's observations of `old_word_id` to `new_word_id`,
/// leaving the keypoint geometry untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordReassignment {
    pub node_id: i32,
    pub old_word_id: i32,
    pub new_word_id: i32,
}
