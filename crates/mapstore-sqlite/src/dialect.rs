//! Version-gated statement text.
//!
//! Columns were added to the store one release at a time, and each read path
//! gained its fields at a different version.  Every path therefore has its
//! own ladder: an ordered table of `(threshold, layout)` rungs.  A
//! [`Dialect`] is selected once per connection by picking, for each ladder,
//! the highest rung whose threshold does not exceed the store's version.
//!
//! | path          | rungs                                                           |
//! |---------------|-----------------------------------------------------------------|
//! | node info     | `0.0.0` pose/map/weight, `0.8.5` + stamp/label                  |
//! | links         | `0.0.0` untyped, `0.7.4` shared variance, `0.8.4` split variance |
//! | sensor data   | `0.0.0` depth constant, `0.7.0` intrinsics, `0.8.8` user data on node, `0.8.11` scan max points, `0.10.0` unified `Data`, `0.10.1` user data in `Data` |
//! | node words    | `0.0.0` keypoint + 3D point                                      |

use mapstore_types::LinkType;

use crate::version::SchemaVersion;

// ─────────────────────────────────────────────────────────────────────────────
// Layouts
// ─────────────────────────────────────────────────────────────────────────────

/// Columns of the `Node` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeLayout {
    /// `id, map_id, weight, pose`
    Basic,
    /// Adds `stamp, label`.
    Labeled,
}

/// Columns of the `Link` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkLayout {
    /// No variance; `type` is 0 for neighbors and anything else for closures.
    Untyped,
    /// One `variance` column shared by rotation and translation.
    SharedVariance,
    /// `rot_variance, trans_variance`.
    SplitVariance,
}

/// Tables and columns holding a node's sensor payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PayloadLayout {
    /// `Image` + `Depth(data, local_transform, constant, data2d)`.
    DepthConstant,
    /// `Depth` carries `fx, fy, cx, cy` instead of a depth constant.
    Intrinsics,
    /// Raw user data on `Node.user_data`.
    NodeUserData,
    /// `Depth.data2d_max_pts`.
    ScanMaxPoints,
    /// Unified `Data` table with a calibration blob; user data still on `Node`.
    Unified,
    /// `Data.user_data` holds compressed user data.
    UnifiedUserData,
}

/// Columns of a `Map_Node_Word` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeWordsLayout {
    KeypointAndPoint,
}

/// Where a payload's user data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDataLocation {
    Absent,
    Node,
    Data,
}

/// The independently versioned read paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    NodeInfo,
    Links,
    SensorData,
    NodeWords,
}

type Ladder<T> = &'static [(SchemaVersion, T)];

const NODE_LADDER: Ladder<NodeLayout> = &[
    (SchemaVersion::LEGACY, NodeLayout::Basic),
    (SchemaVersion::V0_8_5, NodeLayout::Labeled),
];

const LINK_LADDER: Ladder<LinkLayout> = &[
    (SchemaVersion::LEGACY, LinkLayout::Untyped),
    (SchemaVersion::V0_7_4, LinkLayout::SharedVariance),
    (SchemaVersion::V0_8_4, LinkLayout::SplitVariance),
];

const PAYLOAD_LADDER: Ladder<PayloadLayout> = &[
    (SchemaVersion::LEGACY, PayloadLayout::DepthConstant),
    (SchemaVersion::V0_7_0, PayloadLayout::Intrinsics),
    (SchemaVersion::V0_8_8, PayloadLayout::NodeUserData),
    (SchemaVersion::V0_8_11, PayloadLayout::ScanMaxPoints),
    (SchemaVersion::V0_10_0, PayloadLayout::Unified),
    (SchemaVersion::V0_10_1, PayloadLayout::UnifiedUserData),
];

const NODE_WORDS_LADDER: Ladder<NodeWordsLayout> =
    &[(SchemaVersion::LEGACY, NodeWordsLayout::KeypointAndPoint)];

fn rung<T: Copy>(ladder: Ladder<T>, version: SchemaVersion) -> T {
    ladder
        .iter()
        .rev()
        .find(|(threshold, _)| version >= *threshold)
        .map(|(_, layout)| *layout)
        .unwrap_or(ladder[0].1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Dialect
// ─────────────────────────────────────────────────────────────────────────────

/// Statement text and blob layouts for one schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    version: SchemaVersion,
    node: NodeLayout,
    link: LinkLayout,
    payload: PayloadLayout,
    node_words: NodeWordsLayout,
}

impl Dialect {
    pub fn select(version: SchemaVersion) -> Self {
        Self {
            version,
            node: rung(NODE_LADDER, version),
            link: rung(LINK_LADDER, version),
            payload: rung(PAYLOAD_LADDER, version),
            node_words: rung(NODE_WORDS_LADDER, version),
        }
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn node_layout(&self) -> NodeLayout {
        self.node
    }

    pub fn link_layout(&self) -> LinkLayout {
        self.link
    }

    pub fn payload_layout(&self) -> PayloadLayout {
        self.payload
    }

    pub fn has_labels(&self) -> bool {
        self.node >= NodeLayout::Labeled
    }

    pub fn has_unified_payload(&self) -> bool {
        self.payload >= PayloadLayout::Unified
    }

    pub fn has_scan_max_pts(&self) -> bool {
        self.payload >= PayloadLayout::ScanMaxPoints
    }

    pub fn has_intrinsics_columns(&self) -> bool {
        self.payload >= PayloadLayout::Intrinsics
    }

    pub fn user_data_location(&self) -> UserDataLocation {
        match self.payload {
            PayloadLayout::DepthConstant | PayloadLayout::Intrinsics => UserDataLocation::Absent,
            PayloadLayout::NodeUserData | PayloadLayout::ScanMaxPoints | PayloadLayout::Unified => {
                UserDataLocation::Node
            }
            PayloadLayout::UnifiedUserData => UserDataLocation::Data,
        }
    }

    /// Logical fields a read path yields at this version.  A shared legacy
    /// `variance` column feeds both variance fields.
    pub fn fields(&self, path: ReadPath) -> Vec<&'static str> {
        match path {
            ReadPath::NodeInfo => {
                let mut f = vec!["id", "map_id", "weight", "pose"];
                if self.has_labels() {
                    f.extend(["stamp", "label"]);
                }
                f
            }
            ReadPath::Links => {
                let mut f = vec!["from_id", "to_id", "type", "transform"];
                if self.link >= LinkLayout::SharedVariance {
                    f.extend(["rot_variance", "trans_variance"]);
                }
                f
            }
            ReadPath::SensorData => {
                let mut f = vec!["image", "depth", "calibration", "scan"];
                if self.user_data_location() != UserDataLocation::Absent {
                    f.push("user_data");
                }
                if self.has_scan_max_pts() {
                    f.push("scan_max_pts");
                }
                f
            }
            ReadPath::NodeWords => match self.node_words {
                NodeWordsLayout::KeypointAndPoint => vec![
                    "word_id", "pos_x", "pos_y", "size", "dir", "response", "depth_x", "depth_y",
                    "depth_z",
                ],
            },
        }
    }

    // ── Node ────────────────────────────────────────────────────────────────

    /// `id, map_id, weight, pose[, stamp, label]` of one node.
    pub fn node_select(&self) -> &'static str {
        match self.node {
            NodeLayout::Basic => "SELECT id, map_id, weight, pose FROM Node WHERE id = ?1",
            NodeLayout::Labeled => {
                "SELECT id, map_id, weight, pose, stamp, label FROM Node WHERE id = ?1"
            }
        }
    }

    pub fn node_insert(&self) -> &'static str {
        match (self.node, self.user_data_location()) {
            (NodeLayout::Basic, _) => {
                "INSERT INTO Node(id, map_id, weight, pose) VALUES(?1, ?2, ?3, ?4)"
            }
            (NodeLayout::Labeled, UserDataLocation::Node) => {
                "INSERT INTO Node(id, map_id, weight, pose, stamp, label, user_data) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            }
            (NodeLayout::Labeled, _) => {
                "INSERT INTO Node(id, map_id, weight, pose, stamp, label) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)"
            }
        }
    }

    /// Parameters: `weight[, label], id`.
    pub fn node_update(&self, touch_timestamp: bool) -> &'static str {
        match (self.node, touch_timestamp) {
            (NodeLayout::Labeled, true) => {
                "UPDATE Node SET weight = ?1, label = ?2, time_enter = DATETIME('NOW') WHERE id = ?3"
            }
            (NodeLayout::Labeled, false) => "UPDATE Node SET weight = ?1, label = ?2 WHERE id = ?3",
            (NodeLayout::Basic, true) => {
                "UPDATE Node SET weight = ?1, time_enter = DATETIME('NOW') WHERE id = ?2"
            }
            (NodeLayout::Basic, false) => "UPDATE Node SET weight = ?1 WHERE id = ?2",
        }
    }

    // ── Link ────────────────────────────────────────────────────────────────

    fn link_columns(&self) -> &'static str {
        match self.link {
            LinkLayout::Untyped => "from_id, to_id, type, transform",
            LinkLayout::SharedVariance => "from_id, to_id, type, transform, variance",
            LinkLayout::SplitVariance => {
                "from_id, to_id, type, transform, rot_variance, trans_variance"
            }
        }
    }

    /// Outgoing links of `?1`, optionally narrowed by type.
    pub fn link_select(&self, filter: LinkType) -> String {
        let mut query = format!("SELECT {} FROM Link WHERE from_id = ?1", self.link_columns());
        if filter != LinkType::Undefined {
            if self.link >= LinkLayout::SharedVariance {
                query.push_str(&format!(" AND type = {}", filter.as_i32()));
            } else if filter == LinkType::Neighbor {
                query.push_str(" AND type = 0");
            } else {
                query.push_str(" AND type > 0");
            }
        }
        query.push_str(" ORDER BY to_id");
        query
    }

    pub fn link_select_all(&self) -> String {
        format!("SELECT {} FROM Link ORDER BY from_id, to_id", self.link_columns())
    }

    /// Parameters: `from_id, to_id, type, transform[, variance...]`.
    pub fn link_insert(&self) -> &'static str {
        match self.link {
            LinkLayout::Untyped => {
                "INSERT INTO Link(from_id, to_id, type, transform) VALUES(?1, ?2, ?3, ?4)"
            }
            LinkLayout::SharedVariance => {
                "INSERT INTO Link(from_id, to_id, type, transform, variance) \
                 VALUES(?1, ?2, ?3, ?4, ?5)"
            }
            LinkLayout::SplitVariance => {
                "INSERT INTO Link(from_id, to_id, type, transform, rot_variance, trans_variance) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)"
            }
        }
    }

    // ── Sensor data ─────────────────────────────────────────────────────────

    /// Payload of node `?1`.  Column order matches
    /// `mapper::read_sensor_data`.
    pub fn sensor_data_select(&self) -> &'static str {
        match self.payload {
            PayloadLayout::UnifiedUserData => {
                "SELECT image, depth, calibration, scan_max_pts, scan, user_data \
                 FROM Data WHERE id = ?1"
            }
            PayloadLayout::Unified => {
                "SELECT Data.image, Data.depth, Data.calibration, Data.scan_max_pts, Data.scan, \
                 Node.user_data \
                 FROM Data INNER JOIN Node ON Data.id = Node.id WHERE Data.id = ?1"
            }
            PayloadLayout::ScanMaxPoints => {
                "SELECT Image.data, Depth.data, Depth.local_transform, Depth.fx, Depth.fy, \
                 Depth.cx, Depth.cy, Depth.data2d_max_pts, Depth.data2d, Node.user_data \
                 FROM Image INNER JOIN Node ON Image.id = Node.id \
                 LEFT OUTER JOIN Depth ON Image.id = Depth.id WHERE Image.id = ?1"
            }
            PayloadLayout::NodeUserData => {
                "SELECT Image.data, Depth.data, Depth.local_transform, Depth.fx, Depth.fy, \
                 Depth.cx, Depth.cy, Depth.data2d, Node.user_data \
                 FROM Image INNER JOIN Node ON Image.id = Node.id \
                 LEFT OUTER JOIN Depth ON Image.id = Depth.id WHERE Image.id = ?1"
            }
            PayloadLayout::Intrinsics => {
                "SELECT Image.data, Depth.data, Depth.local_transform, Depth.fx, Depth.fy, \
                 Depth.cx, Depth.cy, Depth.data2d \
                 FROM Image LEFT OUTER JOIN Depth ON Image.id = Depth.id WHERE Image.id = ?1"
            }
            PayloadLayout::DepthConstant => {
                "SELECT Image.data, Depth.data, Depth.local_transform, Depth.constant, Depth.data2d \
                 FROM Image LEFT OUTER JOIN Depth ON Image.id = Depth.id WHERE Image.id = ?1"
            }
        }
    }

    /// Unified payload row; `None` on split-table layouts.
    pub fn data_insert(&self) -> Option<&'static str> {
        match self.payload {
            PayloadLayout::UnifiedUserData => Some(
                "INSERT INTO Data(id, image, depth, calibration, scan_max_pts, scan, user_data) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            ),
            PayloadLayout::Unified => Some(
                "INSERT INTO Data(id, image, depth, calibration, scan_max_pts, scan) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            ),
            _ => None,
        }
    }

    /// Legacy image row; `None` on unified layouts.
    pub fn image_insert(&self) -> Option<&'static str> {
        (!self.has_unified_payload()).then_some("INSERT INTO Image(id, data) VALUES(?1, ?2)")
    }

    /// Legacy depth/scan row; `None` on unified layouts.
    pub fn depth_insert(&self) -> Option<&'static str> {
        match self.payload {
            PayloadLayout::Unified | PayloadLayout::UnifiedUserData => None,
            PayloadLayout::ScanMaxPoints => Some(
                "INSERT INTO Depth(id, data, fx, fy, cx, cy, local_transform, data2d, data2d_max_pts) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            ),
            PayloadLayout::Intrinsics | PayloadLayout::NodeUserData => Some(
                "INSERT INTO Depth(id, data, fx, fy, cx, cy, local_transform, data2d) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            ),
            PayloadLayout::DepthConstant => Some(
                "INSERT INTO Depth(id, data, constant, local_transform, data2d) \
                 VALUES(?1, ?2, ?3, ?4, ?5)",
            ),
        }
    }
}
