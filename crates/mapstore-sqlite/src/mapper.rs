//! Translation between map entities and table rows.
//!
//! Writes follow the connected store's [`Dialect`], so a store opened at an
//! older version keeps receiving rows in its own layout.  Reads share the
//! column helpers at the bottom of this module, which turn SQL `NULL` and
//! type mismatches into zero values instead of errors.

use std::time::Instant;

use mapstore_types::{
    Calibration, CameraModel, KeyPoint, Link, LinkType, Node, Point3, SensorData,
    StereoCameraModel, Transform, UserData, VisualWord, WordReassignment,
};
use rusqlite::types::ValueRef;
use rusqlite::{Row, params};
use tracing::{debug, error, warn};

use crate::codec::{
    self, KeypointColumns, decode_calibration, decode_transform, encode_calibration,
    encode_descriptor, encode_keypoint, encode_transform, payload_blob, payload_field,
};
use crate::dialect::{Dialect, LinkLayout, NodeLayout, PayloadLayout, UserDataLocation};
use crate::error::StoreError;
use crate::store::MapStore;

const NODE_WORD_INSERT: &str = "INSERT INTO Map_Node_Word(node_id, word_id, pos_x, pos_y, size, \
     dir, response, depth_x, depth_y, depth_z) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

impl MapStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Save
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a batch of new nodes with their links, word observations and
    /// sensor payloads.  Virtual closures are never written.
    ///
    /// The whole batch is validated before the first row is written.
    pub fn save_nodes(&self, nodes: &[Node]) -> Result<(), StoreError> {
        if nodes.is_empty() {
            return Ok(());
        }
        let dialect = *self.dialect();
        for node in nodes {
            check_word_pairing(node)?;
            check_user_data(&dialect, node)?;
            if !dialect.has_unified_payload() {
                legacy_calibration(&dialect, &node.sensor_data.calibration)?;
            }
        }

        let start = Instant::now();
        for node in nodes {
            self.insert_node(&dialect, node)?;
        }
        debug!(count = nodes.len(), elapsed_ms = ms(start), "saved nodes");

        let start = Instant::now();
        let mut links = 0usize;
        for node in nodes {
            links += self.insert_links(&dialect, node)?;
        }
        debug!(count = links, elapsed_ms = ms(start), "saved links");

        let start = Instant::now();
        let mut observations = 0usize;
        for node in nodes {
            observations += self.insert_node_words(node)?;
        }
        debug!(count = observations, elapsed_ms = ms(start), "saved node words");

        let start = Instant::now();
        let mut payloads = 0usize;
        for node in nodes {
            if self.insert_sensor_data(&dialect, node)? {
                payloads += 1;
            }
        }
        debug!(count = payloads, elapsed_ms = ms(start), "saved sensor data");
        Ok(())
    }

    /// Insert words not yet flagged as saved and flag them.  Words with a
    /// non-positive id are logged and skipped.
    pub fn save_words(&self, words: &mut [VisualWord]) -> Result<(), StoreError> {
        let start = Instant::now();
        let mut stmt = self.conn().prepare_cached(
            "INSERT INTO Word(id, descriptor_size, descriptor) VALUES(?1, ?2, ?3)",
        )?;
        let mut inserted = 0usize;
        for word in words.iter_mut().filter(|w| !w.saved) {
            if word.id <= 0 {
                error!(word_id = word.id, "refusing to save a word with an invalid id");
                continue;
            }
            stmt.execute(params![
                word.id,
                word.descriptor.len() as i64,
                encode_descriptor(&word.descriptor)
            ])?;
            word.saved = true;
            inserted += 1;
        }
        debug!(count = inserted, elapsed_ms = ms(start), "saved words");
        Ok(())
    }

    fn insert_node(&self, dialect: &Dialect, node: &Node) -> Result<(), StoreError> {
        let mut stmt = self.conn().prepare_cached(dialect.node_insert())?;
        let pose = encode_transform(&node.pose);
        let label = label_param(&node.label);
        match (dialect.node_layout(), dialect.user_data_location()) {
            (NodeLayout::Basic, _) => {
                stmt.execute(params![node.id, node.map_id, node.weight, pose])?;
            }
            (NodeLayout::Labeled, UserDataLocation::Node) => {
                let user_data = node.sensor_data.user_data.as_ref().map(UserData::bytes);
                stmt.execute(params![
                    node.id,
                    node.map_id,
                    node.weight,
                    pose,
                    node.stamp,
                    label,
                    user_data
                ])?;
            }
            (NodeLayout::Labeled, _) => {
                stmt.execute(params![
                    node.id,
                    node.map_id,
                    node.weight,
                    pose,
                    node.stamp,
                    label
                ])?;
            }
        }
        Ok(())
    }

    /// Returns the number of rows written.
    fn insert_links(&self, dialect: &Dialect, node: &Node) -> Result<usize, StoreError> {
        let mut stmt = self.conn().prepare_cached(dialect.link_insert())?;
        let mut written = 0;
        for link in node.links.values() {
            if link.link_type == LinkType::VirtualClosure {
                continue;
            }
            let transform = encode_transform(&link.transform);
            let kind = link.link_type.as_i32();
            match dialect.link_layout() {
                LinkLayout::Untyped => {
                    stmt.execute(params![link.from, link.to, kind, transform])?;
                }
                LinkLayout::SharedVariance => {
                    let variance = link.rot_variance.min(link.trans_variance);
                    stmt.execute(params![link.from, link.to, kind, transform, variance])?;
                }
                LinkLayout::SplitVariance => {
                    stmt.execute(params![
                        link.from,
                        link.to,
                        kind,
                        transform,
                        link.rot_variance,
                        link.trans_variance
                    ])?;
                }
            }
            written += 1;
        }
        Ok(written)
    }

    /// Returns the number of observations written.
    fn insert_node_words(&self, node: &Node) -> Result<usize, StoreError> {
        let mut stmt = self.conn().prepare_cached(NODE_WORD_INSERT)?;
        for (i, (word_id, kp)) in node.words.iter().enumerate() {
            // Ids were matched pairwise by check_word_pairing.
            let point = node
                .words3
                .get(i)
                .map(|(_, p)| *p)
                .unwrap_or_default();
            let c = encode_keypoint(kp, &point);
            stmt.execute(params![
                node.id, word_id, c.pos_x, c.pos_y, c.size, c.dir, c.response, c.depth_x,
                c.depth_y, c.depth_z
            ])?;
        }
        Ok(node.words.len())
    }

    /// Returns `true` when a payload row was written.
    fn insert_sensor_data(&self, dialect: &Dialect, node: &Node) -> Result<bool, StoreError> {
        let data = &node.sensor_data;
        if let Some(sql) = dialect.data_insert() {
            if data.is_empty() {
                return Ok(false);
            }
            let mut stmt = self.conn().prepare_cached(sql)?;
            let image = payload_blob(data.image.as_deref());
            let depth = payload_blob(data.depth_or_right.as_deref());
            let scan = payload_blob(data.scan.as_deref());
            let calibration = encode_calibration(&data.calibration);
            if dialect.user_data_location() == UserDataLocation::Data {
                let user_data = data.user_data.as_ref().map(UserData::bytes);
                stmt.execute(params![
                    node.id,
                    image,
                    depth,
                    calibration,
                    data.scan_max_pts,
                    scan,
                    user_data
                ])?;
            } else {
                stmt.execute(params![
                    node.id,
                    image,
                    depth,
                    calibration,
                    data.scan_max_pts,
                    scan
                ])?;
            }
            return Ok(true);
        }

        let has_bytes = data.image.is_some() || data.depth_or_right.is_some() || data.scan.is_some();
        if !has_bytes {
            if !data.calibration.is_none() {
                debug!(node_id = node.id, "calibration without payload bytes not stored");
            }
            return Ok(false);
        }
        if let Some(sql) = dialect.image_insert() {
            self.conn()
                .prepare_cached(sql)?
                .execute(params![node.id, payload_blob(data.image.as_deref())])?;
        }
        if let Some(sql) = dialect.depth_insert() {
            let mut stmt = self.conn().prepare_cached(sql)?;
            let depth = payload_blob(data.depth_or_right.as_deref());
            let scan = payload_blob(data.scan.as_deref());
            let cal = legacy_calibration(dialect, &data.calibration)?;
            let local = encode_transform(&cal.local_transform);
            match dialect.payload_layout() {
                PayloadLayout::DepthConstant => {
                    let constant = if cal.fx > 0.0 { 1.0 / cal.fx } else { 0.0 };
                    stmt.execute(params![node.id, depth, constant, local, scan])?;
                }
                PayloadLayout::ScanMaxPoints => {
                    stmt.execute(params![
                        node.id,
                        depth,
                        cal.fx,
                        cal.fy,
                        cal.cx,
                        cal.cy,
                        local,
                        scan,
                        data.scan_max_pts
                    ])?;
                }
                _ => {
                    stmt.execute(params![
                        node.id, depth, cal.fx, cal.fy, cal.cx, cal.cy, local, scan
                    ])?;
                }
            }
        }
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Update
    // ─────────────────────────────────────────────────────────────────────────

    /// Update already persisted nodes.
    ///
    /// Weight and label are rewritten; `time_enter` is touched only when
    /// `touch_timestamp` is set.  A node whose links are flagged modified has
    /// all its outgoing links deleted and the current set re-inserted.  Each
    /// reassignment re-points one node's observations of a word.
    pub fn update_nodes(
        &self,
        nodes: &[Node],
        reassignments: &[WordReassignment],
        touch_timestamp: bool,
    ) -> Result<(), StoreError> {
        let dialect = *self.dialect();
        let start = Instant::now();
        {
            let mut stmt = self.conn().prepare_cached(dialect.node_update(touch_timestamp))?;
            for node in nodes {
                if dialect.has_labels() {
                    stmt.execute(params![node.weight, label_param(&node.label), node.id])?;
                } else {
                    stmt.execute(params![node.weight, node.id])?;
                }
            }
        }
        debug!(count = nodes.len(), elapsed_ms = ms(start), "updated nodes");

        let start = Instant::now();
        let mut replaced = 0usize;
        for node in nodes.iter().filter(|n| n.links_modified) {
            self.conn()
                .prepare_cached("DELETE FROM Link WHERE from_id = ?1")?
                .execute([node.id])?;
            self.insert_links(&dialect, node)?;
            replaced += 1;
        }
        debug!(count = replaced, elapsed_ms = ms(start), "replaced link sets");

        if !reassignments.is_empty() {
            let start = Instant::now();
            let mut stmt = self.conn().prepare_cached(
                "UPDATE Map_Node_Word SET word_id = ?1 WHERE word_id = ?2 AND node_id = ?3",
            )?;
            for r in reassignments {
                stmt.execute(params![r.new_word_id, r.old_word_id, r.node_id])?;
            }
            debug!(
                count = reassignments.len(),
                elapsed_ms = ms(start),
                "reassigned word observations"
            );
        }
        Ok(())
    }

    /// Touch the entry time of persisted words.  Without `touch_timestamp`
    /// there is nothing to update.
    pub fn update_words(&self, words: &[VisualWord], touch_timestamp: bool) -> Result<(), StoreError> {
        if !touch_timestamp {
            return Ok(());
        }
        let mut stmt = self
            .conn()
            .prepare_cached("UPDATE Word SET time_enter = DATETIME('NOW') WHERE id = ?1")?;
        for word in words.iter().filter(|w| w.id > 0) {
            stmt.execute([word.id])?;
        }
        Ok(())
    }
}

fn ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Labels are unique when present, so an empty label is stored as `NULL`.
fn label_param(label: &str) -> Option<&str> {
    (!label.is_empty()).then_some(label)
}

/// 3D points are optional, but when present they pair one-to-one and in
/// order with the keypoints, each pair naming the same word.
fn check_word_pairing(node: &Node) -> Result<(), StoreError> {
    if node.words3.is_empty() {
        return Ok(());
    }
    if node.words3.len() != node.words.len() {
        return Err(StoreError::WordPairing {
            node_id: node.id,
            keypoints: node.words.len(),
            points: node.words3.len(),
        });
    }
    let mismatch = node
        .words
        .iter()
        .zip(&node.words3)
        .position(|((kp_word, _), (pt_word, _))| kp_word != pt_word);
    if let Some(index) = mismatch {
        return Err(StoreError::WordMismatch {
            node_id: node.id,
            index,
            keypoint_word: node.words[index].0,
            point_word: node.words3[index].0,
        });
    }
    Ok(())
}

/// Stores without a user-data column drop it; stores keeping it on the node
/// row only hold uncompressed bytes.
fn check_user_data(dialect: &Dialect, node: &Node) -> Result<(), StoreError> {
    let Some(user_data) = &node.sensor_data.user_data else {
        return Ok(());
    };
    match (dialect.user_data_location(), user_data) {
        (UserDataLocation::Absent, _) => {
            warn!(
                node_id = node.id,
                version = %dialect.version(),
                bytes = user_data.bytes().len(),
                "database has no user data column, user data not stored"
            );
            Ok(())
        }
        (UserDataLocation::Node, UserData::Compressed(_)) => Err(StoreError::CompressedUserData {
            version: dialect.version().to_string(),
            node_id: node.id,
        }),
        _ => Ok(()),
    }
}

/// Intrinsics as stored in the legacy `Depth` columns.  A stereo model keeps
/// its baseline in the `fy` column, which readers recognise by `fy < 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LegacyIntrinsics {
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
    local_transform: Transform,
}

fn legacy_calibration(
    dialect: &Dialect,
    calibration: &Calibration,
) -> Result<LegacyIntrinsics, StoreError> {
    let unsupported = |reason: &str| StoreError::UnsupportedCalibration {
        version: dialect.version().to_string(),
        reason: reason.to_string(),
    };
    match calibration {
        Calibration::None => Ok(LegacyIntrinsics {
            fx: 0.0,
            fy: 0.0,
            cx: 0.0,
            cy: 0.0,
            local_transform: Transform::identity(),
        }),
        Calibration::Cameras(models) => match models.as_slice() {
            [] => legacy_calibration(dialect, &Calibration::None),
            [m] => Ok(LegacyIntrinsics {
                fx: m.fx,
                fy: m.fy,
                cx: m.cx,
                cy: m.cy,
                local_transform: m.local_transform,
            }),
            _ => Err(unsupported("more than one camera model")),
        },
        Calibration::Stereo(s) => {
            if s.baseline >= 1.0 {
                return Err(unsupported("stereo baseline of 1 m or more"));
            }
            Ok(LegacyIntrinsics {
                fx: s.fx,
                fy: s.baseline,
                cx: s.cx,
                cy: s.cy,
                local_transform: s.local_transform,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row readers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn column_blob(row: &Row<'_>, idx: usize) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Blob(b) | ValueRef::Text(b) => Some(b.to_vec()),
        ValueRef::Null | ValueRef::Integer(_) | ValueRef::Real(_) => None,
    })
}

pub(crate) fn column_f64(row: &Row<'_>, idx: usize) -> Result<f64, StoreError> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Real(v) => v,
        ValueRef::Integer(v) => v as f64,
        _ => 0.0,
    })
}

pub(crate) fn column_opt_f64(row: &Row<'_>, idx: usize) -> Result<Option<f64>, StoreError> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Real(v) => Some(v),
        ValueRef::Integer(v) => Some(v as f64),
        _ => None,
    })
}

pub(crate) fn column_i32(row: &Row<'_>, idx: usize) -> Result<i32, StoreError> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(v) => v as i32,
        ValueRef::Real(v) => v as i32,
        _ => 0,
    })
}

pub(crate) fn column_text(row: &Row<'_>, idx: usize) -> Result<String, StoreError> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        _ => String::new(),
    })
}

/// Decode a pose or link transform.  A blob of the wrong size reads as the
/// null transform; only a non-empty one is worth a warning.
pub(crate) fn column_transform(
    row: &Row<'_>,
    idx: usize,
    what: &str,
    id: i32,
) -> Result<Transform, StoreError> {
    let bytes = column_blob(row, idx)?.unwrap_or_default();
    Ok(match decode_transform(&bytes) {
        Some(t) => t,
        None => {
            if !bytes.is_empty() {
                warn!(id, field = what, bytes = bytes.len(), "transform blob has the wrong size");
            }
            Transform::null()
        }
    })
}

/// Read one `Map_Node_Word` row laid out as
/// `word_id, pos_x, pos_y, size, dir, response, depth_x, depth_y, depth_z`.
pub(crate) fn read_node_word(row: &Row<'_>) -> Result<(i32, KeyPoint, Point3), StoreError> {
    let word_id = column_i32(row, 0)?;
    let cols = KeypointColumns {
        pos_x: column_f64(row, 1)?,
        pos_y: column_f64(row, 2)?,
        size: column_i32(row, 3)?,
        dir: column_f64(row, 4)?,
        response: column_f64(row, 5)?,
        depth_x: column_f64(row, 6)?,
        depth_y: column_f64(row, 7)?,
        depth_z: column_f64(row, 8)?,
    };
    let (kp, point) = codec::decode_keypoint(&cols);
    Ok((word_id, kp, point))
}

/// Read one link row selected with [`Dialect::link_select`].
///
/// In `strict` mode a type that does not name a persistable link is an
/// error; otherwise it maps to [`LinkType::Undefined`].
pub(crate) fn read_link(row: &Row<'_>, dialect: &Dialect, strict: bool) -> Result<Link, StoreError> {
    let from = column_i32(row, 0)?;
    let to = column_i32(row, 1)?;
    let raw_type = column_i32(row, 2)?;
    let transform = column_transform(row, 3, "link transform", from)?;

    let link_type = match dialect.link_layout() {
        LinkLayout::Untyped if raw_type == 0 => Some(LinkType::Neighbor),
        LinkLayout::Untyped => Some(LinkType::GlobalClosure),
        _ => LinkType::from_i32(raw_type),
    };
    let link_type = match link_type {
        Some(t) if t != LinkType::Undefined => t,
        _ if strict => {
            return Err(StoreError::UnsupportedLinkType {
                from,
                to,
                value: raw_type,
            });
        }
        _ => LinkType::Undefined,
    };

    let (rot_variance, trans_variance) = match dialect.link_layout() {
        LinkLayout::Untyped => (1.0, 1.0),
        LinkLayout::SharedVariance => {
            let v = column_f64(row, 4)? as f32;
            (v, v)
        }
        LinkLayout::SplitVariance => (column_f64(row, 4)? as f32, column_f64(row, 5)? as f32),
    };
    Ok(Link::new(from, to, link_type, transform, rot_variance, trans_variance))
}

/// Read a payload row selected with [`Dialect::sensor_data_select`].
pub(crate) fn read_sensor_data(row: &Row<'_>, dialect: &Dialect) -> Result<SensorData, StoreError> {
    let mut data = SensorData {
        image: payload_field(column_blob(row, 0)?),
        depth_or_right: payload_field(column_blob(row, 1)?),
        ..SensorData::default()
    };

    match dialect.payload_layout() {
        PayloadLayout::Unified | PayloadLayout::UnifiedUserData => {
            if let Some(bytes) = column_blob(row, 2)? {
                data.calibration = decode_calibration(&bytes)?;
            }
            data.scan_max_pts = column_i32(row, 3)?;
            data.scan = payload_field(column_blob(row, 4)?);
            data.user_data = user_data_field(column_blob(row, 5)?, dialect);
        }
        PayloadLayout::DepthConstant => {
            let local = legacy_local_transform(column_blob(row, 2)?);
            let constant = column_f64(row, 3)? as f32;
            if constant > 0.0 {
                let f = 1.0 / constant;
                data.calibration = Calibration::Cameras(vec![CameraModel::new(f, f, 0.0, 0.0, local)]);
            }
            data.scan = payload_field(column_blob(row, 4)?);
        }
        PayloadLayout::Intrinsics | PayloadLayout::NodeUserData | PayloadLayout::ScanMaxPoints => {
            let local = legacy_local_transform(column_blob(row, 2)?);
            data.calibration = legacy_intrinsics(
                column_opt_f64(row, 3)?,
                column_f64(row, 4)? as f32,
                column_f64(row, 5)? as f32,
                column_f64(row, 6)? as f32,
                local,
            );
            let mut next = 7;
            if dialect.has_scan_max_pts() {
                data.scan_max_pts = column_i32(row, next)?;
                next += 1;
            }
            data.scan = payload_field(column_blob(row, next)?);
            next += 1;
            if dialect.user_data_location() == UserDataLocation::Node {
                data.user_data = user_data_field(column_blob(row, next)?, dialect);
            }
        }
    }
    Ok(data)
}

/// Legacy `Depth.local_transform`: anything but a full transform is identity.
fn legacy_local_transform(bytes: Option<Vec<u8>>) -> Transform {
    bytes
        .as_deref()
        .and_then(decode_transform)
        .unwrap_or_else(Transform::identity)
}

fn legacy_intrinsics(fx: Option<f64>, fy: f32, cx: f32, cy: f32, local: Transform) -> Calibration {
    let fx = match fx {
        Some(fx) if fx != 0.0 => fx as f32,
        _ => return Calibration::None,
    };
    if fy < 1.0 {
        Calibration::Stereo(StereoCameraModel::new(fx, fx, cx, cy, fy, local))
    } else {
        Calibration::Cameras(vec![CameraModel::new(fx, fy, cx, cy, local)])
    }
}

fn user_data_field(bytes: Option<Vec<u8>>, dialect: &Dialect) -> Option<UserData> {
    let bytes = bytes.filter(|b| !b.is_empty())?;
    Some(match dialect.user_data_location() {
        UserDataLocation::Data => UserData::Compressed(bytes),
        _ => UserData::Raw(bytes),
    })
}
