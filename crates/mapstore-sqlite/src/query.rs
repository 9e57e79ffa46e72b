//! Read operations used by the graph manager.
//!
//! | operation                | result on absence                    |
//! |--------------------------|--------------------------------------|
//! | [`MapStore::load_nodes`] | unknown ids dropped with a warning   |
//! | [`MapStore::load_words`] | unknown ids dropped with a warning   |
//! | [`MapStore::load_links`] | empty map                            |
//! | [`MapStore::get_node_info`], [`MapStore::get_weight`], [`MapStore::get_node_id_by_label`] | `None` |
//! | [`MapStore::get_last_node_id`], [`MapStore::get_last_word_id`] | `0` |

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use mapstore_types::{Link, LinkType, Node, NodeInfo, VisualWord};
use rusqlite::{OptionalExtension, Row};
use tracing::{debug, error, warn};

use crate::codec::decode_descriptor;
use crate::dialect::Dialect;
use crate::error::StoreError;
use crate::mapper::{
    column_blob, column_f64, column_i32, column_text, column_transform, read_link,
    read_node_word, read_sensor_data,
};
use crate::store::MapStore;

const NODE_WORDS_SELECT: &str = "SELECT word_id, pos_x, pos_y, size, dir, response, \
     depth_x, depth_y, depth_z FROM Map_Node_Word WHERE node_id = ?1 ORDER BY word_id";

const WORD_SELECT: &str = "SELECT id, descriptor_size, descriptor FROM Word WHERE id = ?1";

/// Words entered since the last statistics row, and the highest word id in
/// the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    pub words: Vec<VisualWord>,
    pub last_word_id: i32,
}

impl MapStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Nodes
    // ─────────────────────────────────────────────────────────────────────────

    /// Load nodes with their scalar fields and word observations, in request
    /// order.  Links and sensor payloads are loaded separately.
    pub fn load_nodes(&self, ids: &[i32]) -> Result<Vec<Node>, StoreError> {
        let start = Instant::now();
        let dialect = *self.dialect();
        let mut nodes = Vec::with_capacity(ids.len());
        for &id in ids {
            let info = self
                .conn()
                .prepare_cached(dialect.node_select())?
                .query_row([id], |row| Ok(read_node_info(row, &dialect)))
                .optional()?
                .transpose()?;
            let Some(info) = info else {
                warn!(node_id = id, "node not found in database");
                continue;
            };

            let mut node = Node::new(id, info.map_id, info.weight, info.stamp, &info.label, info.pose);
            let mut stmt = self.conn().prepare_cached(NODE_WORDS_SELECT)?;
            let mut rows = stmt.query([id])?;
            while let Some(row) = rows.next()? {
                let (word_id, kp, point) = read_node_word(row)?;
                node.words.push((word_id, kp));
                node.words3.push((word_id, point));
            }
            node.saved = true;
            nodes.push(node);
        }
        debug!(
            requested = ids.len(),
            loaded = nodes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded nodes"
        );
        Ok(nodes)
    }

    /// Fill each node's sensor payload.  Nodes without a payload row keep an
    /// empty one.
    pub fn load_sensor_payload(&self, nodes: &mut [Node]) -> Result<(), StoreError> {
        let start = Instant::now();
        let dialect = *self.dialect();
        let mut stmt = self.conn().prepare_cached(dialect.sensor_data_select())?;
        for node in nodes.iter_mut() {
            let data = stmt
                .query_row([node.id], |row| Ok(read_sensor_data(row, &dialect)))
                .optional()?
                .transpose()?;
            match data {
                Some(data) => node.sensor_data = data,
                None => debug!(node_id = node.id, "no sensor data"),
            }
        }
        debug!(
            count = nodes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded sensor data"
        );
        Ok(())
    }

    /// Nodes entered at or after the latest `Statistics` row, i.e. since the
    /// last session was closed.
    pub fn load_last_batch(&self) -> Result<Vec<Node>, StoreError> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT id FROM Node \
             WHERE time_enter >= (SELECT MAX(time_enter) FROM Statistics) ORDER BY id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i32>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        self.load_nodes(&ids)
    }

    pub fn get_node_info(&self, id: i32) -> Result<Option<NodeInfo>, StoreError> {
        let dialect = *self.dialect();
        Ok(self
            .conn()
            .prepare_cached(dialect.node_select())?
            .query_row([id], |row| Ok(read_node_info(row, &dialect)))
            .optional()?
            .transpose()?)
    }

    pub fn get_weight(&self, id: i32) -> Result<Option<i32>, StoreError> {
        Ok(self
            .conn()
            .prepare_cached("SELECT weight FROM Node WHERE id = ?1")?
            .query_row([id], |row| row.get::<_, Option<i32>>(0))
            .optional()?
            .map(|weight| weight.unwrap_or(0)))
    }

    /// Ids of every node; with `exclude_childless`, only nodes some link
    /// points to.
    pub fn get_all_node_ids(&self, exclude_childless: bool) -> Result<BTreeSet<i32>, StoreError> {
        let sql = if exclude_childless {
            "SELECT DISTINCT id FROM Node INNER JOIN Link ON id = to_id ORDER BY id"
        } else {
            "SELECT id FROM Node ORDER BY id"
        };
        let mut stmt = self.conn().prepare_cached(sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i32>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    /// Non-empty labels keyed by node id.  Stores older than labels have none.
    pub fn get_all_labels(&self) -> Result<BTreeMap<i32, String>, StoreError> {
        if !self.dialect().has_labels() {
            return Ok(BTreeMap::new());
        }
        let mut stmt = self.conn().prepare_cached(
            "SELECT id, label FROM Node WHERE label IS NOT NULL AND label != '' ORDER BY id",
        )?;
        let labels = stmt
            .query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(labels)
    }

    pub fn get_node_id_by_label(&self, label: &str) -> Result<Option<i32>, StoreError> {
        if !self.dialect().has_labels() {
            warn!(version = %self.schema_version(), "labels are not supported by this database");
            return Ok(None);
        }
        Ok(self
            .conn()
            .prepare_cached("SELECT id FROM Node WHERE label = ?1")?
            .query_row([label], |row| row.get(0))
            .optional()?)
    }

    /// Highest node id, `0` for an empty store.
    pub fn get_last_node_id(&self) -> Result<i32, StoreError> {
        let id: Option<i32> = self
            .conn()
            .prepare_cached("SELECT MAX(id) FROM Node")?
            .query_row([], |row| row.get(0))?;
        Ok(id.unwrap_or(0))
    }

    /// Number of word observations of a node.
    pub fn get_inverted_index_ni(&self, node_id: i32) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()
            .prepare_cached("SELECT COUNT(word_id) FROM Map_Node_Word WHERE node_id = ?1")?
            .query_row([node_id], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Links
    // ─────────────────────────────────────────────────────────────────────────

    /// Outgoing links of `node_id` keyed by target id.  [`LinkType::Undefined`]
    /// selects every type.
    pub fn load_links(
        &self,
        node_id: i32,
        filter: LinkType,
    ) -> Result<BTreeMap<i32, Link>, StoreError> {
        let dialect = *self.dialect();
        let sql = dialect.link_select(filter);
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let mut rows = stmt.query([node_id])?;
        let mut links = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let link = read_link(row, &dialect, false)?;
            links.insert(link.to, link);
        }
        Ok(links)
    }

    /// Replace each node's links by its persisted outgoing links.  A stored
    /// type that is not a concrete link type is an error.
    pub fn load_links_into(&self, nodes: &mut [Node]) -> Result<(), StoreError> {
        let start = Instant::now();
        let dialect = *self.dialect();
        let sql = dialect.link_select(LinkType::Undefined);
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let mut total = 0usize;
        for node in nodes.iter_mut() {
            node.links.clear();
            let mut rows = stmt.query([node.id])?;
            while let Some(row) = rows.next()? {
                let link = read_link(row, &dialect, true)?;
                node.links.insert(link.to, link);
            }
            node.links_modified = false;
            total += node.links.len();
        }
        debug!(
            count = total,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded links"
        );
        Ok(())
    }

    /// Every link ordered by `(from_id, to_id)`.  With `ignore_null_links`,
    /// links whose transform is null are skipped.
    pub fn get_all_links(&self, ignore_null_links: bool) -> Result<Vec<Link>, StoreError> {
        let dialect = *self.dialect();
        let sql = dialect.link_select_all();
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let mut rows = stmt.query([])?;
        let mut links = Vec::new();
        while let Some(row) = rows.next()? {
            let link = read_link(row, &dialect, false)?;
            if ignore_null_links && link.transform.is_null() {
                continue;
            }
            links.push(link);
        }
        Ok(links)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Words
    // ─────────────────────────────────────────────────────────────────────────

    /// Words entered at or after the latest `Statistics` row.
    pub fn load_dictionary(&self) -> Result<Dictionary, StoreError> {
        let start = Instant::now();
        let mut stmt = self.conn().prepare_cached(
            "SELECT id, descriptor_size, descriptor FROM Word \
             WHERE time_enter >= (SELECT MAX(time_enter) FROM Statistics) ORDER BY id",
        )?;
        let mut rows = stmt.query([])?;
        let mut words = Vec::new();
        while let Some(row) = rows.next()? {
            let word = read_word(row)?;
            if word.id <= 0 {
                error!(word_id = word.id, "skipping dictionary row with an invalid word id");
                continue;
            }
            words.push(word);
        }
        let last_word_id = self.get_last_word_id()?;
        debug!(
            count = words.len(),
            last_word_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded dictionary"
        );
        Ok(Dictionary {
            words,
            last_word_id,
        })
    }

    /// Load the requested words.  Ids missing from the store are reported in
    /// one warning.
    pub fn load_words(&self, ids: &BTreeSet<i32>) -> Result<Vec<VisualWord>, StoreError> {
        let mut stmt = self.conn().prepare_cached(WORD_SELECT)?;
        let mut words = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for &id in ids {
            let word = stmt
                .query_row([id], |row| Ok(read_word(row)))
                .optional()?
                .transpose()?;
            match word {
                Some(word) => words.push(word),
                None => missing.push(id),
            }
        }
        if !missing.is_empty() {
            warn!(
                requested = ids.len(),
                missing = ?missing,
                "some words were not found in the database"
            );
        }
        Ok(words)
    }

    /// Highest word id, `0` for an empty vocabulary.
    pub fn get_last_word_id(&self) -> Result<i32, StoreError> {
        let id: Option<i32> = self
            .conn()
            .prepare_cached("SELECT MAX(id) FROM Word")?
            .query_row([], |row| row.get(0))?;
        Ok(id.unwrap_or(0))
    }
}

fn read_node_info(row: &Row<'_>, dialect: &Dialect) -> Result<NodeInfo, StoreError> {
    let id = column_i32(row, 0)?;
    let mut info = NodeInfo {
        map_id: column_i32(row, 1)?,
        weight: column_i32(row, 2)?,
        pose: column_transform(row, 3, "pose", id)?,
        label: String::new(),
        stamp: 0.0,
    };
    if dialect.has_labels() {
        info.stamp = column_f64(row, 4)?;
        info.label = column_text(row, 5)?;
    }
    Ok(info)
}

fn read_word(row: &Row<'_>) -> Result<VisualWord, StoreError> {
    let id = column_i32(row, 0)?;
    let elements = column_i32(row, 1)?;
    let bytes = column_blob(row, 2)?.unwrap_or_default();
    let elements = usize::try_from(elements).map_err(|_| StoreError::DescriptorFormat {
        bytes: bytes.len(),
        elements: 0,
    })?;
    let mut word = VisualWord::new(id, decode_descriptor(&bytes, elements)?);
    word.saved = true;
    Ok(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::StatisticsRecord;
    use mapstore_types::{Descriptor, KeyPoint, Point3, Transform};

    fn memory_store() -> (tempfile::TempDir, MapStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            in_memory: true,
            ..StoreConfig::default()
        };
        let store = MapStore::connect(dir.path().join("query.db"), false, config).unwrap();
        (dir, store)
    }

    fn make_node(id: i32, label: &str) -> Node {
        Node::new(id, 0, id * 2, 100.0 + id as f64, label, Transform::from_translation(id as f32, 0.0, 0.0))
    }

    #[test]
    fn empty_store_has_no_ids_or_labels() {
        let (_dir, store) = memory_store();
        assert!(store.get_all_node_ids(false).unwrap().is_empty());
        assert!(store.get_all_labels().unwrap().is_empty());
        assert_eq!(store.get_last_node_id().unwrap(), 0);
        assert_eq!(store.get_last_word_id().unwrap(), 0);
        assert!(store.get_node_info(1).unwrap().is_none());
        assert!(store.get_weight(1).unwrap().is_none());
    }

    #[test]
    fn load_nodes_keeps_request_order_and_drops_unknown() {
        let (_dir, store) = memory_store();
        store
            .save_nodes(&[make_node(1, "a"), make_node(2, ""), make_node(3, "c")])
            .unwrap();
        let nodes = store.load_nodes(&[3, 99, 1]).unwrap();
        let ids: Vec<i32> = nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(nodes[0].label, "c");
        assert_eq!(nodes[1].weight, 2);
        assert!(nodes.iter().all(|n| n.saved));
    }

    #[test]
    fn labels_and_lookups() {
        let (_dir, store) = memory_store();
        store
            .save_nodes(&[make_node(1, "kitchen"), make_node(2, ""), make_node(3, "hall")])
            .unwrap();
        let labels = store.get_all_labels().unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&3], "hall");
        assert_eq!(store.get_node_id_by_label("kitchen").unwrap(), Some(1));
        assert_eq!(store.get_node_id_by_label("garage").unwrap(), None);
        assert_eq!(store.get_weight(3).unwrap(), Some(6));
        assert_eq!(store.get_last_node_id().unwrap(), 3);

        let info = store.get_node_info(3).unwrap().unwrap();
        assert_eq!(info.label, "hall");
        assert_eq!(info.stamp, 103.0);
        assert_eq!(info.pose.x(), 3.0);
    }

    #[test]
    fn node_words_load_sorted_with_points() {
        let (_dir, store) = memory_store();
        let mut node = make_node(1, "");
        node.words.push((7, KeyPoint::new(1.0, 2.0, 5.9, 45.0, 0.25)));
        node.words.push((3, KeyPoint::new(3.0, 4.0, 8.0, -1.0, 0.5)));
        node.words3.push((7, Point3::new(0.1, 0.2, 0.3)));
        node.words3.push((3, Point3::new(1.0, 2.0, 3.0)));
        store.save_nodes(&[node]).unwrap();

        assert_eq!(store.get_inverted_index_ni(1).unwrap(), 2);
        let loaded = &store.load_nodes(&[1]).unwrap()[0];
        assert_eq!(loaded.words[0].0, 3);
        assert_eq!(loaded.words[1].0, 7);
        // Size is stored as an integer.
        assert_eq!(loaded.words[1].1.size, 5.0);
        assert_eq!(loaded.words3[0].1, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn word_reassignment_repoints_observation() {
        let (_dir, store) = memory_store();
        let mut node = make_node(1, "");
        node.words.push((10, KeyPoint::default()));
        node.words.push((11, KeyPoint::default()));
        store.save_nodes(&[node.clone()]).unwrap();

        let reassign = mapstore_types::WordReassignment {
            node_id: 1,
            old_word_id: 10,
            new_word_id: 12,
        };
        store.update_nodes(&[node], &[reassign], false).unwrap();
        let loaded = &store.load_nodes(&[1]).unwrap()[0];
        let ids: Vec<i32> = loaded.words.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![11, 12]);
    }

    #[test]
    fn load_words_reports_missing_without_error() {
        let (_dir, store) = memory_store();
        let mut words = vec![
            VisualWord::new(1, Descriptor::Binary(vec![1, 2, 3, 4])),
            VisualWord::new(2, Descriptor::Float(vec![0.5, -0.5])),
        ];
        store.save_words(&mut words).unwrap();
        let ids: BTreeSet<i32> = [1, 2, 5].into_iter().collect();
        let loaded = store.load_words(&ids).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].descriptor, Descriptor::Float(vec![0.5, -0.5]));
        assert!(loaded.iter().all(|w| w.saved));
    }

    #[test]
    fn mismatched_descriptor_is_an_error() {
        let (_dir, store) = memory_store();
        store
            .execute_no_result(
                "INSERT INTO Word(id, descriptor_size, descriptor) VALUES(4, 3, x'0102030405');",
            )
            .unwrap();
        let ids: BTreeSet<i32> = [4].into_iter().collect();
        assert!(matches!(
            store.load_words(&ids),
            Err(StoreError::DescriptorFormat { bytes: 5, elements: 3 })
        ));
    }

    #[test]
    fn last_batch_and_dictionary_follow_statistics_watermark() {
        let (_dir, store) = memory_store();
        store.save_nodes(&[make_node(1, ""), make_node(2, "")]).unwrap();
        let mut old_words = vec![VisualWord::new(1, Descriptor::Binary(vec![9; 8]))];
        store.save_words(&mut old_words).unwrap();
        store
            .execute_no_result(
                "UPDATE Node SET time_enter = '2000-01-01 00:00:00';\
                 UPDATE Word SET time_enter = '2000-01-01 00:00:00';",
            )
            .unwrap();
        store.add_statistics(&StatisticsRecord::default()).unwrap();
        store
            .execute_no_result("UPDATE Statistics SET time_enter = '2001-01-01 00:00:00';")
            .unwrap();

        store.save_nodes(&[make_node(3, "")]).unwrap();
        let mut new_words = vec![VisualWord::new(5, Descriptor::Binary(vec![1; 8]))];
        store.save_words(&mut new_words).unwrap();

        let batch = store.load_last_batch().unwrap();
        assert_eq!(batch.iter().map(|n| n.id).collect::<Vec<_>>(), vec![3]);

        let dictionary = store.load_dictionary().unwrap();
        assert_eq!(dictionary.words.len(), 1);
        assert_eq!(dictionary.words[0].id, 5);
        assert_eq!(dictionary.last_word_id, 5);
    }

    #[test]
    fn dictionary_skips_invalid_word_ids() {
        let (_dir, store) = memory_store();
        store.add_statistics(&StatisticsRecord::default()).unwrap();
        store
            .execute_no_result(
                "UPDATE Statistics SET time_enter = '2001-01-01 00:00:00';
                 INSERT INTO Word(id, descriptor_size, descriptor) VALUES(0, 4, x'01020304');",
            )
            .unwrap();
        let mut words = vec![VisualWord::new(6, Descriptor::Binary(vec![6; 4]))];
        store.save_words(&mut words).unwrap();

        let dictionary = store.load_dictionary().unwrap();
        let ids: Vec<i32> = dictionary.words.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![6]);
    }

    #[test]
    fn touched_words_rejoin_the_dictionary() {
        let (_dir, store) = memory_store();
        let mut words = vec![
            VisualWord::new(1, Descriptor::Binary(vec![1; 4])),
            VisualWord::new(2, Descriptor::Binary(vec![2; 4])),
        ];
        store.save_words(&mut words).unwrap();
        store
            .execute_no_result("UPDATE Word SET time_enter = '2000-01-01 00:00:00';")
            .unwrap();
        store.add_statistics(&StatisticsRecord::default()).unwrap();
        store
            .execute_no_result("UPDATE Statistics SET time_enter = '2001-01-01 00:00:00';")
            .unwrap();
        assert!(store.load_dictionary().unwrap().words.is_empty());

        store.update_words(&words[1..], false).unwrap();
        assert!(store.load_dictionary().unwrap().words.is_empty());

        store.update_words(&words[1..], true).unwrap();
        let dictionary = store.load_dictionary().unwrap();
        assert_eq!(dictionary.words.len(), 1);
        assert_eq!(dictionary.words[0].id, 2);
        assert_eq!(dictionary.last_word_id, 2);
    }

    #[test]
    fn without_statistics_last_batch_is_empty() {
        let (_dir, store) = memory_store();
        store.save_nodes(&[make_node(1, "")]).unwrap();
        assert!(store.load_last_batch().unwrap().is_empty());
    }

    #[test]
    fn childless_filter_keeps_link_targets() {
        let (_dir, store) = memory_store();
        let mut a = make_node(1, "");
        a.add_link(Link::new(1, 2, LinkType::Neighbor, Transform::identity(), 1.0, 1.0));
        store.save_nodes(&[a, make_node(2, ""), make_node(3, "")]).unwrap();
        let all = store.get_all_node_ids(false).unwrap();
        assert_eq!(all.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        let targets = store.get_all_node_ids(true).unwrap();
        assert_eq!(targets.into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn link_filter_and_null_links() {
        let (_dir, store) = memory_store();
        let mut a = make_node(1, "");
        a.add_link(Link::new(1, 2, LinkType::Neighbor, Transform::identity(), 1.0, 1.0));
        a.add_link(Link::new(1, 5, LinkType::GlobalClosure, Transform::null(), 0.5, 0.25));
        store.save_nodes(&[a]).unwrap();

        let closures = store.load_links(1, LinkType::GlobalClosure).unwrap();
        assert_eq!(closures.len(), 1);
        assert_eq!(closures[&5].trans_variance, 0.25);
        assert!(store.load_links(7, LinkType::Undefined).unwrap().is_empty());

        assert_eq!(store.get_all_links(false).unwrap().len(), 2);
        let non_null = store.get_all_links(true).unwrap();
        assert_eq!(non_null.len(), 1);
        assert_eq!(non_null[0].to, 2);
    }

    #[test]
    fn batch_link_load_rejects_unknown_type() {
        let (_dir, store) = memory_store();
        store.save_nodes(&[make_node(1, "")]).unwrap();
        store
            .execute_no_result("INSERT INTO Link(from_id, to_id, type) VALUES(1, 2, 6);")
            .unwrap();
        let single = store.load_links(1, LinkType::Undefined).unwrap();
        assert_eq!(single[&2].link_type, LinkType::Undefined);
        assert!(single[&2].transform.is_null());

        let mut nodes = store.load_nodes(&[1]).unwrap();
        assert!(matches!(
            store.load_links_into(&mut nodes),
            Err(StoreError::UnsupportedLinkType { from: 1, to: 2, value: 6 })
        ));
    }
}
