//! Error type of the persistence engine.
//!
//! Expected absence (unknown id, no rows) never surfaces here: lookups return
//! `Option` or empty collections instead.  Every [`StoreError`] signals a
//! defect in the caller, the store file or the build, and no operation
//! attempts to continue a batch after returning one.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can arise from map store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database path is empty")]
    EmptyPath,
    #[error("Failed to create the baseline schema: {0}")]
    Schema(#[source] rusqlite::Error),
    #[error("Failed to mirror the in-memory database {direction} {path}: {source}")]
    Mirror {
        direction: &'static str,
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Wrong format of the calibration field ({0} bytes)")]
    CalibrationFormat(usize),
    #[error("Saved buffer size ({bytes} bytes) does not match descriptor size ({elements})")]
    DescriptorFormat { bytes: usize, elements: usize },
    #[error("Node {node_id}: {keypoints} keypoints cannot be paired with {points} 3D points")]
    WordPairing {
        node_id: i32,
        keypoints: usize,
        points: usize,
    },
    #[error("Node {node_id}: keypoint {index} observes word {keypoint_word} but its 3D point belongs to word {point_word}")]
    WordMismatch {
        node_id: i32,
        index: usize,
        keypoint_word: i32,
        point_word: i32,
    },
    #[error("Unsupported link type {value} (from {from} to {to})")]
    UnsupportedLinkType { from: i32, to: i32, value: i32 },
    #[error("Database version {version} cannot store this calibration: {reason}")]
    UnsupportedCalibration { version: String, reason: String },
    #[error("Database version {version} keeps user data uncompressed on the node row (node {node_id})")]
    CompressedUserData { version: String, node_id: i32 },
}
