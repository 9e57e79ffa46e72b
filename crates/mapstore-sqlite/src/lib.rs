//! SQLite persistence engine for incrementally built robot maps.
//!
//! A map is a graph of [`Node`]s joined by [`Link`]s, plus the visual
//! vocabulary ([`VisualWord`]s) the nodes were quantized against.  The
//! engine writes the newest schema and reads (and appends to) every older
//! revision, choosing column sets through a per-connection [`Dialect`].
//!
//! | module      | concern                                              |
//! |-------------|------------------------------------------------------|
//! | [`codec`]   | byte layouts of transforms, calibrations, descriptors |
//! | [`version`] | numeric schema versions                              |
//! | [`dialect`] | version-gated statement text                         |
//! | [`store`]   | connection lifecycle and mirrored memory mode        |
//! | `mapper`    | entity ⇄ row translation for saves and updates       |
//! | `query`     | read operations                                      |
//! | [`config`]  | tuning options and their TOML file                   |
//!
//! ```rust,no_run
//! use mapstore_sqlite::{MapStore, StoreConfig};
//! use mapstore_types::{Node, Transform};
//!
//! let store = MapStore::connect("map.db", false, StoreConfig::default())?;
//! store.save_nodes(&[Node::new(1, 0, 0, 0.0, "start", Transform::identity())])?;
//! let nodes = store.load_nodes(&[1])?;
//! store.disconnect()?;
//! # Ok::<(), mapstore_sqlite::StoreError>(())
//! ```

pub mod codec;
pub mod config;
pub mod dialect;
pub mod error;
mod mapper;
mod query;
pub mod store;
pub mod telemetry;
pub mod version;

pub use config::StoreConfig;
pub use dialect::Dialect;
pub use error::StoreError;
pub use query::Dictionary;
pub use store::{MapStore, StatisticsRecord};
pub use version::SchemaVersion;

pub use mapstore_types::{
    Calibration, CameraModel, Descriptor, KeyPoint, Link, LinkType, Node, NodeInfo, Point3,
    SensorData, StereoCameraModel, Transform, UserData, VisualWord, WordReassignment,
};
