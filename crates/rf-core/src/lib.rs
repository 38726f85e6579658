//! rf-core: shared types, IDs, errors, configuration, the format catalog,
//! and the event bus.
//!
//! Every other rf-* crate depends on this one. It carries no I/O beyond
//! reading the configuration file.

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

pub use catalog::{FormatCatalog, FormatSpec};
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
