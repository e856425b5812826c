//! Domain layer: identifiers and the upstream wire shapes.

pub mod content;
pub mod ids;

pub use content::{Block, BlockList, Collection, ListResponse, Page, PageList};
pub use ids::{NodeId, Timestamp};
