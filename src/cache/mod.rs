//! Blockmirror cache engine
//!
//! Mirrors a remote content store (collections → pages → block trees) and
//! decides per read whether a stored listing is still current:
//!
//! - **Ownership index**: child → parent links learned from block listings,
//!   used to find the page that owns any block.
//! - **Freshness oracle**: the page edit times seen upstream versus the time
//!   each cached listing was taken at.
//! - **Store**: the listings themselves, mirrored to one JSON file per entry
//!   plus `meta.json`.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! directory = ".blockmirror/notion-cache"
//! persist = true
//! reuse_persisted_lists = false
//! retries = 2
//! retry_backoff_ms = 1000
//! ```

mod client;
mod config;
mod durable;
mod flight;
mod freshness;
mod keys;
mod lock;
mod ownership;
mod store;

pub use client::{CacheClient, CacheError, CacheStats, CacheStatus};
pub use config::CacheConfig;
pub use durable::{DurableError, DurableMirror, MetadataRecord, MetadataState, MirrorSnapshot};
pub use flight::{FlightGuard, SingleFlight};
pub use freshness::FreshnessOracle;
pub use keys::{EntryKey, EntryKind, META_FILE};
pub use ownership::{OwnershipIndex, Root};
pub use store::{CacheStore, StoreCounts};
