//! Application services layer: the upstream contract, pagination and the
//! collection walker built on top of the cache.

pub mod error;
pub mod mirror;
pub mod paging;
pub mod remote;
