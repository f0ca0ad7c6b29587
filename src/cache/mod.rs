//! Persistent deployment cache
//!
//! The cache is the durable record of what has already been done for a
//! deployment, keyed by `(cache name, environment)`. Upload and verify runs
//! resume from it.
//!
//! # Item States
//!
//! | link | onChain | verifyRun | Meaning |
//! |------|---------|-----------|---------|
//! | empty | false | false | Not uploaded |
//! | set | false | false | Uploaded, config line pending |
//! | set | true | false | Written, not yet verified |
//! | set | true | true | Written and verified |

pub mod model;
pub mod store;

pub use model::{Cache, CacheItem, CacheSummary, ProgramInfo, WhitelistInfo};
pub use store::{CacheFile, CacheStore};
