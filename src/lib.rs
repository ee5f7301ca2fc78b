//! Article synchronization core for a personal RSS reader.
//!
//! Pulls articles from a hosted feed API under a hard daily call quota,
//! reconciles them with local SQLite state, pushes queued read/star changes
//! back upstream, and prunes old articles down to a retention limit.

pub mod config;
pub mod storage;
pub mod sync;
pub mod upstream;
pub mod util;
