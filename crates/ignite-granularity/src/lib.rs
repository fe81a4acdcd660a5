#![forbid(unsafe_code)]

//! **ignite-granularity** – storage granularity reduction (spec §4.6):
//! session-partitioned thinning, trigger-pair collapsing, and the FIFO
//! fallback, orchestrated behind a suspend/resume control channel.

pub mod policies;
pub mod reducer;
pub mod sessions;

pub use policies::Checkpoint;
pub use reducer::GranularityReducer;
