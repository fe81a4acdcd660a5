#![forbid(unsafe_code)]

//! **ignite-handlers** – the event handler chain and Upload Mode Policy
//! (spec §4.4, §4.5).

pub mod chain;
pub mod db_writer;
pub mod interval_validator;
pub mod session_status;
pub mod upload_mode;

pub use chain::{DropReason, Handler, HandlerChain, HandlerOutcome, StagedEvent};
pub use db_writer::{DbWriterStage, ACTIVATION_TS_UNKNOWN};
pub use interval_validator::IntervalValidator;
pub use session_status::{IgnitionSignal, SessionStatusHandler, SessionStatusStage};
pub use upload_mode::UploadModePolicy;
