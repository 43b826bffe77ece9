//! Stream sessions
//!
//! A `StreamSession` owns one listener's audio graph and everything that
//! feeds it:
//! - the recording collection and one track player per track tuning
//! - the ambient mixer (or a silence source when there are no speakers)
//! - the watchdog that ends the session once nobody is listening

mod request;
mod session;
mod watchdog;

pub use request::StreamRequest;
pub use session::{SessionOptions, SessionServices, StreamSession, CLEANUP_EVENT};
pub use watchdog::Watchdog;
