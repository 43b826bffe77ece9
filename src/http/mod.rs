//! HTTP control relay
//!
//! Clients talk to running sessions through this API:
//! - POST /streams - Start (or reuse) the stream for a session
//! - GET /streams - Sessions started by this relay
//! - GET /streams/:id - Mount status and listener count
//! - POST /streams/:id/{heartbeat,move_listener,modify_stream,skip_ahead,play_asset}
//! - POST /streams/refresh - Reload recordings in every session
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
