//! Admin console: a thin HTTP view over the core's state.

pub mod media;
pub mod memories;
pub mod queue;
pub mod server;
pub mod state;

pub use server::start_admin_console;
pub use state::{ApiError, ApiState};
