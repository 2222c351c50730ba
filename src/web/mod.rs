pub mod auth;
mod responses;
pub mod router;
pub mod state;
pub mod users;

pub use responses::{ApiMessage, json_error};
pub use state::AppState;
