pub mod app;
pub mod auth;
pub mod error;
pub mod handle;
pub mod handlers;
pub mod state;

pub use app::build_app;
pub use error::{ApiError, ServerError};
pub use handle::{ServerHandle, ServerLayout};
pub use state::AppState;
