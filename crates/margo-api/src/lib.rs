mod app;
mod error;
mod handlers;
mod state;

pub use app::build_app;
pub use error::ApiError;
pub use state::AppState;
