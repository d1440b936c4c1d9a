// Submodules
pub mod extract;
pub mod response;
pub mod routes;
mod runtime;
mod state;

// Public API (what main.rs imports)
pub use routes::create_router;
pub use runtime::{serve, start_server};
pub use state::AppState;
