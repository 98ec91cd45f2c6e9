//! HTTP API module.
//!
//! `POST /execute` plus session inspection endpoints over a [`SessionRegistry`].
//!
//! [`SessionRegistry`]: crate::session::SessionRegistry

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{ExecuteRequest, HealthResponse};
pub use routes::create_router;
pub use state::AppState;
