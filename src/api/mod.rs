//! HTTP surface: `/auth/*` for accounts, `/med/*` for uploads and the
//! patient record, `/health` for liveness.
//!
//! `/med/*` routes sit behind the bearer-token middleware. Handlers hand the
//! blocking core work to `spawn_blocking`.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer};
pub use types::ApiContext;
