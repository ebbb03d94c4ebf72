//! Gateway server implementation

pub mod auth;
pub mod proxy;
mod router;
mod server;
pub mod session;

pub use auth::{AuthGateway, SessionContext, TenantContext, auth_middleware};
pub use proxy::{Relay, TenantProxy};
pub use router::{AppState, context_handler, create_router, create_router_with_pages};
pub use server::Gateway;
pub use session::{AuthFailure, AuthResult, SessionVerifier};
