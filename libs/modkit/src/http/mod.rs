//! HTTP composition shared by every app: request ids, tracing, timeouts and
//! static file serving around the routes contributed by modules.

pub mod request_id;
pub mod server;
pub mod static_files;

pub use request_id::XRequestId;
pub use server::{compose_router, Middleware};
pub use static_files::StaticSource;
