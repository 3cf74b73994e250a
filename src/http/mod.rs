//! HTTP surface for the rate-limited mock API.

mod handler;
mod server;

pub use handler::{quota_headers, rate_limited, ClientError, RateLimitParams, RequestHandler};
pub use server::{build_management_router, build_router, HttpServer};

