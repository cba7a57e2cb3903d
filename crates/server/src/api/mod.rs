pub mod analytics;
pub mod detection;
pub mod error;
pub mod gateways;
pub mod handlers;
pub mod matcher;
pub mod middleware;
pub mod routes;
pub mod templates;

pub use error::ApiError;
pub use routes::create_router;
