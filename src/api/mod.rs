//! HTTP boundary of the service.
//!
//! `POST /api/prescriptions/analyze` accepts a multipart image upload and
//! returns an `AnalysisReport`; `GET /api/health` reports the active engines
//! and LLM. Authentication and rate limiting are left to the deployment.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer};
pub use types::ApiContext;
