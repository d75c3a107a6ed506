//! HTTP plumbing: transport seam, request pipeline and decoded responses.

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod pipeline;
pub mod response;
pub mod transport;

pub use pipeline::{HttpPipeline, RequestOptions};
pub use response::RawResponse;
pub use transport::{HttpTransport, ReqwestTransport, TransportRequest, TransportResponse};
pub use reqwest::Method;
