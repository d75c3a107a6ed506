//! Authenticated HTTP session layer for the Alexa cloud API.
//!
//! This crate owns everything that keeps an Echo account logged in: the
//! device identity, the cookie jar, the request pipeline with its manual
//! redirect loop, the persisted session format and the login state machine.

pub mod codec;
pub mod config;
pub mod cookies;
pub mod device;
pub mod error;
pub mod event;
pub mod http;
pub mod identity;
pub mod scheduler;
pub mod session;
mod wire;

pub use codec::SessionData;
pub use config::EchoConfig;
pub use cookies::{CookieJar, StoredCookie};
pub use device::Device;
pub use error::{Error, Result};
pub use event::{SessionEvent, SessionEventReceiver, SessionEvents, SessionStatus};
pub use http::{HttpPipeline, HttpTransport, RawResponse, RequestOptions, ReqwestTransport};
pub use identity::{Identity, Site};
pub use scheduler::{ScheduledTask, Scheduler, TokioScheduler};
pub use session::AuthSession;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{app, defaults, endpoints, env_vars, EchoConfig};
    pub use crate::error::{Error, Result};
    pub use crate::http::{HttpPipeline, Method, RawResponse, RequestOptions};
    pub use crate::identity::{Identity, Site};
    pub use crate::scheduler::{Scheduler, TokioScheduler};
    pub use crate::session::AuthSession;
}
