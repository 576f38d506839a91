//! Async API client core for the maize yield prediction platform.
//!
//! # Overview
//! Sits between UI code and the platform's HTTP API. Each call flows through
//! the same pipeline: [`Transport`] performs one attempt, [`classify`]
//! normalizes any failure, [`RetryController`] decides whether to try again,
//! [`Fallback`] substitutes data for endpoints the backend lacks, and
//! [`AuthState`] is told when a failure invalidates the session.
//! [`RequestHook`] ties one such call to a consumer's lifecycle.
//!
//! # Design
//! - [`ApiClient`] keeps the `build_*` / execute split: requests are plain
//!   data until they are handed to the transport.
//! - The session has a single writer ([`AuthState`]); the transport only
//!   reads it to attach the bearer token.
//! - Host collaborators (connectivity, storage, login redirect) are traits so
//!   tests and embedders can supply their own.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod auth;
pub mod classify;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod fallback;
pub mod hook;
pub mod http;
pub mod retry;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use auth::{AuthChange, AuthChangeReason, AuthState, Redirector, Subscription};
pub use classify::{classify, is_public_endpoint};
pub use client::{ApiClient, CallOptions, ListQuery};
pub use config::{ClientConfig, ConfigError};
pub use connectivity::{Connectivity, NetworkStatus};
pub use error::{ClassifiedError, ErrorKind, RequestFailure, TransportError};
pub use fallback::Fallback;
pub use hook::{HookState, RequestHook};
pub use http::{HttpMethod, HttpRequest, HttpResponse, ResponseBody};
pub use retry::{RetryController, RetryOutcome, RetryPolicy};
pub use session::{AuthSession, SessionCell, SessionReader};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
pub use transport::{ReqwestTransport, Transport};
pub use types::{
    Credentials, DashboardSummary, Farm, FarmUpdate, HealthStatus, ListShape, LoginResponse, NewFarm,
    NewPlantingSession, NewUser, Page, PlantingSession, PlantingSessionUpdate, Registration, Role, User, UserUpdate,
};
