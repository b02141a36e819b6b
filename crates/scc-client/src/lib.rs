//! Client for the Single Calculus Chain (SCC) processing service.
//!
//! One [`Session`] holds the cookies and login state of a connection. An
//! [`SccClient`] built on it runs the remote operations and tracks every
//! measurement it touches in a [`MeasurementRegistry`], rejecting requests
//! the lifecycle does not allow before they reach the network.
//!
//! ```ignore
//! let session = Arc::new(Session::new(&config, credentials.http_auth())?);
//! let client = SccClient::new(session, config);
//! client.login(&credentials).await?;
//! let id = client.upload(Path::new("ABC2023050108000830.nc")).await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod session;
pub mod types;

pub use client::{SccClient, UploadOutcome};
pub use config::{ClientConfig, Credentials, DEFAULT_BASE_URL};
pub use error::{Result, SccError};
pub use lifecycle::{Event, MeasurementRegistry, MeasurementState, RemoteMeasurement, Transition};
pub use session::Session;
pub use types::{MeasurementInfo, Page, Product, SearchCriteria, STATUS_OK};
