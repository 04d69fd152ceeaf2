//! Ingress layer (§4.1): the HTTP request/response surface and the
//! duplex WebSocket channel external agent runtimes use to submit hook
//! events and receive dispatch results.

pub mod http;
pub mod http_worker;
pub mod state;
pub mod wire;
pub mod ws;

pub use http::router;
pub use http_worker::{HttpWorkerHandle, WorkerRegistrationSpec};
pub use state::AppState;
pub use wire::DuplexMessage;
