//! Shared data model, collaborator traits and error hierarchy for Tether.

pub mod error;
pub mod frame;
pub mod rpc;
pub mod session;
pub mod transport;
pub mod util;

pub use error::{
    CallError, ConfigError, CorrelationError, DispatchError, EncodingRejection, FailureCause,
    NegotiationError, TransportError,
};
pub use frame::EventFrame;
pub use rpc::{CallState, PendingRequest, RpcResponse};
pub use session::Session;
pub use transport::{EventSource, EventStream, HttpMethod, HttpRequest, HttpResponse, HttpSender};
