pub mod approval_api;
pub mod transport;
pub mod websocket;

pub use approval_api::{ApprovalApi, ApprovalBody, HttpApprovalApi};
pub use transport::{ConnectionError, Transport, TransportError};
pub use websocket::WebSocketTransport;
