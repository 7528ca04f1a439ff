//! copilot-sdk-rpc: JSON-RPC 2.0 transport for the Copilot SDK.
//!
//! - [`codec`] - `Content-Length` and newline framing
//! - [`message`] - wire types and inbound frame classification
//! - [`client`] - the multiplexer: correlation ids, pending calls, inbound routing
//! - [`error`] - transport error taxonomy

pub mod client;
pub mod codec;
pub mod error;
pub mod message;

pub use client::RpcClient;
pub use codec::Framing;
pub use error::TransportError;
pub use message::{IncomingMessage, Request, RequestId, Response, RpcError};
