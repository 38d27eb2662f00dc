//! Client-server communication protocol.
//!
//! This module exposes a [`Dispatcher`](crate::Dispatcher) over TCP. A client sends
//! [`Request`] frames and receives one [`Response`] per request, in order, on the same
//! connection.
//!
//! # Overview
//!
//! Each accepted connection is handed to a fixed-size thread pool and served until the client
//! sends [`Request::Disconnect`] or the stream fails. A request blocks its own connection until
//! the owning database worker has replied; other connections, and other databases, are not
//! affected. Because replies for one database arrive in submission order, a client that
//! pipelines several requests against one name can rely on that order end to end.
//!
//! # Key Components
//!
//! - [`Request`] / [`Response`]: the message set, one variant per dispatcher operation.
//! - [`ProtocolTransport`]: Abstraction over a bidirectional stream used to exchange messages.
//! - [`StorageServer`]: accept loop mapping requests onto dispatcher calls.
//!
//! # Binary Format
//!
//! Messages are encoded with `bincode` using big-endian, fixed-width integers. Enum variants
//! are tagged with their discriminant. Flat batches travel as an opaque string inside
//! [`Request::ExecuteFlatBatch`] and [`Response::FlatResults`], untouched by this layer.
//!
//! # See Also
//!
//! - [`codec`](crate::codec): the flat batch format.
mod request;
mod response;
mod server;
mod thread;
mod transport;

use thread::ThreadPool;

pub use request::Request;
pub use response::{Response, ResponseError};
pub use server::StorageServer;
pub use transport::{ProtocolTransport, TransportError};
