//! pgscale core - request pipeline for the loopback statistics bridge.
//!
//! This crate holds everything between the raw bytes read from a client and
//! the bytes written back, without doing any I/O itself:
//!
//! - **Request line parsing** over an immutable read buffer ([`request`])
//! - **Routing** of method + target to an [`router::Outcome`] ([`router`])
//! - **Result sets** and their JSON-like body rendering ([`result_set`])
//! - **Responses** with status line composition ([`response`])
//! - The **query executor** seam implemented by the host engine ([`executor`])
//! - The **pipeline** tying the above together per connection ([`pipeline`])
//!
//! # Example
//!
//! ```
//! use pgscale_core::executor::ExecutorError;
//! use pgscale_core::pipeline::Pipeline;
//! use pgscale_core::result_set::{BodyFormat, ResultSet};
//! use pgscale_core::router::RouteTable;
//!
//! let pipeline = Pipeline::new(RouteTable::parametrized("stats"), BodyFormat::Legacy, 1024);
//! let engine = |_: &str| Ok::<_, ExecutorError>(ResultSet::default());
//!
//! let handled = pipeline.handle(b"GET /stats/connections HTTP/1.1\r\n\r\n", &engine);
//! assert_eq!(handled.response.to_bytes(), b"HTTP/1.1 200 OK\r\n\r\n[]".to_vec());
//! ```

pub mod executor;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod result_set;
pub mod router;

pub use executor::{ExecutorError, QueryExecutor};
pub use pipeline::{Handled, Pipeline};
pub use request::{ParseError, Request};
pub use response::{Response, Status};
pub use result_set::{BodyFormat, ResultSet};
pub use router::{
    DispatchPolicy, Outcome, PolicyKind, QueryId, RouteRejection, RouteTable, ViewName,
};
