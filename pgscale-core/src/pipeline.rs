//! Per-connection request pipeline: parse, route, execute, serialize.

use tracing::{debug, error, warn};

use crate::executor::{ExecutorError, QueryExecutor};
use crate::request;
use crate::response::{Response, Status};
use crate::result_set::{self, BodyFormat};
use crate::router::{Outcome, QueryId, RouteTable};

/// The response for one connection, plus the engine failure that produced
/// it when that failure must also stop the bridge.
#[derive(Debug)]
pub struct Handled {
    pub response: Response,
    pub fatal: Option<ExecutorError>,
}

impl Handled {
    fn respond(response: Response) -> Self {
        Self {
            response,
            fatal: None,
        }
    }

    /// Answer used when the handler itself could not run to completion.
    pub fn internal_error() -> Self {
        Self::respond(Response::empty(Status::InternalServerError))
    }
}

/// Turns raw request bytes into exactly one [`Response`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    routes: RouteTable,
    format: BodyFormat,
    buffer_size: usize,
}

impl Pipeline {
    pub fn new(routes: RouteTable, format: BodyFormat, buffer_size: usize) -> Self {
        Self {
            routes,
            format,
            buffer_size,
        }
    }

    /// Capacity of the per-connection read buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn handle(&self, raw: &[u8], executor: &dyn QueryExecutor) -> Handled {
        let request = match request::parse(raw, self.buffer_size) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed request");
                return Handled::respond(Response::empty(Status::BadRequest));
            }
        };
        debug!(method = request.method, target = request.target, "Request line parsed");

        match self.routes.route(request.method, request.target) {
            Outcome::MethodNotSupported => {
                Handled::respond(Response::empty(Status::NotImplemented))
            }
            Outcome::NotFound => Handled::respond(Response::empty(Status::NotFound)),
            Outcome::Rejected(reason) => {
                warn!(%reason, target = request.target, "Rejecting view name");
                Handled::respond(Response::empty(Status::BadRequest))
            }
            Outcome::Dispatch(query) => self.dispatch(&query, executor),
        }
    }

    fn dispatch(&self, query: &QueryId, executor: &dyn QueryExecutor) -> Handled {
        let sql = query.sql();
        debug!(%sql, "Executing query");

        match executor.execute(&sql) {
            Ok(result) => {
                debug!(rows = result.row_count(), "Query finished");
                body_response(result_set::serialize(&result, self.format))
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, view = %query.view(), "Engine failure");
                Handled {
                    response: Response::empty(Status::InternalServerError),
                    fatal: Some(e),
                }
            }
            Err(e) => {
                warn!(error = %e, view = %query.view(), "Query failed");
                Handled::respond(Response::empty(Status::InternalServerError))
            }
        }
    }
}

fn body_response(body: serde_json::Result<Vec<u8>>) -> Handled {
    match body {
        Ok(body) => Handled::respond(Response::ok(body)),
        Err(e) => {
            error!(error = %e, "Failed to encode result set");
            Handled::respond(Response::empty(Status::InternalServerError))
        }
    }
}
