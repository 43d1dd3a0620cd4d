//! HTTP-shaped responses.

/// Statuses the bridge can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    InternalServerError,
    NotImplemented,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
            Status::NotImplemented => 501,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Server Error",
            Status::NotImplemented => "Not Implemented",
        }
    }
}

/// A complete response: status line plus body, no headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: Status,
    body: Vec<u8>,
}

impl Response {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            body,
        }
    }

    /// A response with no body.
    pub fn empty(status: Status) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Wire form: `HTTP/1.1 <code> <reason>\r\n\r\n<body>`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\n\r\n",
            self.status.code(),
            self.status.reason()
        );
        let mut bytes = Vec::with_capacity(head.len() + self.body.len());
        bytes.extend_from_slice(head.as_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
