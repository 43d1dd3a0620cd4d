//! Request-line parsing.
//!
//! Only the first line of the request is looked at. Tokens are returned as
//! slices of the caller's buffer; the buffer itself is never written to.

use thiserror::Error;

/// Reasons a request line could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty request")]
    Empty,
    #[error("request line does not fit in {capacity} bytes")]
    LineTooLong { capacity: usize },
    #[error("request line is not valid UTF-8")]
    InvalidEncoding,
    #[error("missing request method")]
    MissingMethod,
    #[error("missing request target")]
    MissingTarget,
}

/// Method and target of a single request, borrowed from the read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub raw_bytes_consumed: usize,
}

/// Parse the request line out of `buf`.
///
/// `capacity` is the size of the buffer the bytes were read into. A request
/// without a line terminator that filled the whole buffer was cut short by
/// the read, so it is rejected instead of being parsed from a partial line.
pub fn parse(buf: &[u8], capacity: usize) -> Result<Request<'_>, ParseError> {
    if buf.is_empty() {
        return Err(ParseError::Empty);
    }
    if buf.len() > capacity {
        return Err(ParseError::LineTooLong { capacity });
    }

    let line = match buf.iter().position(|b| *b == b'\r' || *b == b'\n') {
        Some(end) => &buf[..end],
        None if buf.len() == capacity => return Err(ParseError::LineTooLong { capacity }),
        None => buf,
    };
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidEncoding)?;

    let (method, rest) = match line.split_once(' ') {
        Some(parts) => parts,
        None if line.is_empty() => return Err(ParseError::MissingMethod),
        None => return Err(ParseError::MissingTarget),
    };
    if method.is_empty() {
        return Err(ParseError::MissingMethod);
    }

    // Anything after the target (the protocol version) is ignored.
    let target = rest.split(' ').next().unwrap_or_default();
    if target.is_empty() {
        return Err(ParseError::MissingTarget);
    }

    Ok(Request {
        method,
        target,
        raw_bytes_consumed: buf.len(),
    })
}
