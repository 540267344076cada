//! Error taxonomy.
//!
//! Hot-path parsing errors are a hand-rolled enum rendered directly to wire
//! bytes at compile time (`as_http`), the same way the donor's `ErrorKind`
//! avoids pulling `thiserror`'s derive machinery into a per-request path.
//! Cold-path errors (builder/config/router-composition failures, raised at
//! most once per process) use `thiserror`, matching the ambient stack the
//! rest of this codebase's async core pulls in.

use crate::http::types::Version;
use std::{error, fmt, io};

/// Parser failure kinds, matching the contract 1:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Method,
    Version,
    MissingHost,
    MultipleHost,
    CLInvalid,
    CLConflict,
    CLTEConflict,
    TEInvalid,
    HeaderTooLarge,
    BodyTooLarge,
    CrlfInjection,
    Truncated,
    InvalidHeader,
    InvalidUrl,
    LengthRequired,
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        /// Renders this error as a complete, wire-ready response (status
        /// line, `Connection: close`, and a structured JSON or empty body).
        pub const fn as_http(&self, version: Version, json: bool) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }
    };
}

impl ParseError {
    http_errors! {
        Method: "400 Bad Request", "55" => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;
        Version: "400 Bad Request", "57" => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        MissingHost: "400 Bad Request", "50" => r#"{"error":"Missing Host header","code":"MISSING_HOST"}"#;
        MultipleHost: "400 Bad Request", "52" => r#"{"error":"Multiple Host headers","code":"MULTIPLE_HOST"}"#;
        CLInvalid: "400 Bad Request", "66" => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        CLConflict: "400 Bad Request", "70" => r#"{"error":"Conflicting Content-Length values","code":"CL_CONFLICT"}"#;
        CLTEConflict: "400 Bad Request", "73" => r#"{"error":"Content-Length and Transfer-Encoding both present","code":"CL_TE_CONFLICT"}"#;
        TEInvalid: "400 Bad Request", "63" => r#"{"error":"Invalid Transfer-Encoding","code":"TE_INVALID"}"#;
        HeaderTooLarge: "431 Request Header Fields Too Large", "54" => r#"{"error":"Headers too large","code":"HEADER_TOO_LARGE"}"#;
        BodyTooLarge: "413 Payload Too Large", "58" => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        CrlfInjection: "400 Bad Request", "56" => r#"{"error":"CRLF injection detected","code":"CRLF_INJECTION"}"#;
        Truncated: "400 Bad Request", "54" => r#"{"error":"Request was truncated","code":"TRUNCATED"}"#;
        InvalidHeader: "400 Bad Request", "57" => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        InvalidUrl: "400 Bad Request", "51" => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        LengthRequired: "411 Length Required", "65" => r#"{"error":"Chunked request bodies are not accepted","code":"LENGTH_REQUIRED"}"#;
    }
}

impl error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An error that aborts the connection outright: I/O failure, timeout, or a
/// parse failure. Distinct from [`ParseError`] in that it already knows
/// whether a response can still be written (I/O errors cannot).
#[derive(Debug)]
pub enum ConnectionError {
    Parse(ParseError),
    Io(io::Error),
    Timeout,
}

impl From<ParseError> for ConnectionError {
    fn from(err: ParseError) -> Self {
        ConnectionError::Parse(err)
    }
}
impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(err)
    }
}

/// Cold-path, setup/composition-time errors. Never appears on the
/// request-serving hot path.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("route composition contains a cycle at prefix `{prefix}`")]
    RouterCycle { prefix: String },

    #[error("conflicting route registration for {method} {path}")]
    RouteConflict { method: String, path: String },
}
