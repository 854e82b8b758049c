//! Outbound request construction (client role). Generalizes the teacher's
//! `Request`/`Method` (`request.rs`) from a `Url`-addressed, TLS-dialing
//! request into a plain header-list builder handed to
//! [`crate::Connection::request`] — this crate never owns a URL or a
//! socket, so `:scheme`/`:authority` are supplied by the caller instead of
//! parsed out of one.

use bytes::Bytes;

use crate::types::HeaderList;

/// An HTTP request method. `Other` covers anything beyond the common set,
/// matching the teacher's open-ended `Method::Other(String)`.
#[derive(Debug, Clone, derive_more::Display)]
pub enum Method {
    #[display(fmt = "GET")]
    Get,
    #[display(fmt = "POST")]
    Post,
    #[display(fmt = "PUT")]
    Put,
    #[display(fmt = "DELETE")]
    Delete,
    #[display(fmt = "HEAD")]
    Head,
    #[display(fmt = "PATCH")]
    Patch,
    #[display(fmt = "OPTIONS")]
    Options,
    #[display(fmt = "{}", _0)]
    Other(String),
}

/// A request ready to send: pseudo-headers plus any additional fields,
/// and an optional body. `Connection::request` prepends nothing further —
/// callers are expected to supply `:scheme`/`:authority` themselves since
/// this crate has no URL type and no transport to infer them from.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderList, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>, headers: HeaderList) -> Self {
        Self::new(Method::Get, path, headers, Bytes::new())
    }

    #[must_use]
    pub fn post(path: impl Into<String>, headers: HeaderList, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Post, path, headers, body)
    }

    /// Renders the full outbound header list: `:method` and `:path`
    /// pseudo-headers first, then whatever the caller supplied (which
    /// should include `:scheme`/`:authority` for a well-formed request).
    pub(crate) fn into_header_list(self) -> (HeaderList, Bytes) {
        let mut full = vec![
            (":method".to_owned(), self.method.to_string()),
            (":path".to_owned(), self.path),
        ];
        full.extend(self.headers);
        (full, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_has_no_body() {
        let r = Request::get("/", Vec::new());
        assert!(r.body.is_empty());
        let (headers, body) = r.into_header_list();
        assert_eq!(headers[0], (":method".to_owned(), "GET".to_owned()));
        assert_eq!(headers[1], (":path".to_owned(), "/".to_owned()));
        assert!(body.is_empty());
    }

    #[test]
    fn other_method_displays_verbatim() {
        let m = Method::Other("TRACE".to_owned());
        assert_eq!(m.to_string(), "TRACE");
    }
}
