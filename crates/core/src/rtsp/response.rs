use std::fmt::Write as _;

/// Server identification sent in every response (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = "skycam/0.1";

/// Status codes the control connection answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    InternalError,
    /// 454: `Session` header names another session.
    SessionNotFound,
    /// 455: SETUP outside Init, PLAY outside Ready.
    MethodNotValid,
    /// 461: interleaved TCP requested.
    UnsupportedTransport,
    NotImplemented,
    /// 503: every client slot is taken.
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::InternalError => 500,
            Self::SessionNotFound => 454,
            Self::MethodNotValid => 455,
            Self::UnsupportedTransport => 461,
            Self::NotImplemented => 501,
            Self::ServiceUnavailable => 503,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::InternalError => "Internal Server Error",
            Self::SessionNotFound => "Session Not Found",
            Self::MethodNotValid => "Method Not Valid in This State",
            Self::UnsupportedTransport => "Unsupported Transport",
            Self::NotImplemented => "Not Implemented",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// A control response. `CSeq` is part of every response, so it is taken
/// up front; the remaining headers keep insertion order.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status: Status,
    cseq: String,
    headers: Vec<(&'static str, String)>,
    body: Option<String>,
}

impl RtspResponse {
    pub fn new(status: Status, cseq: &str) -> Self {
        Self {
            status,
            cseq: cseq.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn ok(cseq: &str) -> Self {
        Self::new(Status::Ok, cseq)
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Attach an SDP description as the body.
    pub fn sdp(self, body: String) -> Self {
        let mut response = self.header("Content-Type", "application/sdp");
        response.body = Some(body);
        response
    }

    pub fn status_code(&self) -> u16 {
        self.status.code()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("CSeq") {
            return Some(&self.cseq);
        }
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Wire form. `Content-Length` is added when there is a body.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(128 + self.body.as_ref().map_or(0, String::len));
        let _ = write!(
            out,
            "RTSP/1.0 {} {}\r\nCSeq: {}\r\nServer: {}\r\n",
            self.status.code(),
            self.status.reason(),
            self.cseq,
            SERVER_AGENT
        );
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        match &self.body {
            Some(body) => {
                let _ = write!(out, "Content-Length: {}\r\n\r\n{body}", body.len());
            }
            None => out.push_str("\r\n"),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_reply() {
        let s = RtspResponse::ok("1")
            .header("Public", "OPTIONS, DESCRIBE")
            .serialize();
        assert_eq!(
            s,
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nServer: skycam/0.1\r\nPublic: OPTIONS, DESCRIBE\r\n\r\n"
        );
    }

    #[test]
    fn sdp_body_sets_length_and_type() {
        let resp = RtspResponse::ok("2").sdp("v=0\r\n".to_string());
        assert_eq!(resp.get("content-type"), Some("application/sdp"));
        let s = resp.serialize();
        assert!(s.contains("Content-Length: 5\r\n\r\nv=0\r\n"));
        assert!(s.ends_with("v=0\r\n"));
    }

    #[test]
    fn status_lines() {
        let cases = [
            (Status::SessionNotFound, "RTSP/1.0 454 Session Not Found\r\n"),
            (Status::MethodNotValid, "RTSP/1.0 455 Method Not Valid in This State\r\n"),
            (Status::UnsupportedTransport, "RTSP/1.0 461 Unsupported Transport\r\n"),
            (Status::NotImplemented, "RTSP/1.0 501 Not Implemented\r\n"),
            (Status::ServiceUnavailable, "RTSP/1.0 503 Service Unavailable\r\n"),
        ];
        for (status, line) in cases {
            let s = RtspResponse::new(status, "9").serialize();
            assert!(s.starts_with(line), "{s:?}");
            assert!(s.contains("CSeq: 9\r\n"));
        }
    }

    #[test]
    fn cseq_lookup() {
        let resp = RtspResponse::new(Status::BadRequest, "0");
        assert_eq!(resp.get("CSeq"), Some("0"));
        assert_eq!(resp.status_code(), 400);
        assert!(resp.body().is_none());
    }
}
