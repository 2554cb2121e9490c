use std::fmt;

use crate::error::{ParseErrorKind, Result, SkycamError};

/// Request methods the session state machine dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
    GetParameter,
    /// Anything else; answered with 501.
    Other(String),
}

impl Method {
    fn from_token(token: &str) -> Self {
        match token {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "SETUP" => Self::Setup,
            "PLAY" => Self::Play,
            "TEARDOWN" => Self::Teardown,
            "GET_PARAMETER" => Self::GetParameter,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One control request: `Method SP URI SP Version CRLF`, header lines,
/// a blank line and an optional `Content-Length` body.
///
/// The connection reads the head itself and hands it to
/// [`parse`](Self::parse); a body announced by `Content-Length` is read
/// afterwards and attached with [`with_body`](Self::with_body).
#[derive(Debug)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub version: String,
    headers: Vec<(String, String)>,
    pub body: Option<String>,
}

fn parse_error(kind: ParseErrorKind) -> SkycamError {
    SkycamError::Parse { kind }
}

impl RtspRequest {
    /// Parse a request head. Text after the first blank line, if any, is
    /// kept as the body.
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = raw
            .split_once("\r\n\r\n")
            .or_else(|| raw.split_once("\n\n"))
            .unwrap_or((raw, ""));
        let mut lines = head.lines().skip_while(|l| l.trim().is_empty());

        let request_line = lines
            .next()
            .ok_or_else(|| parse_error(ParseErrorKind::EmptyRequest))?;
        let mut tokens = request_line.split_whitespace();
        let (Some(method), Some(uri), Some(version), None) =
            (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(parse_error(ParseErrorKind::InvalidRequestLine));
        };

        let headers = lines
            .take_while(|l| !l.is_empty())
            .map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .ok_or_else(|| parse_error(ParseErrorKind::InvalidHeader))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            method: Method::from_token(method),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
            body: (!body.is_empty()).then(|| body.to_string()),
        })
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Case-insensitive header lookup (RFC 2326 §4.2).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Echoed in the response; `"0"` when the client sent none.
    pub fn cseq(&self) -> &str {
        self.header("CSeq").unwrap_or("0")
    }

    pub fn transport(&self) -> Option<&str> {
        self.header("Transport")
    }

    /// Declared body length; 0 when absent or unparsable.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// `Session` header without parameters: `1A2B;timeout=60` -> `1A2B`.
    pub fn session_id(&self) -> Option<&str> {
        self.header("Session")
            .and_then(|s| s.split(';').next())
            .map(str::trim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_setup() {
        let raw = "SETUP rtsp://cam:8554/stream/track1 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Setup);
        assert_eq!(req.uri, "rtsp://cam:8554/stream/track1");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), "3");
        assert_eq!(req.transport(), Some("RTP/AVP;unicast;client_port=8000-8001"));
        assert!(req.body.is_none());
    }

    #[test]
    fn unknown_method_is_kept() {
        let req = RtspRequest::parse("RECORD rtsp://cam/stream RTSP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Other("RECORD".to_string()));
        assert_eq!(req.method.to_string(), "RECORD");
        assert_eq!(req.cseq(), "0");
    }

    #[test]
    fn malformed_requests() {
        assert!(matches!(
            RtspRequest::parse(""),
            Err(SkycamError::Parse {
                kind: ParseErrorKind::EmptyRequest
            })
        ));
        assert!(matches!(
            RtspRequest::parse("OPTIONS\r\n\r\n"),
            Err(SkycamError::Parse {
                kind: ParseErrorKind::InvalidRequestLine
            })
        ));
        assert!(matches!(
            RtspRequest::parse("OPTIONS * RTSP/1.0\r\nno colon\r\n\r\n"),
            Err(SkycamError::Parse {
                kind: ParseErrorKind::InvalidHeader
            })
        ));
    }

    #[test]
    fn header_names_ignore_case() {
        let req = RtspRequest::parse("OPTIONS * RTSP/1.0\r\ncseq: 42\r\n\r\n").unwrap();
        assert_eq!(req.header("CSEQ"), Some("42"));
        assert_eq!(req.cseq(), "42");
    }

    #[test]
    fn body_after_blank_line() {
        let raw = "GET_PARAMETER rtsp://cam/stream RTSP/1.0\r\n\
                   CSeq: 7\r\n\
                   Content-Length: 12\r\n\r\n\
                   barparam: 1\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::GetParameter);
        assert_eq!(req.content_length(), 12);
        assert_eq!(req.body.as_deref(), Some("barparam: 1\n"));
    }

    #[test]
    fn session_id_drops_parameters() {
        let raw = "PLAY rtsp://cam/stream RTSP/1.0\r\nSession: 1A2B;timeout=60\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.session_id(), Some("1A2B"));
        assert_eq!(req.content_length(), 0);
    }

    #[test]
    fn bare_newlines_accepted() {
        let req = RtspRequest::parse("\r\nOPTIONS * RTSP/1.0\nCSeq: 2\n\n").unwrap();
        assert_eq!(req.method, Method::Options);
        assert_eq!(req.cseq(), "2");
    }
}
