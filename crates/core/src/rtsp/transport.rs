/// Parsed client-side transport info from the RTSP `Transport` header.
///
/// Extracts the `client_port=RTP-RTCP` pair from the header value. Only
/// `RTP/AVP;unicast` over UDP is supported; see
/// [`is_interleaved`](Self::is_interleaved).
#[derive(Debug, Clone)]
pub struct TransportHeader {
    /// Client's requested RTP port.
    pub client_rtp_port: u16,
    /// Client's requested RTCP port.
    pub client_rtcp_port: u16,
}

impl TransportHeader {
    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// Looks for `client_port=RTP-RTCP` among semicolon-separated parameters.
    /// A lone port means RTCP on the next port up.
    ///
    /// ## Examples
    ///
    /// ```
    /// use skycam::rtsp::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_rtp_port, 8000);
    /// assert_eq!(th.client_rtcp_port, 8001);
    ///
    /// let single = TransportHeader::parse("RTP/AVP;unicast;client_port=9000").unwrap();
    /// assert_eq!(single.client_rtcp_port, 9001);
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                let port_parts: Vec<&str> = ports.split('-').collect();

                let (rtp_port, rtcp_port) = match port_parts.as_slice() {
                    [rtp] => {
                        let rtp: u16 = rtp.trim().parse().ok()?;
                        (rtp, rtp.checked_add(1)?)
                    }
                    [rtp, rtcp] => (rtp.trim().parse().ok()?, rtcp.trim().parse().ok()?),
                    _ => return None,
                };
                if rtp_port == 0 {
                    return None;
                }

                return Some(TransportHeader {
                    client_rtp_port: rtp_port,
                    client_rtcp_port: rtcp_port,
                });
            }
        }
        None
    }

    /// Whether the client asked for RTP interleaved on the RTSP TCP
    /// connection (RFC 2326 §10.12), which this server does not offer.
    pub fn is_interleaved(header: &str) -> bool {
        header.contains("RTP/AVP/TCP") || header.contains("interleaved=")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_transport() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(th.client_rtp_port, 5000);
        assert_eq!(th.client_rtcp_port, 5001);
    }

    #[test]
    fn parse_no_client_port() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    }

    #[test]
    fn parse_rejects_garbage_ports() {
        assert!(TransportHeader::parse("RTP/AVP;client_port=abc-def").is_none());
        assert!(TransportHeader::parse("RTP/AVP;client_port=1-2-3").is_none());
        assert!(TransportHeader::parse("RTP/AVP;client_port=0-1").is_none());
        assert!(TransportHeader::parse("RTP/AVP;client_port=65535").is_none());
    }

    #[test]
    fn interleaved_detection() {
        assert!(TransportHeader::is_interleaved(
            "RTP/AVP/TCP;unicast;interleaved=0-1"
        ));
        assert!(!TransportHeader::is_interleaved(
            "RTP/AVP;unicast;client_port=5000-5001"
        ));
    }
}
