//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 <addr>                               ← connection address
//! t=0 0                                         ← timing (live stream)
//! a=tool:skycam                                 ← server software (§6)
//! a=sendonly                                    ← direction (§6)
//! m=video 0 RTP/AVP 26                          ← media description
//! a=rtpmap:26 JPEG/90000                        ← codec/clock rate
//! a=framerate:10                                ← nominal frame rate
//! a=control:track1                              ← track control URL
//! ```
//!
//! IPv6 hosts are announced as `IP6`.

use crate::media::jpeg::{CLOCK_RATE, JPEG_PAYLOAD_TYPE};

/// Origin and session fields for the DESCRIBE body.
#[derive(Debug, Clone)]
pub struct SdpParams<'a> {
    pub ip: &'a str,
    pub username: &'a str,
    pub session_id: &'a str,
    pub session_version: &'a str,
    pub session_name: &'a str,
    pub fps: u32,
}

/// Control URL suffix for the single video track.
pub const TRACK_CONTROL: &str = "track1";

/// Generate an SDP description of the single JPEG video track.
pub fn generate_sdp(params: &SdpParams<'_>) -> String {
    let addr_type = if params.ip.contains(':') { "IP6" } else { "IP4" };
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} {} IN {} {}",
        params.username, params.session_id, params.session_version, addr_type, params.ip
    ));
    sdp.push(format!("s={}", params.session_name));
    sdp.push(format!("c=IN {} {}", addr_type, params.ip));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:skycam".to_string());
    sdp.push("a=sendonly".to_string());
    sdp.push(format!("m=video 0 RTP/AVP {}", JPEG_PAYLOAD_TYPE));
    sdp.push(format!("a=rtpmap:{} JPEG/{}", JPEG_PAYLOAD_TYPE, CLOCK_RATE));
    sdp.push(format!("a=framerate:{}", params.fps));
    sdp.push(format!("a=control:{}", TRACK_CONTROL));

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_jpeg_sdp() {
        let sdp = generate_sdp(&SdpParams {
            ip: "192.168.4.1",
            username: "-",
            session_id: "1234567890",
            session_version: "1",
            session_name: "Camera",
            fps: 10,
        });
        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("o=- 1234567890 1 IN IP4 192.168.4.1\r\n"));
        assert!(sdp.contains("s=Camera\r\n"));
        assert!(
            sdp.contains("c=IN IP4 192.168.4.1\r\n"),
            "c= must use configured IP, not 0.0.0.0"
        );
        assert!(sdp.contains("a=sendonly\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 26\r\n"));
        assert!(sdp.contains("a=rtpmap:26 JPEG/90000\r\n"));
        assert!(sdp.contains("a=framerate:10\r\n"));
        assert!(sdp.contains("a=control:track1\r\n"));

        let m_idx = sdp.find("m=video").expect("SDP must include media section");
        let rtpmap_idx = sdp.find("a=rtpmap").expect("SDP must include rtpmap");
        let sendonly_idx = sdp.find("a=sendonly").expect("SDP must include sendonly");
        assert!(
            sendonly_idx < m_idx,
            "session-level attrs must precede m= line"
        );
        assert!(rtpmap_idx > m_idx, "media attributes must follow m=video");
        assert!(sdp.ends_with("\r\n"), "SDP must end with CRLF");
    }

    #[test]
    fn ipv6_host_uses_ip6() {
        let sdp = generate_sdp(&SdpParams {
            ip: "fe80::1",
            username: "-",
            session_id: "0",
            session_version: "0",
            session_name: "Camera",
            fps: 10,
        });
        assert!(sdp.contains("o=- 0 0 IN IP6 fe80::1\r\n"));
        assert!(sdp.contains("c=IN IP6 fe80::1\r\n"));
    }
}
