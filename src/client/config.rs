//! Client configuration and RTMP URL parsing

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::RTMP_PORT;

/// Client-side timeouts, in milliseconds; zero means no timeout
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientTimeouts {
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// From starting the connection to receiving the publish/play result
    pub do_timeout_ms: u64,
    /// Per-message read timeout once streaming A/V
    pub read_av_timeout_ms: u64,
    /// Per-write timeout once streaming A/V
    pub write_av_timeout_ms: u64,
}

/// Components of an `rtmp://host[:port]/appName/streamName[?query]` URL
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUrl {
    pub host: String,
    pub port: u16,
    pub app_name: String,
    pub stream_name: String,
    /// Stream name with the raw query appended; some servers carry
    /// authentication in the query, so play/publish send it verbatim
    pub stream_name_with_raw_query: String,
    /// The raw URL up to (excluding) the final path segment
    pub tc_url: String,
}

/// Parse an RTMP URL of shape `rtmp://host[:port]/appName/streamName[?query]`
pub fn parse_rtmp_url(raw_url: &str) -> Result<ParsedUrl> {
    let invalid = || ProtocolError::InvalidUrl(raw_url.to_string());

    let rest = raw_url.strip_prefix("rtmp://").ok_or_else(invalid)?;
    let (host_port, path_query) = rest.split_once('/').ok_or_else(invalid)?;
    if host_port.is_empty() {
        return Err(invalid().into());
    }

    let (host, port) = match host_port.split_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse::<u16>().map_err(|_| invalid())?,
        ),
        None => (host_port.to_string(), RTMP_PORT),
    };

    let (path, raw_query) = match path_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_query, None),
    };

    let (app_name, stream_name) = path.split_once('/').ok_or_else(invalid)?;
    if app_name.is_empty() || stream_name.is_empty() || stream_name.contains('/') {
        return Err(invalid().into());
    }

    let stream_name_with_raw_query = match raw_query {
        Some(q) => format!("{}?{}", stream_name, q),
        None => stream_name.to_string(),
    };

    let tc_url = match raw_url.rfind('/') {
        Some(i) => raw_url[..i].to_string(),
        None => return Err(invalid().into()),
    };

    Ok(ParsedUrl {
        host,
        port,
        app_name: app_name.to_string(),
        stream_name: stream_name.to_string(),
        stream_name_with_raw_query,
        tc_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_parsing() {
        let u = parse_rtmp_url("rtmp://localhost/live/test").unwrap();
        assert_eq!(u.host, "localhost");
        assert_eq!(u.port, 1935);
        assert_eq!(u.app_name, "live");
        assert_eq!(u.stream_name, "test");
        assert_eq!(u.stream_name_with_raw_query, "test");
        assert_eq!(u.tc_url, "rtmp://localhost/live");

        let u = parse_rtmp_url("rtmp://example.com:1936/app/key").unwrap();
        assert_eq!(u.port, 1936);
        assert_eq!(u.app_name, "app");
    }

    #[test]
    fn test_url_with_query() {
        let u = parse_rtmp_url("rtmp://h/live/test?token=abc").unwrap();
        assert_eq!(u.stream_name, "test");
        assert_eq!(u.stream_name_with_raw_query, "test?token=abc");
        assert_eq!(u.tc_url, "rtmp://h/live");
    }

    #[test]
    fn test_invalid_urls() {
        for bad in [
            "http://h/live/test",
            "rtmp://",
            "rtmp://host",
            "rtmp://host/apponly",
            "rtmp://host/a/b/c",
            "rtmp:///live/test",
        ] {
            assert!(parse_rtmp_url(bad).is_err(), "{} should fail", bad);
        }
    }
}
