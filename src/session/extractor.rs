//! Session id extraction from messages.
//!
//! Absence of a session id is a normal outcome, never an error. That includes
//! a body that is not well-formed XML.

use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::config::SessionIdConfig;
use crate::interceptor::exchange::Message;

/// Cookie name used by servlet containers.
pub const JSESSIONID: &str = "JSESSIONID";

/// Where to look for a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExtractor {
    /// A named cookie: `Cookie` on requests, `Set-Cookie` on responses.
    /// Requests may also carry it as a `;name=value` path parameter.
    Cookie { name: String },
    /// A header with the same name on requests and responses.
    Header { name: String },
    /// Text content of the first matching element of an XML body.
    /// Only messages whose body the transport buffered can carry it.
    XmlElement {
        local_name: String,
        namespace: Option<String>,
    },
}

impl SessionExtractor {
    pub fn cookie(name: impl Into<String>) -> Self {
        Self::Cookie { name: name.into() }
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::Header {
            name: name.into().to_ascii_lowercase(),
        }
    }

    pub fn xml_element(local_name: impl Into<String>, namespace: Option<String>) -> Self {
        Self::XmlElement {
            local_name: local_name.into(),
            namespace,
        }
    }

    pub fn extract(&self, msg: &dyn Message) -> Option<String> {
        match self {
            Self::Cookie { name } if msg.is_response() => set_cookie_value(msg, name),
            Self::Cookie { name } => {
                cookie_value(msg, name).or_else(|| path_parameter(msg, name))
            }
            Self::Header { name } => msg
                .headers()
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            Self::XmlElement {
                local_name,
                namespace,
            } => xml_element_text(msg.body()?, local_name, namespace.as_deref()),
        }
    }
}

impl From<&SessionIdConfig> for SessionExtractor {
    fn from(config: &SessionIdConfig) -> Self {
        match config {
            SessionIdConfig::Cookie { name } => Self::cookie(name.clone()),
            SessionIdConfig::Header { name } => Self::header(name.clone()),
            SessionIdConfig::XmlElement {
                local_name,
                namespace,
            } => Self::xml_element(local_name.clone(), namespace.clone()),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim().trim_matches('"');
    (!value.is_empty()).then(|| value.to_string())
}

fn cookie_value(msg: &dyn Message, name: &str) -> Option<String> {
    msg.headers()
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .and_then(|(_, v)| non_empty(v))
}

fn set_cookie_value(msg: &dyn Message, name: &str) -> Option<String> {
    msg.headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .and_then(|(_, v)| non_empty(v))
}

fn path_parameter(msg: &dyn Message, name: &str) -> Option<String> {
    let path = msg.uri()?.path();
    path.split(';').skip(1).find_map(|param| {
        let (k, v) = param.split_once('=')?;
        if !k.eq_ignore_ascii_case(name) {
            return None;
        }
        let end = v.find('/').unwrap_or(v.len());
        non_empty(&v[..end])
    })
}

fn xml_element_text(body: &[u8], local_name: &str, namespace: Option<&str>) -> Option<String> {
    let mut reader = NsReader::from_reader(body);
    // Open elements inside the marker, once it has been found.
    let mut depth = 0usize;
    let mut text = String::new();

    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(e))) => {
                if depth > 0 {
                    depth += 1;
                } else if e.local_name().as_ref() == local_name.as_bytes() && namespace_matches(&ns, namespace) {
                    depth = 1;
                }
            }
            Ok((_, Event::Text(t))) if depth > 0 => text.push_str(&t.unescape().ok()?),
            Ok((_, Event::CData(c))) if depth > 0 => text.push_str(std::str::from_utf8(&c).ok()?),
            Ok((_, Event::End(_))) if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return non_empty(&text);
                }
            }
            Ok((_, Event::Eof)) | Err(_) => return None,
            _ => {}
        }
    }
}

fn namespace_matches(resolved: &ResolveResult, expected: Option<&str>) -> bool {
    match (expected, resolved) {
        (None, _) => true,
        (Some(expected), ResolveResult::Bound(Namespace(bound))) => *bound == expected.as_bytes(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::exchange::{RequestHead, ResponseHead};
    use axum::body::Bytes;
    use axum::http::{HeaderMap, HeaderValue, StatusCode};

    fn request(uri: &str, headers: &[(&'static str, &'static str)]) -> RequestHead {
        let mut req = RequestHead::get(uri);
        for (k, v) in headers {
            req.headers.append(*k, HeaderValue::from_static(v));
        }
        req
    }

    fn response(headers: &[(&'static str, &'static str)]) -> ResponseHead {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.append(*k, HeaderValue::from_static(v));
        }
        ResponseHead::new(StatusCode::OK, map)
    }

    #[test]
    fn test_cookie_from_request() {
        let ex = SessionExtractor::cookie(JSESSIONID);
        let req = request("/", &[("cookie", "theme=dark; JSESSIONID=abc123; lang=en")]);
        assert_eq!(ex.extract(&req).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_cookie_across_multiple_headers() {
        let ex = SessionExtractor::cookie("sid");
        let req = request("/", &[("cookie", "a=1"), ("cookie", "sid=\"q\"")]);
        assert_eq!(ex.extract(&req).as_deref(), Some("q"));
    }

    #[test]
    fn test_cookie_absent() {
        let ex = SessionExtractor::cookie(JSESSIONID);
        assert!(ex.extract(&request("/", &[])).is_none());
        assert!(ex.extract(&request("/", &[("cookie", "JSESSIONID=")])).is_none());
        assert!(ex.extract(&request("/", &[("cookie", "garbage")])).is_none());
    }

    #[test]
    fn test_cookie_from_path_parameter() {
        let ex = SessionExtractor::cookie(JSESSIONID);
        let req = request("/shop/cart;jsessionid=XYZ?item=1", &[]);
        assert_eq!(ex.extract(&req).as_deref(), Some("XYZ"));
    }

    #[test]
    fn test_set_cookie_from_response() {
        let ex = SessionExtractor::cookie(JSESSIONID);
        let res = response(&[
            ("set-cookie", "other=1; Path=/"),
            ("set-cookie", "JSESSIONID=srv-42; Path=/; HttpOnly"),
        ]);
        assert_eq!(ex.extract(&res).as_deref(), Some("srv-42"));
    }

    #[test]
    fn test_request_cookie_not_read_from_response() {
        let ex = SessionExtractor::cookie(JSESSIONID);
        let res = response(&[("cookie", "JSESSIONID=abc")]);
        assert!(ex.extract(&res).is_none());
    }

    #[test]
    fn test_header_both_directions() {
        let ex = SessionExtractor::header("X-Session-Id");
        let req = request("/", &[("x-session-id", " s-1 ")]);
        assert_eq!(ex.extract(&req).as_deref(), Some("s-1"));
        let res = response(&[("x-session-id", "s-2")]);
        assert_eq!(ex.extract(&res).as_deref(), Some("s-2"));
    }

    fn xml_request(body: &'static str) -> RequestHead {
        RequestHead::get("/orders").with_body(Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn test_xml_element_in_body() {
        let ex = SessionExtractor::xml_element("session", None);
        let req = xml_request(
            "<?xml version=\"1.0\"?><order><session> abc-1 </session><item>7</item></order>",
        );
        assert_eq!(ex.extract(&req).as_deref(), Some("abc-1"));
    }

    #[test]
    fn test_xml_element_namespace_must_match() {
        let body = r#"<env xmlns:a="urn:other" xmlns:s="urn:shop"><a:sid>wrong</a:sid><s:sid>right</s:sid></env>"#;
        let ex = SessionExtractor::xml_element("sid", Some("urn:shop".into()));
        assert_eq!(ex.extract(&xml_request(body)).as_deref(), Some("right"));

        let any = SessionExtractor::xml_element("sid", None);
        assert_eq!(any.extract(&xml_request(body)).as_deref(), Some("wrong"));
    }

    #[test]
    fn test_xml_element_text_spans_entities_and_cdata() {
        let ex = SessionExtractor::xml_element("sid", None);
        let req = xml_request("<r><sid>a&amp;b<![CDATA[-c]]></sid></r>");
        assert_eq!(ex.extract(&req).as_deref(), Some("a&b-c"));
    }

    #[test]
    fn test_xml_element_absent_or_unreadable() {
        let ex = SessionExtractor::xml_element("sid", None);
        assert!(ex.extract(&xml_request("<r><other>1</other></r>")).is_none());
        assert!(ex.extract(&xml_request("<r><sid></sid></r>")).is_none());
        assert!(ex.extract(&xml_request("<r><sid>1</other></r>")).is_none());
        assert!(ex.extract(&xml_request("not xml at all")).is_none());
        assert!(ex.extract(&RequestHead::get("/")).is_none());
        assert!(ex.extract(&response(&[])).is_none());
    }
}
