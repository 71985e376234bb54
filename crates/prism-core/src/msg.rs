// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use smol_str::SmolStr;

use crate::{headers::Headers, method::Method, uri::SipUri, via};

/// First line of a SIP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub uri: SipUri,
}

impl RequestLine {
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self { method, uri }
    }
}

/// First line of a SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub reason: SmolStr,
}

impl StatusLine {
    pub fn new(code: u16, reason: impl Into<SmolStr>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// A parsed SIP request.
///
/// `id` is an engine-unique message identifier minted at construction;
/// `source` is the opaque handle of the connection the request arrived on,
/// when the transport knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: SmolStr,
    pub start: RequestLine,
    pub headers: Headers,
    pub body: Bytes,
    pub source: Option<SmolStr>,
}

impl Request {
    pub fn new(start: RequestLine, headers: Headers, body: Bytes) -> Self {
        Self {
            id: via::new_msg_id(),
            start,
            headers,
            body,
            source: None,
        }
    }

    /// Re-mints the message id. Used when a stored request is cloned into a
    /// new downstream branch.
    pub fn refresh_id(&mut self) {
        self.id = via::new_msg_id();
    }

    pub fn call_id(&self) -> Option<&SmolStr> {
        self.headers.get("Call-ID")
    }

    /// CSeq number and method.
    pub fn cseq(&self) -> Option<(u32, Method)> {
        parse_cseq(self.headers.get("CSeq")?)
    }

    pub fn set_cseq(&mut self, num: u32, method: &Method) {
        self.headers
            .set("CSeq", format!("{} {}", num, method.as_str()));
    }

    /// Max-Forwards as a signed value; malformed values read as `None`.
    pub fn max_forwards(&self) -> Option<i64> {
        self.headers.get("Max-Forwards")?.trim().parse().ok()
    }

    pub fn set_max_forwards(&mut self, value: i64) {
        self.headers.set("Max-Forwards", value.to_string());
    }

    pub fn from_tag(&self) -> Option<SmolStr> {
        header_tag(self.headers.get("From")?)
    }

    pub fn to_tag(&self) -> Option<SmolStr> {
        header_tag(self.headers.get("To")?)
    }

    /// Expires header in seconds.
    pub fn expires(&self) -> Option<u64> {
        self.headers.get("Expires")?.trim().parse().ok()
    }
}

/// A parsed SIP response.
///
/// `synthetic` marks responses the engine materialized locally (timeouts,
/// transport failures, rejections) as opposed to ones received off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: SmolStr,
    pub start: StatusLine,
    pub headers: Headers,
    pub body: Bytes,
    pub synthetic: bool,
}

impl Response {
    pub fn new(start: StatusLine, headers: Headers, body: Bytes) -> Self {
        Self {
            id: via::new_msg_id(),
            start,
            headers,
            body,
            synthetic: false,
        }
    }

    pub fn code(&self) -> u16 {
        self.start.code
    }

    pub fn call_id(&self) -> Option<&SmolStr> {
        self.headers.get("Call-ID")
    }

    pub fn cseq(&self) -> Option<(u32, Method)> {
        parse_cseq(self.headers.get("CSeq")?)
    }

    pub fn from_tag(&self) -> Option<SmolStr> {
        header_tag(self.headers.get("From")?)
    }

    pub fn to_tag(&self) -> Option<SmolStr> {
        header_tag(self.headers.get("To")?)
    }

    /// Contact header URIs in order.
    pub fn contacts(&self) -> Vec<SipUri> {
        self.headers
            .get_all("Contact")
            .flat_map(|v| crate::uri::parse_uri_list(v))
            .collect()
    }
}

/// Extracts the `tag` parameter from a From/To header value. The parameter
/// lives outside any angle brackets.
pub fn header_tag(value: &str) -> Option<SmolStr> {
    let after = match value.rfind('>') {
        Some(pos) => &value[pos + 1..],
        None => value,
    };
    after.split(';').skip(1).find_map(|seg| {
        let (k, v) = seg.split_once('=')?;
        if k.trim().eq_ignore_ascii_case("tag") {
            Some(SmolStr::new(v.trim().to_owned()))
        } else {
            None
        }
    })
}

fn parse_cseq(value: &str) -> Option<(u32, Method)> {
    let mut parts = value.split_whitespace();
    let num = parts.next()?.parse().ok()?;
    let method = Method::from_token(parts.next()?);
    Some((num, method))
}
