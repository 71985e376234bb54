// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Synthetic response builder.
//!
//! Every local rejection or timeout the engine produces is materialized as a
//! real `Response` and pushed through the same paths as a wire response, so
//! state machines and timers are cleaned up uniformly.

use bytes::Bytes;
use smol_str::SmolStr;

use crate::{
    headers::Headers,
    msg::{header_tag, Request, Response, StatusLine},
    via,
};

/// Local rejection reasons surfaced by the proxy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reject {
    TemporarilyUnavailable,
    TooManyHops,
    InvalidRequest,
    BadExtension(Vec<SmolStr>),
    LoopDetected,
    ExtensionRequired(SmolStr),
    Forbidden,
    FlowFailed,
    RequestPending,
    UnknownDialog,
    NetworkError,
    ServiceUnavailable,
    Timeout(SmolStr),
    InternalError,
    /// Escape hatch for replies that carry a specific status line.
    Status(u16, SmolStr),
}

impl Reject {
    /// Status code and reason phrase for this rejection.
    pub fn status(&self) -> (u16, SmolStr) {
        match self {
            Reject::TemporarilyUnavailable => (480, SmolStr::new("Temporarily Unavailable")),
            Reject::TooManyHops => (483, SmolStr::new("Too Many Hops")),
            Reject::InvalidRequest => (400, SmolStr::new("Invalid Request")),
            Reject::BadExtension(_) => (420, SmolStr::new("Bad Extension")),
            Reject::LoopDetected => (482, SmolStr::new("Loop Detected")),
            Reject::ExtensionRequired(_) => (421, SmolStr::new("Extension Required")),
            Reject::Forbidden => (403, SmolStr::new("Forbidden")),
            Reject::FlowFailed => (430, SmolStr::new("Flow Failed")),
            Reject::RequestPending => (491, SmolStr::new("Request Pending")),
            Reject::UnknownDialog => (481, SmolStr::new("Call/Transaction Does Not Exist")),
            Reject::NetworkError => (503, SmolStr::new("Network Error")),
            Reject::ServiceUnavailable => (503, SmolStr::new("Service Unavailable")),
            Reject::Timeout(reason) => (408, reason.clone()),
            Reject::InternalError => (500, SmolStr::new("Internal Error")),
            Reject::Status(code, reason) => (*code, reason.clone()),
        }
    }

    /// Headers this rejection carries beyond the mirrored ones.
    fn extra_headers(&self) -> Vec<(SmolStr, SmolStr)> {
        match self {
            Reject::BadExtension(tokens) => {
                let list = tokens
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![(SmolStr::new("Unsupported"), SmolStr::new(list))]
            }
            Reject::ExtensionRequired(token) => {
                vec![(SmolStr::new("Require"), token.clone())]
            }
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for Reject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (code, reason) = self.status();
        write!(f, "{} {}", code, reason)
    }
}

impl std::error::Error for Reject {}

/// Builds the synthetic response for `reject`, mirroring the identification
/// headers of `req` the way a UAS would.
pub fn reply(req: &Request, reject: Reject) -> Response {
    let (code, reason) = reject.status();
    let extra = reject.extra_headers();
    reply_with(req, code, reason, extra)
}

/// Builds a synthetic response with an explicit status line and headers.
pub fn reply_with(
    req: &Request,
    code: u16,
    reason: SmolStr,
    extra_headers: Vec<(SmolStr, SmolStr)>,
) -> Response {
    let mut headers = Headers::new();
    for via in req.headers.get_all("Via") {
        headers.push("Via", via.clone());
    }
    if let Some(from) = req.headers.get("From") {
        headers.push("From", from.clone());
    }
    if let Some(to) = req.headers.get("To") {
        let mut to = to.clone();
        if code > 100 && header_tag(&to).is_none() {
            to = SmolStr::new(format!("{};tag={}", to, via::new_tag()));
        }
        headers.push("To", to);
    }
    if let Some(call_id) = req.headers.get("Call-ID") {
        headers.push("Call-ID", call_id.clone());
    }
    if let Some(cseq) = req.headers.get("CSeq") {
        headers.push("CSeq", cseq.clone());
    }
    for (name, value) in extra_headers {
        headers.push(name, value);
    }

    let mut resp = Response::new(StatusLine::new(code, reason), headers, Bytes::new());
    resp.synthetic = true;
    resp
}
