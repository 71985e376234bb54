// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use prism_core::{via, Method, Request, Response};
use smol_str::SmolStr;

/// Key matching an inbound response to the client transaction that produced
/// the request: application, Call-ID, method, and the branch of the Via this
/// node put on top.
///
/// CANCEL shares its branch with the INVITE it cancels; the method component
/// keeps the two transactions distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransKey {
    pub app: SmolStr,
    pub call_id: SmolStr,
    pub method: Method,
    pub branch: SmolStr,
}

impl TransKey {
    /// Derives the key of an outgoing request. The request must already
    /// carry this node's Via on top.
    pub fn from_request(app: &SmolStr, req: &Request) -> Option<Self> {
        Some(Self {
            app: app.clone(),
            call_id: req.call_id()?.clone(),
            method: req.start.method.clone(),
            branch: via::top_branch(&req.headers)?,
        })
    }

    /// Derives the key an inbound response matches against. The method comes
    /// from CSeq because status lines carry none.
    pub fn from_response(app: &SmolStr, resp: &Response) -> Option<Self> {
        let (_, method) = resp.cseq()?;
        Some(Self {
            app: app.clone(),
            call_id: resp.call_id()?.clone(),
            method,
            branch: via::top_branch(&resp.headers)?,
        })
    }
}
