// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stateless fast path: relay and forget. Failures are logged, never
//! retried; there is no transaction to clean up.

use prism_core::{via, Request, Response, SipUri};
use tracing::{debug, warn};

use crate::traits::{FlowHandle, Transport};

/// Relays a request to `target` without keeping state.
pub fn relay_request(
    transport: &dyn Transport,
    req: &Request,
    target: &SipUri,
    flow: Option<&FlowHandle>,
) {
    if let Err(err) = transport.send_request(req, target, flow) {
        warn!(uri = %target, error = %err, "stateless relay failed");
    }
}

/// Relays a response for a stateless-proxied request: strip this node's Via
/// and forward along the rest of the path.
pub fn relay_response(transport: &dyn Transport, resp: &Response) {
    if resp.code() < 101 {
        debug!(code = resp.code(), "dropping sub-101 stateless response");
        return;
    }
    let mut resp = resp.clone();
    via::pop_via(&mut resp.headers);
    if via::via_count(&resp.headers) == 0 {
        debug!("stateless response has nowhere left to go");
        return;
    }
    if let Err(err) = transport.send_response(&resp) {
        warn!(code = resp.code(), error = %err, "stateless response relay failed");
    }
}
