// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Proxy router: request preprocessing and dispatch (RFC 3261 §16.3-§16.6).
//!
//! ```text
//! inbound request ── hop check ── session gate ── preprocess
//!        │                                            │
//!        │             Proxy-Require ── Path/outbound ─┤
//!        │                                            │
//!        └── reply(4xx/5xx)          stateless ───────┴─── fork
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use prism_core::{parse_uri_list, reply, reply_with, Method, Reject, Request, Response, SipUri};
use smol_str::SmolStr;
use tracing::{debug, info_span, warn};

use crate::{
    call::{Call, UasTrans},
    options::Opts,
    stateless,
    traits::Gate,
    uriset::{normalize, Dest},
    ForkId,
};

/// Flow tokens are the route user part: this prefix followed by the
/// URL-safe base64 of the connection handle (RFC 5626 §5.3).
const FLOW_TOKEN_PREFIX: &str = "NkF";

const DEFAULT_MAX_FORWARDS: i64 = 70;

/// Outcome of routing one upstream request.
#[derive(Debug)]
pub enum RouteAction {
    /// A fork was created and is running.
    Fork(ForkId),
    /// The request was relayed without keeping state.
    Stateless,
    /// The request was answered locally; send this upstream.
    Reply(Response),
}

impl Call {
    /// Routes a received request towards `dest`, statefully (fork) or
    /// statelessly, or answers it locally.
    pub fn proxy_route(&mut self, uas: &UasTrans, dest: &Dest, mut opts: Opts) -> RouteAction {
        let mut req = uas.request.clone();
        let span = info_span!("proxy_route", method = %req.start.method, uas = uas.id);
        let _entered = span.enter();

        let uriset = normalize(dest);
        if uriset.iter().all(|group| group.is_empty()) {
            debug!("no destinations after normalization");
            return RouteAction::Reply(reply(
                &req,
                Reject::Status(503, SmolStr::new("Temporarily Unavailable")),
            ));
        }

        // Hop check (RFC 3261 §16.3 step 2).
        match req.max_forwards() {
            Some(0) => {
                return if req.start.method == Method::Options {
                    let extra = vec![
                        (SmolStr::new("Allow"), self.config.allow.clone()),
                        (
                            SmolStr::new("Supported"),
                            SmolStr::new(self.config.supported.join(", ")),
                        ),
                    ];
                    RouteAction::Reply(reply_with(&req, 200, SmolStr::new("Max Forwards"), extra))
                } else {
                    RouteAction::Reply(reply(&req, Reject::TooManyHops))
                };
            }
            Some(n) if n < 0 => {
                return RouteAction::Reply(reply(&req, Reject::InvalidRequest));
            }
            _ => {}
        }

        // Session-timer admission lives outside the core.
        match self.peers.session.admit(&req) {
            Gate::Continue => {}
            Gate::Rewrite(rewritten) => req = rewritten,
            Gate::Reply(resp) => return RouteAction::Reply(resp),
        }

        self.preprocess(&mut req, &opts);

        // ACK takes the short paths: it can never be answered.
        if req.start.method == Method::Ack {
            return if opts.stateless {
                let target = uriset[0][0].request_target();
                stateless::relay_request(
                    self.peers.transport.as_ref(),
                    &req,
                    &target,
                    opts.flow.as_ref(),
                );
                RouteAction::Stateless
            } else {
                RouteAction::Fork(self.fork_start(uas, uriset, opts, req))
            };
        }

        // Proxy-Require (RFC 3261 §16.6 step 2).
        let unsupported: Vec<SmolStr> = req
            .headers
            .tokens("Proxy-Require")
            .into_iter()
            .filter(|token| !self.config.supports(token))
            .collect();
        if !unsupported.is_empty() {
            debug!(?unsupported, "unsupported Proxy-Require tokens");
            return RouteAction::Reply(reply(&req, Reject::BadExtension(unsupported)));
        }

        if let Err(reject) = self.path_outbound(&req, &mut opts) {
            return RouteAction::Reply(reply(&req, reject));
        }

        // Pop Route entries that point back at this application.
        while let Some(top) = req.headers.get("Route").cloned() {
            let Some(uri) = SipUri::parse(&top) else {
                break;
            };
            if self.peers.transport.is_local_route(&uri) {
                req.headers.remove_first("Route");
            } else {
                break;
            }
        }

        if opts.record_route && req.start.method.forms_dialog() {
            if let Some(rr) = &self.config.record_route_uri {
                req.headers.push_front("Record-Route", format!("<{}>", rr));
            }
        }

        if opts.stateless {
            let target = uriset[0][0].request_target();
            if self.peers.transport.is_local(&target) {
                warn!(uri = %target, "stateless target loops back here");
                return RouteAction::Reply(reply(&req, Reject::LoopDetected));
            }
            stateless::relay_request(
                self.peers.transport.as_ref(),
                &req,
                &target,
                opts.flow.as_ref(),
            );
            return RouteAction::Stateless;
        }

        RouteAction::Fork(self.fork_start(uas, uriset, opts, req))
    }

    /// RFC 3261 §16.6 steps 1-3: forwards decrement plus caller-requested
    /// route and header edits.
    fn preprocess(&self, req: &mut Request, opts: &Opts) {
        let forwards = req.max_forwards().unwrap_or(DEFAULT_MAX_FORWARDS);
        req.set_max_forwards(forwards - 1);

        if opts.remove_routes {
            req.headers.remove_all("Route");
        }
        for name in &opts.remove_headers {
            req.headers.remove_all(name);
        }
        for (name, value) in &opts.headers {
            req.headers.push(name.clone(), value.clone());
        }

        if !opts.route.is_empty() {
            let mut parsed: Vec<SipUri> = Vec::new();
            let mut ok = true;
            for raw in &opts.route {
                let uris = parse_uri_list(raw);
                if uris.is_empty() {
                    ok = false;
                    break;
                }
                parsed.extend(uris);
            }
            // A parse failure leaves the route set untouched.
            if ok {
                for route in parsed.iter().rev() {
                    req.headers.push_front("Route", format!("<{}>", route));
                }
            }
        }
    }

    /// Path (RFC 3327) and outbound-flow (RFC 5626) handling.
    fn path_outbound(&self, req: &Request, opts: &mut Opts) -> Result<(), Reject> {
        if req.start.method == Method::Register {
            if !opts.make_path {
                return Ok(());
            }
            if !req.headers.has_token("Supported", "path") {
                return Err(Reject::ExtensionRequired(SmolStr::new("path")));
            }
            // A single Contact with reg-id over a single hop, with outbound
            // supported on both sides, pins the registration to the inbound
            // connection.
            let contacts: Vec<&SmolStr> = req.headers.get_all("Contact").collect();
            let sole_reg_id = contacts.len() == 1 && contacts[0].contains("reg-id=");
            if sole_reg_id
                && self.config.supports("outbound")
                && req.headers.has_token("Supported", "outbound")
                && req.headers.count("Via") == 1
            {
                if let Some(source) = &req.source {
                    if let Some(flow) = self.peers.transport.get_connected(source) {
                        opts.flow = Some(flow);
                    }
                }
            }
            return Ok(());
        }

        // For everything else: a local top Route carrying a flow token pins
        // the request to the encoded connection.
        let Some(top) = req.headers.get("Route") else {
            return Ok(());
        };
        let Some(route_uri) = SipUri::parse(top) else {
            return Ok(());
        };
        if !self.peers.transport.is_local_route(&route_uri) {
            return Ok(());
        }
        let Some(user) = &route_uri.user else {
            return Ok(());
        };
        let Some(token) = user.strip_prefix(FLOW_TOKEN_PREFIX) else {
            return Ok(());
        };

        let handle = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(Reject::Forbidden)?;

        match self.peers.transport.get_connected(&handle) {
            Some(flow) => {
                opts.flow = Some(flow);
                if req.start.method.forms_dialog()
                    && route_uri.has_param("ob")
                    && req.to_tag().is_none()
                {
                    opts.record_route = true;
                }
                Ok(())
            }
            None => Err(Reject::FlowFailed),
        }
    }
}

/// Encodes a connection handle into a flow token usable as a route user
/// part.
pub fn flow_token(handle: &str) -> SmolStr {
    SmolStr::new(format!(
        "{}{}",
        FLOW_TOKEN_PREFIX,
        URL_SAFE_NO_PAD.encode(handle.as_bytes())
    ))
}
