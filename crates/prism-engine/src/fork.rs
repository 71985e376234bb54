// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Forking controller (RFC 3261 §16.7).
//!
//! One fork per statefully proxied request. The fork walks its serial
//! groups, launches one UAC per URI of the current group, collects finals,
//! and commits exactly one response upstream; the latch records the commit
//! and nothing displaces it afterwards.

use std::time::Instant;

use percent_encoding::percent_decode_str;
use prism_core::{parse_uri_list, reply, Method, Reject, Request, Response, SipUri};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::{
    call::{Call, UasTrans},
    options::Opts,
    reply::Origin,
    uriset::UriSet,
    ForkId, TransId,
};

/// Whether a final response has been committed upstream for a fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Final {
    None,
    Sent2xx,
    Sent6xx,
}

/// One upstream request being pursued across parallel/serial branches.
pub struct Fork {
    /// Equals the upstream UAS transaction id.
    pub id: ForkId,
    pub method: Method,
    pub opts: Opts,
    /// Template cloned into every branch.
    pub request: Request,
    /// Remaining serial groups.
    pub uriset: UriSet,
    /// Every UAC ever spawned for this fork.
    pub uacs: Vec<TransId>,
    /// UACs whose final response is still awaited.
    pub pending: Vec<TransId>,
    /// Non-2xx finals accumulated for best-response selection.
    pub responses: Vec<Response>,
    /// The final latch: set at most once.
    pub latch: Final,
    pub started: Instant,
}

impl Call {
    /// Creates the fork for an upstream transaction and launches the first
    /// group.
    pub fn fork_start(
        &mut self,
        uas: &UasTrans,
        uriset: UriSet,
        opts: Opts,
        request: Request,
    ) -> ForkId {
        debug!(fork = uas.id, groups = uriset.len(), "fork started");
        self.forks.push(Fork {
            id: uas.id,
            method: request.start.method.clone(),
            opts,
            request,
            uriset,
            uacs: Vec::new(),
            pending: Vec::new(),
            responses: Vec::new(),
            latch: Final::None,
            started: Instant::now(),
        });
        self.fork_next(uas.id);
        uas.id
    }

    /// Advances the fork: waits while branches are pending, otherwise
    /// launches the next group or terminates with the best response.
    fn fork_next(&mut self, fork_id: ForkId) {
        loop {
            let Some(fi) = self.fork_idx(fork_id) else {
                return;
            };
            if !self.forks[fi].pending.is_empty() {
                return;
            }
            if self.forks[fi].latch != Final::None {
                debug!(fork = fork_id, "fork complete");
                self.forks.remove(fi);
                return;
            }
            if self.forks[fi].uriset.is_empty() {
                if self.forks[fi].method == Method::Ack {
                    self.forks.remove(fi);
                    return;
                }
                let resp = best_response(&self.forks[fi].request, &self.forks[fi].responses);
                info!(fork = fork_id, code = resp.code(), "forwarding best response");
                self.peers.upstream.reply(fork_id, &resp);
                self.forks.remove(fi);
                return;
            }
            let group = self.forks[fi].uriset.remove(0);
            self.fork_launch(fork_id, group);
            // A group may fail synchronously on every branch; loop to advance.
        }
    }

    /// Launches one parallel group. Every branch is registered with the fork
    /// before the first send, so a synchronous failure already finds its
    /// branch accounted for.
    fn fork_launch(&mut self, fork_id: ForkId, group: Vec<SipUri>) {
        let Some(fi) = self.fork_idx(fork_id) else {
            return;
        };
        let template = self.forks[fi].request.clone();
        let opts = self.forks[fi].opts.clone();
        let method = self.forks[fi].method.clone();

        let mut launched: Vec<TransId> = Vec::new();
        for uri in group {
            let mut req = template.clone();
            req.refresh_id();

            // A Route header embedded in the target URI (URL-encoded)
            // becomes this branch's route set.
            if let Some(encoded) = uri.header("Route") {
                if let Ok(decoded) = percent_decode_str(encoded).decode_utf8() {
                    let routes = parse_uri_list(&decoded);
                    for route in routes.iter().rev() {
                        req.headers.push_front("Route", format!("<{}>", route));
                    }
                }
            }

            let target = uri.request_target();
            if self.peers.transport.is_local(&target) {
                warn!(fork = fork_id, uri = %target, "branch would loop back here");
                let resp = reply(&req, Reject::LoopDetected);
                if let Some(fi) = self.fork_idx(fork_id) {
                    self.forks[fi].responses.push(resp);
                }
                continue;
            }
            req.start.uri = target;

            let id = self.uac_prepare(req, opts.clone(), Origin::Fork(fork_id));
            if let Some(fi) = self.fork_idx(fork_id) {
                self.forks[fi].uacs.push(id);
                if method != Method::Ack {
                    self.forks[fi].pending.push(id);
                }
            }
            launched.push(id);
        }

        for id in launched {
            self.uac_send(id);
        }
    }

    /// Feeds a branch response into the fork.
    pub fn fork_response(&mut self, fork_id: ForkId, uac_id: TransId, resp: Response) {
        let code = resp.code();
        if code < 101 {
            return;
        }
        let Some(fi) = self.fork_idx(fork_id) else {
            debug!(fork = fork_id, uac = uac_id, code, "response for unknown fork");
            return;
        };

        let pending = self.forks[fi].pending.contains(&uac_id);
        let known = self.forks[fi].uacs.contains(&uac_id);

        if !pending {
            if known && (200..300).contains(&code) {
                // A late 2xx from a forked branch still travels upstream so
                // the caller can ACK that leg.
                info!(fork = fork_id, uac = uac_id, "relaying late 2xx");
                self.peers.upstream.reply(fork_id, &resp);
            } else if !known {
                warn!(fork = fork_id, uac = uac_id, code, "response from unknown branch");
            }
            return;
        }

        match code {
            101..=199 => {
                if self.forks[fi].latch == Final::None {
                    self.peers.upstream.reply(fork_id, &resp);
                }
            }
            200..=299 => {
                let fork = &mut self.forks[fi];
                fork.pending.retain(|id| *id != uac_id);
                fork.uriset.clear();
                let commit = fork.latch == Final::None;
                if commit {
                    fork.latch = Final::Sent2xx;
                }
                let losers = fork.pending.clone();
                for id in losers {
                    self.uac_cancel_reason(
                        id,
                        Some((200, SmolStr::new("Call completed elsewhere"))),
                    );
                }
                if commit {
                    self.peers.upstream.reply(fork_id, &resp);
                }
                self.fork_next(fork_id);
            }
            300..=399 => {
                self.forks[fi].pending.retain(|id| *id != uac_id);
                let follow = self.forks[fi].opts.follow_redirects
                    && self.forks[fi].latch == Final::None;
                let mut contacts = if follow { resp.contacts() } else { Vec::new() };
                if self.forks[fi].request.start.uri.sips {
                    contacts.retain(|c| c.sips);
                }
                for contact in &mut contacts {
                    contact.strip_transport_artifacts();
                }
                if contacts.is_empty() {
                    self.forks[fi].responses.push(resp);
                } else {
                    debug!(fork = fork_id, n = contacts.len(), "following redirect");
                    self.forks[fi].uriset.insert(0, contacts);
                }
                self.fork_next(fork_id);
            }
            400..=599 => {
                self.forks[fi].pending.retain(|id| *id != uac_id);
                self.forks[fi].responses.push(resp);
                self.fork_next(fork_id);
            }
            _ => {
                // 6xx ends the whole fork (RFC 3261 §16.7 step 5).
                let fork = &mut self.forks[fi];
                fork.pending.retain(|id| *id != uac_id);
                fork.uriset.clear();
                let commit = fork.latch == Final::None;
                if commit {
                    fork.latch = Final::Sent6xx;
                }
                let losers = fork.pending.clone();
                let reason = resp.start.reason.clone();
                for id in losers {
                    self.uac_cancel_reason(id, Some((code, reason.clone())));
                }
                if commit {
                    self.peers.upstream.reply(fork_id, &resp);
                }
                self.fork_next(fork_id);
            }
        }
    }

    /// User-initiated cancellation of a fork. INVITE branches are cancelled;
    /// other methods run to completion, but no further group launches.
    pub fn fork_cancel(&mut self, fork_id: ForkId) {
        let Some(fi) = self.fork_idx(fork_id) else {
            debug!(fork = fork_id, "cancel for unknown fork");
            return;
        };
        self.forks[fi].uriset.clear();
        if self.forks[fi].method == Method::Invite {
            let pending = self.forks[fi].pending.clone();
            for id in pending {
                self.uac_cancel_reason(id, None);
            }
        }
    }
}

/// Selection rank; lower wins. Authentication challenges beat everything so
/// credentials can be supplied, specific protocol rejections come next, and
/// 503 ranks worst of the 4xx/5xx band because the peer told us to go
/// elsewhere.
pub fn rank(code: u16) -> u32 {
    match code {
        401 | 407 => 3999,
        415 | 420 | 484 => 4000,
        503 => 5000,
        600..=699 => u32::from(code),
        _ => 10 * u32::from(code),
    }
}

/// Picks the response a fork forwards upstream when every branch failed.
/// Stable by arrival order within equal rank. 503 is downgraded to 500
/// (RFC 3261 §16.7), and a winning challenge aggregates the authenticate
/// headers of every challenge in the set.
pub fn best_response(template: &Request, responses: &[Response]) -> Response {
    let Some(winner_idx) = (0..responses.len()).min_by_key(|&i| (rank(responses[i].code()), i))
    else {
        return reply(template, Reject::TemporarilyUnavailable);
    };
    let mut winner = responses[winner_idx].clone();

    if winner.code() == 503 {
        winner.start.code = 500;
    }

    if matches!(winner.code(), 401 | 407) {
        winner.headers.remove_all("WWW-Authenticate");
        winner.headers.remove_all("Proxy-Authenticate");
        for resp in responses {
            if !matches!(resp.code(), 401 | 407) {
                continue;
            }
            for value in resp.headers.get_all("WWW-Authenticate") {
                winner.headers.push("WWW-Authenticate", value.clone());
            }
            for value in resp.headers.get_all("Proxy-Authenticate") {
                winner.headers.push("Proxy-Authenticate", value.clone());
            }
        }
    }
    winner
}
