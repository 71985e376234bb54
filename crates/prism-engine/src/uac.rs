// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client transaction state machine (RFC 3261 §17.1, RFC 6026).
//!
//! One `UacTrans` per downstream request. The receive path is a dispatch
//! table over `(status, response class)`. Everything locally generated
//! (timeouts, transport failures) is materialized as a synthetic response
//! and pushed through the same table, so cleanup is uniform.

use std::time::{Duration, Instant};

use bytes::Bytes;
use prism_core::{reply, via, Headers, Method, Reject, Request, RequestLine, Response, SipUri};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::{
    call::Call,
    key::TransKey,
    options::Opts,
    reply::{self as user_reply, Origin},
    timer::{Proto, TimerHandle, TimerKind},
    traits::{DialogId, DialogRefusal},
    TransId,
};

/// Auth retry budget per logical request.
pub const MAX_AUTH_ITERATIONS: u8 = 5;

/// Client transaction statuses. INVITE and non-INVITE share the table; the
/// `Invite*` rows carry the extra accepted/completed machinery of RFC 6026.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    InviteCalling,
    InviteProceeding,
    InviteAccepted,
    InviteCompleted,
    Trying,
    Proceeding,
    Completed,
    Finished,
    Ack,
}

impl Status {
    pub fn initial(method: &Method) -> Self {
        match method {
            Method::Ack => Status::Ack,
            Method::Invite => Status::InviteCalling,
            _ => Status::Trying,
        }
    }
}

/// Cancellation progress for an INVITE transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    None,
    /// Cancel requested before any provisional; fires on the first 1xx.
    ToCancel,
    Cancelled,
}

/// One downstream client transaction.
pub struct UacTrans {
    pub id: TransId,
    pub status: Status,
    pub request: Request,
    pub response: Option<Response>,
    pub method: Method,
    /// Remembered separately: the stored request gets rewritten in place.
    pub ruri: SipUri,
    pub proto: Proto,
    pub opts: Opts,
    pub origin: Origin,
    pub key: TransKey,
    pub iteration: u8,
    pub cancel: CancelState,
    pub(crate) cancel_reason: Option<(u16, SmolStr)>,
    /// To header as it read before an error response rewrote it. An error
    /// final forms no dialog, so an auth retry goes out with this one.
    pub(crate) original_to: Option<SmolStr>,
    /// To-tags observed on final responses; used to tell retransmissions
    /// from forked answers.
    pub to_tags: Vec<SmolStr>,
    pub(crate) retrans: Option<TimerHandle>,
    pub(crate) timeout: Option<TimerHandle>,
    pub(crate) expire: Option<TimerHandle>,
    pub(crate) retrans_interval: Duration,
    pub started: Instant,
}

impl UacTrans {
    pub(crate) fn stop_retrans(&mut self) {
        if let Some(handle) = self.retrans.as_mut() {
            handle.cancel();
        }
        self.retrans = None;
    }

    pub(crate) fn stop_timeout(&mut self) {
        if let Some(handle) = self.timeout.as_mut() {
            handle.cancel();
        }
        self.timeout = None;
    }

    pub(crate) fn stop_expire(&mut self) {
        if let Some(handle) = self.expire.as_mut() {
            handle.cancel();
        }
        self.expire = None;
    }

    pub(crate) fn stop_all_timers(&mut self) {
        self.stop_retrans();
        self.stop_timeout();
        self.stop_expire();
    }

    fn remember_to_tag(&mut self, resp: &Response) {
        if let Some(tag) = resp.to_tag() {
            if !self.to_tags.contains(&tag) {
                self.to_tags.push(tag);
            }
        }
    }
}

impl Call {
    /// Sends a downstream request: allocates the transaction, consults the
    /// dialog layer, hands the request to transport, and arms the timers.
    /// Returns the transaction id.
    pub fn uac_request(&mut self, req: Request, opts: Opts, origin: Origin) -> TransId {
        let id = self.uac_prepare(req, opts, origin);
        self.uac_send(id);
        id
    }

    /// Allocates and registers the transaction without sending. Forks
    /// register every branch before the first send so that a synchronous
    /// transport failure still finds its branch accounted for.
    pub(crate) fn uac_prepare(&mut self, mut req: Request, opts: Opts, mut origin: Origin) -> TransId {
        // A callback option on an otherwise anonymous request is the user
        // origin.
        if matches!(origin, Origin::None) {
            if let Some(sink) = &opts.callback {
                origin = Origin::User(sink.clone());
            }
        }
        let method = req.start.method.clone();
        if method != Method::Cancel {
            let branch = via::generate_branch();
            let transport = req.start.uri.transport_token();
            via::push_via(&mut req, self.config.via_host.as_str(), &transport, &branch);
        }
        if opts.make_contact && req.headers.get("Contact").is_none() {
            req.headers
                .push("Contact", format!("<sip:{}>", self.config.via_host));
        }

        let ruri = req.start.uri.clone();
        let proto = Proto::for_uri(&ruri);
        let key = TransKey::from_request(&self.app_id, &req).unwrap_or_else(|| TransKey {
            app: self.app_id.clone(),
            call_id: self.call_id.clone(),
            method: method.clone(),
            branch: SmolStr::new(""),
        });

        if opts.async_reply {
            let msg_id = (method != Method::Ack).then(|| req.id.clone());
            user_reply::acknowledge_async(&origin, msg_id.as_ref());
        }
        user_reply::deliver_request(&origin, &req, &opts);

        let id = self.next_id();
        self.index_msg(req.id.clone(), id, None);
        debug!(trans = id, method = %method, uri = %ruri, "uac transaction created");

        let t1 = self.config.timers.t1;
        self.trans.push(UacTrans {
            id,
            status: Status::initial(&method),
            request: req,
            response: None,
            method,
            ruri,
            proto,
            opts,
            origin,
            key,
            iteration: 0,
            cancel: CancelState::None,
            cancel_reason: None,
            original_to: None,
            to_tags: Vec::new(),
            retrans: None,
            timeout: None,
            expire: None,
            retrans_interval: t1,
            started: Instant::now(),
        });
        id
    }

    /// Drives the send path of a prepared transaction.
    pub(crate) fn uac_send(&mut self, id: TransId) {
        let Some(i) = self.trans_idx(id) else {
            return;
        };
        if self.trans[i].method == Method::Ack {
            self.send_ack_trans(i);
            return;
        }

        if !self.trans[i].opts.no_dialog {
            if let Err(refusal) = self.peers.dialog.request(&self.trans[i].request) {
                let reject = match refusal {
                    DialogRefusal::RequestPending => Reject::RequestPending,
                    DialogRefusal::UnknownDialog => Reject::UnknownDialog,
                };
                debug!(trans = id, %reject, "dialog layer refused request");
                let resp = reply(&self.trans[i].request, reject);
                self.trans[i].status = Status::Finished;
                self.forward_to_origin(i, &resp);
                return;
            }
        }

        let sent = if self.trans[i].method == Method::Cancel {
            // CANCEL rides the branch of the INVITE it cancels.
            self.peers.transport.resend_request(&self.trans[i].request)
        } else {
            self.peers.transport.send_request(
                &self.trans[i].request,
                &self.trans[i].ruri,
                self.trans[i].opts.flow.as_ref(),
            )
        };

        match sent {
            Ok(()) => self.arm_send_timers(i),
            Err(err) => {
                warn!(trans = id, error = %err, "transport send failed");
                let resp = reply(&self.trans[i].request, Reject::ServiceUnavailable);
                self.do_received(i, resp);
            }
        }
    }

    fn send_ack_trans(&mut self, i: usize) {
        let origin = self.trans[i].origin.clone();
        match self.peers.transport.send_request(
            &self.trans[i].request,
            &self.trans[i].ruri,
            self.trans[i].opts.flow.as_ref(),
        ) {
            Ok(()) => {
                if !self.trans[i].opts.no_dialog {
                    self.peers.dialog.ack(&self.trans[i].request);
                }
                self.peers
                    .auth
                    .update_cache_from_request(&self.trans[i].request);
            }
            Err(err) => {
                warn!(trans = self.trans[i].id, error = %err, "ACK send failed");
                user_reply::deliver_error(&origin, Reject::NetworkError);
            }
        }
        self.trans[i].status = Status::Finished;
    }

    fn arm_send_timers(&mut self, i: usize) {
        let id = self.trans[i].id;
        let proto = self.trans[i].proto;
        let timers = self.config.timers;
        match self.trans[i].method {
            Method::Invite => {
                let timeout = self.sched(id, TimerKind::B, timers.duration(TimerKind::B, proto));
                self.trans[i].timeout = Some(timeout);
                if let Some(secs) = self.trans[i].request.expires().filter(|s| *s > 0) {
                    let expire = self.sched(id, TimerKind::Expire, Duration::from_secs(secs));
                    self.trans[i].expire = Some(expire);
                }
                if !proto.is_reliable() {
                    self.trans[i].retrans_interval = timers.t1;
                    let retrans = self.sched(id, TimerKind::A, timers.t1);
                    self.trans[i].retrans = Some(retrans);
                }
            }
            _ => {
                let timeout = self.sched(id, TimerKind::F, timers.duration(TimerKind::F, proto));
                self.trans[i].timeout = Some(timeout);
                if !proto.is_reliable() {
                    self.trans[i].retrans_interval = timers.t1;
                    let retrans = self.sched(id, TimerKind::E, timers.t1);
                    self.trans[i].retrans = Some(retrans);
                }
            }
        }
    }

    fn sched(&self, trans: TransId, kind: TimerKind, after: Duration) -> TimerHandle {
        self.peers.timers.schedule(
            crate::timer::TimerKey {
                call_id: self.call_id.clone(),
                trans,
                kind,
            },
            after,
        )
    }

    /// Receive path: matches the response to its transaction and feeds it
    /// through the dispatch table. Unmatched responses are logged and
    /// dropped.
    pub fn uac_response(&mut self, resp: Response) {
        let Some(key) = TransKey::from_response(&self.app_id, &resp) else {
            debug!("response without usable transaction key");
            return;
        };
        let Some(i) = self.trans_idx_by_key(&key) else {
            debug!(branch = %key.branch, "response matches no transaction");
            return;
        };
        self.do_received(i, resp);
    }

    pub(crate) fn do_received(&mut self, i: usize, mut resp: Response) {
        if self.trans[i].started.elapsed() > self.config.max_trans_time {
            info!(trans = self.trans[i].id, "transaction exceeded hard ceiling");
            resp = reply(
                &self.trans[i].request,
                Reject::Timeout(SmolStr::new("Transaction Timeout")),
            );
        }
        if (200..300).contains(&resp.code()) {
            self.peers.auth.update_cache(&resp);
        }
        if !self.trans[i].opts.no_dialog || self.trans[i].opts.update_dialog {
            self.peers.dialog.response(&self.trans[i].request, &resp);
        }
        self.dispatch(i, resp);
    }

    fn dispatch(&mut self, i: usize, resp: Response) {
        let code = resp.code();
        match self.trans[i].status {
            Status::InviteCalling => {
                self.trans[i].stop_retrans();
                self.trans[i].status = Status::InviteProceeding;
                self.dispatch(i, resp);
            }

            Status::InviteProceeding if code < 200 => {
                // Every provisional refreshes Timer C, dropping the previous
                // ceiling.
                let id = self.trans[i].id;
                let tc = self.config.timers.tc;
                let handle = self.sched(id, TimerKind::C, tc);
                self.trans[i].stop_timeout();
                self.trans[i].timeout = Some(handle);
                let deferred = self.trans[i].cancel == CancelState::ToCancel;
                self.forward_to_origin(i, &resp);
                if deferred {
                    self.send_cancel(i);
                }
            }

            Status::InviteProceeding if code < 300 => {
                let id = self.trans[i].id;
                let m = self
                    .config
                    .timers
                    .duration(TimerKind::M, self.trans[i].proto);
                {
                    let t = &mut self.trans[i];
                    t.stop_timeout();
                    t.stop_expire();
                    t.remember_to_tag(&resp);
                    t.cancel = CancelState::None;
                    t.cancel_reason = None;
                    t.status = Status::InviteAccepted;
                    t.response = Some(resp.clone());
                }
                // Timer M absorbs 2xx retransmissions and forked answers.
                let handle = self.sched(id, TimerKind::M, m);
                self.trans[i].timeout = Some(handle);
                self.forward_to_origin(i, &resp);
            }

            Status::InviteProceeding => {
                if resp.synthetic {
                    let t = &mut self.trans[i];
                    t.stop_all_timers();
                    t.status = Status::Finished;
                    t.response = Some(resp.clone());
                    self.forward_to_origin(i, &resp);
                } else {
                    // A real error response: the stored request takes the
                    // peer's To so the ACK addresses the right leg. The
                    // previous value is kept because the retry path must
                    // not inherit the peer's tag.
                    if let Some(to) = resp.headers.get("To").cloned() {
                        let previous = self.trans[i].request.headers.get("To").cloned();
                        if self.trans[i].original_to.is_none() {
                            self.trans[i].original_to = previous;
                        }
                        self.trans[i].request.headers.set("To", to);
                    }
                    self.send_ack_for_error(i);
                    let id = self.trans[i].id;
                    let unreliable = !self.trans[i].proto.is_reliable();
                    {
                        let t = &mut self.trans[i];
                        t.stop_all_timers();
                        t.remember_to_tag(&resp);
                        t.response = Some(resp.clone());
                        t.status = if unreliable {
                            Status::InviteCompleted
                        } else {
                            Status::Finished
                        };
                    }
                    if unreliable {
                        let d = self
                            .config
                            .timers
                            .duration(TimerKind::D, self.trans[i].proto);
                        let handle = self.sched(id, TimerKind::D, d);
                        self.trans[i].timeout = Some(handle);
                    }
                    self.after_final(i, resp);
                }
            }

            Status::InviteAccepted => {
                if code < 200 {
                    return;
                }
                let first = self.trans[i].to_tags.first().cloned();
                match resp.to_tag() {
                    Some(tag) if Some(&tag) == first.as_ref() => {
                        debug!(trans = self.trans[i].id, "2xx retransmission absorbed");
                    }
                    Some(tag) => self.secondary_response(i, resp, tag),
                    None => debug!(trans = self.trans[i].id, "final without to-tag dropped"),
                }
            }

            Status::InviteCompleted => match resp.to_tag() {
                Some(tag) if self.trans[i].to_tags.contains(&tag) => {
                    let same_code =
                        self.trans[i].response.as_ref().map(Response::code) == Some(code);
                    if same_code {
                        self.send_ack_for_error(i);
                    } else {
                        debug!(
                            trans = self.trans[i].id,
                            code, "conflicting retransmission ignored"
                        );
                    }
                }
                Some(tag) => self.secondary_response(i, resp, tag),
                None => debug!(trans = self.trans[i].id, "final without to-tag dropped"),
            },

            Status::Trying => {
                self.trans[i].stop_retrans();
                self.trans[i].status = Status::Proceeding;
                self.dispatch(i, resp);
            }

            Status::Proceeding if code < 200 => {
                self.forward_to_origin(i, &resp);
            }

            Status::Proceeding => {
                if resp.synthetic {
                    let t = &mut self.trans[i];
                    t.stop_all_timers();
                    t.status = Status::Finished;
                    t.response = Some(resp.clone());
                    self.forward_to_origin(i, &resp);
                } else if !self.trans[i].proto.is_reliable() {
                    let id = self.trans[i].id;
                    let k = self
                        .config
                        .timers
                        .duration(TimerKind::K, self.trans[i].proto);
                    {
                        let t = &mut self.trans[i];
                        t.stop_all_timers();
                        t.remember_to_tag(&resp);
                        t.status = Status::Completed;
                        // The lingering state only absorbs retransmissions;
                        // free the buffers.
                        t.request.body = Bytes::new();
                        t.response = None;
                    }
                    let handle = self.sched(id, TimerKind::K, k);
                    self.trans[i].timeout = Some(handle);
                    self.after_final(i, resp);
                } else {
                    let t = &mut self.trans[i];
                    t.stop_all_timers();
                    t.status = Status::Finished;
                    self.after_final(i, resp);
                }
            }

            Status::Completed => match resp.to_tag() {
                Some(tag) if self.trans[i].to_tags.contains(&tag) => {
                    debug!(trans = self.trans[i].id, "retransmission absorbed");
                }
                Some(tag) => {
                    // A different branch answered the same non-INVITE.
                    self.trans[i].to_tags.push(tag);
                    self.after_final(i, resp);
                }
                None => debug!(trans = self.trans[i].id, "final without to-tag dropped"),
            },

            Status::Finished | Status::Ack => {
                debug!(trans = self.trans[i].id, code, "response for terminal transaction");
            }
        }
    }

    /// Post-final handling: either spawn an authenticated retry or hand the
    /// response to whoever originated the transaction.
    fn after_final(&mut self, i: usize, resp: Response) {
        let code = resp.code();
        let retryable = (code == 401 || code == 407)
            && self.trans[i].iteration < MAX_AUTH_ITERATIONS
            && self.trans[i].method != Method::Cancel
            && !self.trans[i].origin.is_fork();

        if retryable {
            let authorized =
                self.peers
                    .auth
                    .make_request(&self.trans[i].request, &resp, &self.trans[i].opts);
            if let Some(mut retry) = authorized {
                let iteration = self.trans[i].iteration + 1;
                let origin = self.trans[i].origin.clone();
                let mut opts = self.trans[i].opts.clone();
                opts.make_contact = false;

                // The challenge formed no dialog (RFC 3261 §8.1.3.5): the
                // retry is a fresh out-of-dialog request without the
                // peer's tag.
                if let Some(original_to) = self.trans[i].original_to.clone() {
                    retry.headers.set("To", original_to);
                }

                let seq = self.peers.dialog.new_local_seq(&retry);
                let method = retry.start.method.clone();
                retry.set_cseq(seq, &method);
                via::pop_via(&mut retry.headers);
                retry.refresh_id();

                info!(trans = self.trans[i].id, iteration, "retrying with credentials");
                let id = self.uac_prepare(retry, opts, origin);
                if let Some(j) = self.trans_idx(id) {
                    self.trans[j].iteration = iteration;
                }
                self.uac_send(id);
                return;
            }
        }
        self.forward_to_origin(i, &resp);
    }

    fn forward_to_origin(&mut self, i: usize, resp: &Response) {
        let origin = self.trans[i].origin.clone();
        match origin {
            Origin::Fork(fork_id) => {
                let uac_id = self.trans[i].id;
                self.fork_response(fork_id, uac_id, resp.clone());
            }
            other => user_reply::deliver_response(&other, resp, &self.trans[i].opts),
        }
    }

    /// A final response whose to-tag was never seen: a second leg answered a
    /// forked INVITE. The engine cannot own that dialog, so a detached task
    /// tears it down with ACK then BYE, and the 2xx still travels upstream
    /// so the fork can relay it.
    fn secondary_response(&mut self, i: usize, resp: Response, tag: SmolStr) {
        self.trans[i].to_tags.push(tag);
        match DialogId::from_response_uac(&resp) {
            Some(dialog) => {
                info!(trans = self.trans[i].id, "tearing down secondary dialog leg");
                self.peers.dialog.ack_and_bye(dialog);
            }
            None => warn!(
                trans = self.trans[i].id,
                "secondary response without dialog identity"
            ),
        }
        if (200..300).contains(&resp.code()) {
            self.forward_to_origin(i, &resp);
        }
    }

    /// User-facing cancel. Only meaningful for INVITE.
    pub fn uac_cancel(&mut self, id: TransId) {
        self.uac_cancel_reason(id, None);
    }

    pub(crate) fn uac_cancel_reason(&mut self, id: TransId, reason: Option<(u16, SmolStr)>) {
        let Some(i) = self.trans_idx(id) else {
            debug!(trans = id, "cancel for unknown transaction");
            return;
        };
        if self.trans[i].method != Method::Invite {
            debug!(trans = id, "cancel on non-INVITE ignored");
            return;
        }
        match self.trans[i].status {
            Status::InviteCalling => {
                // No provisional yet: RFC 3261 §9.1 defers the CANCEL.
                self.trans[i].cancel = CancelState::ToCancel;
                self.trans[i].cancel_reason = reason;
            }
            Status::InviteProceeding => {
                self.trans[i].cancel_reason = reason;
                self.send_cancel(i);
            }
            _ => {}
        }
    }

    fn send_cancel(&mut self, i: usize) {
        if self.trans[i].cancel == CancelState::Cancelled {
            return;
        }
        self.trans[i].cancel = CancelState::Cancelled;
        let reason = self.trans[i].cancel_reason.take();
        let cancel = build_cancel(&self.trans[i], reason);
        let mut opts = Opts::default();
        opts.no_dialog = true;
        self.uac_request(cancel, opts, Origin::None);
    }

    fn send_ack_for_error(&mut self, i: usize) {
        let ack = build_ack(&self.trans[i]);
        if let Err(err) = self.peers.transport.send_request(
            &ack,
            &self.trans[i].ruri,
            self.trans[i].opts.flow.as_ref(),
        ) {
            warn!(trans = self.trans[i].id, error = %err, "ACK for error response failed");
        }
    }

    /// Timer entry point. Stale fires for transactions that moved on are
    /// ignored.
    pub fn uac_timer(&mut self, kind: TimerKind, id: TransId) {
        let Some(i) = self.trans_idx(id) else {
            debug!(trans = id, ?kind, "timer for unknown transaction");
            return;
        };
        let status = self.trans[i].status;
        match kind {
            TimerKind::A => {
                if status == Status::InviteCalling {
                    self.retransmit(i, TimerKind::A, None);
                }
            }
            TimerKind::E => {
                if matches!(status, Status::Trying | Status::Proceeding) {
                    let cap = self.config.timers.t2;
                    self.retransmit(i, TimerKind::E, Some(cap));
                }
            }
            TimerKind::B => {
                if matches!(status, Status::InviteCalling | Status::InviteProceeding) {
                    self.timeout_with(i, "Timer B Timeout");
                }
            }
            TimerKind::C => {
                if matches!(status, Status::InviteCalling | Status::InviteProceeding) {
                    self.timeout_with(i, "Timer C Timeout");
                }
            }
            TimerKind::F => {
                if matches!(status, Status::Trying | Status::Proceeding) {
                    self.timeout_with(i, "Timer F Timeout");
                }
            }
            TimerKind::D => {
                if status == Status::InviteCompleted {
                    self.finish(i);
                }
            }
            TimerKind::K => {
                if status == Status::Completed {
                    self.finish(i);
                }
            }
            TimerKind::M => {
                if status == Status::InviteAccepted {
                    self.finish(i);
                }
            }
            TimerKind::Expire => {
                if matches!(status, Status::InviteCalling | Status::InviteProceeding) {
                    self.uac_cancel_reason(id, None);
                }
            }
        }
    }

    fn retransmit(&mut self, i: usize, kind: TimerKind, cap: Option<Duration>) {
        if let Err(err) = self.peers.transport.resend_request(&self.trans[i].request) {
            warn!(trans = self.trans[i].id, error = %err, "retransmission failed");
        }
        let mut interval = self.trans[i].retrans_interval.saturating_mul(2);
        if let Some(cap) = cap {
            interval = interval.min(cap);
        }
        self.trans[i].retrans_interval = interval;
        let id = self.trans[i].id;
        let handle = self.sched(id, kind, interval);
        self.trans[i].retrans = Some(handle);
    }

    fn timeout_with(&mut self, i: usize, reason: &str) {
        let resp = reply(
            &self.trans[i].request,
            Reject::Timeout(SmolStr::new(reason.to_owned())),
        );
        self.do_received(i, resp);
    }

    fn finish(&mut self, i: usize) {
        let t = &mut self.trans[i];
        t.stop_all_timers();
        t.status = Status::Finished;
    }
}

/// Builds a CANCEL for an INVITE transaction. It rides the INVITE's top Via
/// so the peer matches it to the right transaction (RFC 3261 §9.1).
fn build_cancel(trans: &UacTrans, reason: Option<(u16, SmolStr)>) -> Request {
    let mut headers = Headers::new();
    copy_transaction_headers(&trans.request, &mut headers);
    if let Some((num, _)) = trans.request.cseq() {
        headers.set("CSeq", format!("{} CANCEL", num));
    }
    if let Some((code, text)) = reason {
        headers.push("Reason", format!("SIP;cause={};text=\"{}\"", code, text));
    }
    Request::new(
        RequestLine::new(Method::Cancel, trans.ruri.clone()),
        headers,
        Bytes::new(),
    )
}

/// Builds the ACK for a non-2xx final (RFC 3261 §17.1.1.3). The stored
/// request's To was already rewritten with the peer's tag.
fn build_ack(trans: &UacTrans) -> Request {
    let mut headers = Headers::new();
    copy_transaction_headers(&trans.request, &mut headers);
    if let Some((num, _)) = trans.request.cseq() {
        headers.set("CSeq", format!("{} ACK", num));
    }
    Request::new(
        RequestLine::new(Method::Ack, trans.ruri.clone()),
        headers,
        Bytes::new(),
    )
}

fn copy_transaction_headers(req: &Request, headers: &mut Headers) {
    if let Some(via) = req.headers.get("Via") {
        headers.push("Via", via.clone());
    }
    for name in ["From", "To", "Call-ID", "CSeq", "Max-Forwards"] {
        if let Some(value) = req.headers.get(name) {
            headers.push(name, value.clone());
        }
    }
    for route in req.headers.get_all("Route") {
        headers.push("Route", route.clone());
    }
}
