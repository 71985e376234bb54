//! Recording test doubles for the engine's collaborator seams, plus message
//! builders shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use prism_core::{Headers, Method, Request, RequestLine, Response, SipUri, StatusLine};
use prism_engine::{
    AuthLayer, Call, Config, DialogId, DialogLayer, DialogRefusal, FlowHandle, OpenGate, Opts,
    Peers, TimerHandle, TimerKey, TimerService, Transport, UasTrans, UpstreamReply, UserEvent,
    UserSink,
};
use smol_str::SmolStr;

/// Transport double: records everything, optionally failing sends to
/// configured hosts and answering flow lookups.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<(Request, SipUri, Option<FlowHandle>)>>,
    pub resent: Mutex<Vec<Request>>,
    pub responses: Mutex<Vec<Response>>,
    pub fail_hosts: Mutex<HashSet<String>>,
    pub local_hosts: Mutex<HashSet<String>>,
    pub local_route_hosts: Mutex<HashSet<String>>,
    pub connections: Mutex<HashMap<String, FlowHandle>>,
}

impl MockTransport {
    pub fn fail_host(&self, host: &str) {
        self.fail_hosts.lock().insert(host.to_owned());
    }

    pub fn mark_local(&self, host: &str) {
        self.local_hosts.lock().insert(host.to_owned());
    }

    pub fn mark_local_route(&self, host: &str) {
        self.local_route_hosts.lock().insert(host.to_owned());
    }

    pub fn add_connection(&self, handle: &str) {
        self.connections
            .lock()
            .insert(handle.to_owned(), SmolStr::new(handle.to_owned()));
    }

    /// Requests sent with the given method, in order.
    pub fn sent_with_method(&self, method: &Method) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter(|(req, _, _)| &req.start.method == method)
            .map(|(req, _, _)| req.clone())
            .collect()
    }

    /// Flow handles the sends with the given method were pinned to.
    pub fn flows_with_method(&self, method: &Method) -> Vec<Option<FlowHandle>> {
        self.sent
            .lock()
            .iter()
            .filter(|(req, _, _)| &req.start.method == method)
            .map(|(_, _, flow)| flow.clone())
            .collect()
    }

    pub fn resent_with_method(&self, method: &Method) -> Vec<Request> {
        self.resent
            .lock()
            .iter()
            .filter(|req| &req.start.method == method)
            .cloned()
            .collect()
    }
}

impl Transport for MockTransport {
    fn send_request(
        &self,
        req: &Request,
        target: &SipUri,
        flow: Option<&FlowHandle>,
    ) -> Result<()> {
        if self.fail_hosts.lock().contains(target.host.as_str()) {
            return Err(anyhow!("host unreachable"));
        }
        self.sent
            .lock()
            .push((req.clone(), target.clone(), flow.cloned()));
        Ok(())
    }

    fn resend_request(&self, req: &Request) -> Result<()> {
        self.resent.lock().push(req.clone());
        Ok(())
    }

    fn send_response(&self, resp: &Response) -> Result<()> {
        self.responses.lock().push(resp.clone());
        Ok(())
    }

    fn get_connected(&self, handle: &str) -> Option<FlowHandle> {
        self.connections.lock().get(handle).cloned()
    }

    fn is_local(&self, uri: &SipUri) -> bool {
        self.local_hosts.lock().contains(uri.host.as_str())
    }

    fn is_local_route(&self, uri: &SipUri) -> bool {
        self.local_route_hosts.lock().contains(uri.host.as_str())
    }
}

/// Dialog double: admits everything unless told otherwise, counts ACKs and
/// secondary-leg teardowns, and mints CSeq numbers from 1000 up.
#[derive(Default)]
pub struct MockDialog {
    pub refusal: Mutex<Option<DialogRefusal>>,
    pub requests: Mutex<Vec<Request>>,
    pub acks: Mutex<Vec<Request>>,
    pub teardowns: Mutex<Vec<DialogId>>,
    seq: AtomicU32,
}

impl DialogLayer for MockDialog {
    fn request(&self, req: &Request) -> std::result::Result<(), DialogRefusal> {
        if let Some(refusal) = *self.refusal.lock() {
            return Err(refusal);
        }
        self.requests.lock().push(req.clone());
        Ok(())
    }

    fn response(&self, _req: &Request, _resp: &Response) {}

    fn ack(&self, req: &Request) {
        self.acks.lock().push(req.clone());
    }

    fn new_local_seq(&self, _req: &Request) -> u32 {
        1000 + self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn ack_and_bye(&self, dialog: DialogId) {
        self.teardowns.lock().push(dialog);
    }
}

/// Auth double: when armed, answers any challenge by cloning the original
/// request with an Authorization header.
#[derive(Default)]
pub struct MockAuth {
    pub can_authorize: Mutex<bool>,
    pub cached: Mutex<Vec<u16>>,
}

impl MockAuth {
    pub fn arm(&self) {
        *self.can_authorize.lock() = true;
    }
}

impl AuthLayer for MockAuth {
    fn make_request(&self, req: &Request, resp: &Response, _opts: &Opts) -> Option<Request> {
        if !*self.can_authorize.lock() {
            return None;
        }
        let mut authorized = req.clone();
        let header = if resp.code() == 401 {
            "Authorization"
        } else {
            "Proxy-Authorization"
        };
        authorized.headers.set(header, "Digest response=\"feed\"");
        Some(authorized)
    }

    fn update_cache(&self, resp: &Response) {
        self.cached.lock().push(resp.code());
    }
}

/// Timer double: records schedules and hands out inert handles.
#[derive(Default)]
pub struct RecordingTimers {
    pub scheduled: Mutex<Vec<(TimerKey, Duration)>>,
}

impl RecordingTimers {
    pub fn kinds_for(&self, trans: u32) -> Vec<prism_engine::TimerKind> {
        self.scheduled
            .lock()
            .iter()
            .filter(|(key, _)| key.trans == trans)
            .map(|(key, _)| key.kind)
            .collect()
    }
}

impl TimerService for RecordingTimers {
    fn schedule(&self, key: TimerKey, after: Duration) -> TimerHandle {
        self.scheduled.lock().push((key, after));
        TimerHandle::inert()
    }
}

/// Upstream double: records every response handed to the UAS bridge.
#[derive(Default)]
pub struct MockUpstream {
    pub replies: Mutex<Vec<(u32, Response)>>,
}

impl MockUpstream {
    pub fn codes(&self) -> Vec<u16> {
        self.replies.lock().iter().map(|(_, r)| r.code()).collect()
    }
}

impl UpstreamReply for MockUpstream {
    fn reply(&self, uas_id: u32, resp: &Response) {
        self.replies.lock().push((uas_id, resp.clone()));
    }
}

/// User sink double for user-origin transactions.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<UserEvent>>,
}

impl RecordingSink {
    pub fn final_codes(&self) -> Vec<u16> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                UserEvent::Ok { code, .. } if *code >= 200 => Some(*code),
                UserEvent::Response(r) if r.code() >= 200 => Some(r.code()),
                _ => None,
            })
            .collect()
    }
}

impl UserSink for RecordingSink {
    fn deliver(&self, event: UserEvent) {
        self.events.lock().push(event);
    }
}

/// Bundles the doubles and builds Calls around them.
pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub dialog: Arc<MockDialog>,
    pub auth: Arc<MockAuth>,
    pub timers: Arc<RecordingTimers>,
    pub upstream: Arc<MockUpstream>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            transport: Arc::new(MockTransport::default()),
            dialog: Arc::new(MockDialog::default()),
            auth: Arc::new(MockAuth::default()),
            timers: Arc::new(RecordingTimers::default()),
            upstream: Arc::new(MockUpstream::default()),
        }
    }

    pub fn peers(&self) -> Peers {
        Peers {
            transport: self.transport.clone(),
            dialog: self.dialog.clone(),
            auth: self.auth.clone(),
            timers: self.timers.clone(),
            upstream: self.upstream.clone(),
            session: Arc::new(OpenGate),
        }
    }

    pub fn call(&self, call_id: &str) -> Call {
        Call::new(call_id, Config::default(), self.peers())
    }

    pub fn call_with(&self, call_id: &str, config: Config) -> Call {
        Call::new(call_id, config, self.peers())
    }
}

/// Builds a request with the usual identification headers.
pub fn request(method: Method, uri: &str, call_id: &str) -> Request {
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/UDP client.example.com;branch=z9hG4bKup");
    headers.push("From", "<sip:alice@example.com>;tag=feedface");
    headers.push("To", "<sip:bob@example.com>");
    headers.push("Call-ID", call_id);
    headers.push("CSeq", format!("20 {}", method.as_str()));
    headers.push("Max-Forwards", "70");
    Request::new(
        RequestLine::new(method, SipUri::parse(uri).unwrap()),
        headers,
        Bytes::new(),
    )
}

pub fn invite(uri: &str, call_id: &str) -> Request {
    request(Method::Invite, uri, call_id)
}

pub fn uas(id: u32, req: Request) -> UasTrans {
    UasTrans { id, request: req }
}

/// Builds the wire response a peer would send for a previously sent
/// request: same Vias, Call-ID and CSeq, the peer's tag on To.
pub fn response_for(req: &Request, code: u16, to_tag: &str) -> Response {
    let mut headers = Headers::new();
    for via in req.headers.get_all("Via") {
        headers.push("Via", via.clone());
    }
    if let Some(from) = req.headers.get("From") {
        headers.push("From", from.clone());
    }
    if let Some(to) = req.headers.get("To") {
        let value = if to_tag.is_empty() || to.contains(";tag=") {
            to.clone()
        } else {
            SmolStr::new(format!("{};tag={}", to, to_tag))
        };
        headers.push("To", value);
    }
    if let Some(call_id) = req.headers.get("Call-ID") {
        headers.push("Call-ID", call_id.clone());
    }
    if let Some(cseq) = req.headers.get("CSeq") {
        headers.push("CSeq", cseq.clone());
    }
    Response::new(StatusLine::new(code, "Test"), headers, Bytes::new())
}

/// Adds a header to a response, builder style.
pub fn with_header(mut resp: Response, name: &str, value: &str) -> Response {
    resp.headers
        .push(SmolStr::new(name.to_owned()), SmolStr::new(value.to_owned()));
    resp
}
