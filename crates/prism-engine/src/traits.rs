// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Collaborator seams the engine consumes.
//!
//! Everything the proxy core does not own (wire IO, dialog state, digest
//! computation, session-timer policy) sits behind one of these traits. The
//! traits are synchronous: the engine never awaits inline, sends report
//! success or failure immediately, and anything slow lives on the far side
//! of the seam.

use std::sync::Arc;

use anyhow::Result;
use prism_core::{Request, Response, SipUri};
use smol_str::SmolStr;

use crate::{options::Opts, timer::TimerService};

/// Opaque handle for a live inbound connection (an outbound "flow").
pub type FlowHandle = SmolStr;

/// Dialog identifier from the UAC perspective.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: SmolStr,
    pub local_tag: SmolStr,
    pub remote_tag: SmolStr,
}

impl DialogId {
    /// Derives the dialog id a response establishes, seen as UAC: the From
    /// tag is local, the To tag remote.
    pub fn from_response_uac(resp: &Response) -> Option<Self> {
        Some(Self {
            call_id: resp.call_id()?.clone(),
            local_tag: resp.from_tag()?,
            remote_tag: resp.to_tag()?,
        })
    }
}

/// Ways the dialog layer can refuse to let a request out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogRefusal {
    /// An incompatible transaction is already in progress (RFC 3261 §14.1).
    RequestPending,
    /// The request claims a dialog this node does not know.
    UnknownDialog,
}

/// Wire side of the proxy. Sends are synchronous and report success/error;
/// delivery semantics beyond that are the transport's business.
pub trait Transport: Send + Sync {
    /// Sends a request towards `target`, stamping whatever the wire needs.
    /// A pinned `flow` routes the send over that live connection instead of
    /// resolving the target (RFC 5626 §5).
    fn send_request(&self, req: &Request, target: &SipUri, flow: Option<&FlowHandle>)
        -> Result<()>;

    /// Retransmits a previously sent request over the same path, without
    /// re-stamping it (CANCEL and retransmissions use this).
    fn resend_request(&self, req: &Request) -> Result<()>;

    /// Sends a response along its Via path.
    fn send_response(&self, resp: &Response) -> Result<()>;

    /// Resolves a flow handle to a live connection, if it still exists.
    fn get_connected(&self, handle: &str) -> Option<FlowHandle>;

    /// True when the URI terminates at this application.
    fn is_local(&self, uri: &SipUri) -> bool;

    /// True when a Route URI points at this application.
    fn is_local_route(&self, uri: &SipUri) -> bool;
}

/// Dialog layer the engine notifies about traffic.
pub trait DialogLayer: Send + Sync {
    /// Offers an outgoing request to the dialog layer, which may refuse it.
    fn request(&self, req: &Request) -> std::result::Result<(), DialogRefusal>;

    /// Observes a response on an existing transaction.
    fn response(&self, req: &Request, resp: &Response);

    /// Observes an outgoing ACK.
    fn ack(&self, req: &Request);

    /// Allocates the next local CSeq for the dialog of `req`.
    fn new_local_seq(&self, req: &Request) -> u32;

    /// Detached best-effort teardown of an unwanted dialog leg: emit ACK then
    /// BYE against `dialog`, logging failures. Never blocks the caller.
    fn ack_and_bye(&self, dialog: DialogId);
}

/// Authentication side-car: challenge answers and credential caching.
pub trait AuthLayer: Send + Sync {
    /// Builds an authorized retry of `req` answering the challenge in
    /// `resp`, or `None` when no usable credentials exist.
    fn make_request(&self, req: &Request, resp: &Response, opts: &Opts) -> Option<Request>;

    /// Feeds a response into the credential cache.
    fn update_cache(&self, resp: &Response);

    /// Feeds an outgoing request (ACK) into the credential cache.
    fn update_cache_from_request(&self, _req: &Request) {}
}

/// Bridge delivering a response to the upstream UAS transaction.
pub trait UpstreamReply: Send + Sync {
    fn reply(&self, uas_id: u32, resp: &Response);
}

/// Session-timer admission verdict (RFC 4028 lives outside the core).
#[derive(Debug, Clone)]
pub enum Gate {
    Continue,
    Rewrite(Request),
    Reply(Response),
}

/// Session-timer admission hook consulted before a request is proxied.
pub trait SessionGate: Send + Sync {
    fn admit(&self, req: &Request) -> Gate;
}

/// `SessionGate` that admits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

impl SessionGate for OpenGate {
    fn admit(&self, _req: &Request) -> Gate {
        Gate::Continue
    }
}

/// The collaborator set threaded through a Call. Cloning is cheap; all
/// members are shared.
#[derive(Clone)]
pub struct Peers {
    pub transport: Arc<dyn Transport>,
    pub dialog: Arc<dyn DialogLayer>,
    pub auth: Arc<dyn AuthLayer>,
    pub timers: Arc<dyn TimerService>,
    pub upstream: Arc<dyn UpstreamReply>,
    pub session: Arc<dyn SessionGate>,
}
