// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transaction and forking engine for a stateful SIP proxy.
//!
//! Drives each downstream request of a proxied operation through its full
//! client-transaction lifecycle (RFC 3261 §17.1, RFC 6026), aggregates
//! responses across parallel branches, and commits exactly one response
//! upstream (RFC 3261 §16).
//!
//! # Architecture
//!
//! ```text
//! upstream request → proxy_route → [Fork] → UAC per URI of current group
//!                         │           │            │
//!                    stateless    best-response    transaction FSM,
//!                    fast path    selection        timers, auth retry
//!                         │           │            │
//!                         └───────────┴── one response upstream
//! ```
//!
//! Everything lives in a [`Call`]: the single-owner aggregate for one
//! Call-ID. External events (inbound responses, timer fires, user calls)
//! are serialized into the Call by its owner ([`CallRegistry`] provides
//! that ownership across Call-IDs). The engine itself never awaits; wire
//! IO, dialogs, and digests sit behind the traits in [`traits`].

pub mod call;
pub mod fork;
pub mod key;
pub mod options;
pub mod registry;
pub mod reply;
pub mod router;
pub mod stateless;
pub mod timer;
pub mod traits;
pub mod uriset;

mod uac;

/// Transaction id, unique within a Call and never reused.
pub type TransId = u32;

/// Fork id; equals the upstream UAS transaction id it serves.
pub type ForkId = u32;

pub use call::{Call, Config, MsgEntry, UasTrans};
pub use fork::{best_response, rank, Final, Fork};
pub use key::TransKey;
pub use options::Opts;
pub use registry::CallRegistry;
pub use reply::{Origin, UserEvent, UserSink};
pub use router::{flow_token, RouteAction};
pub use timer::{Proto, TimerConfig, TimerHandle, TimerKey, TimerKind, TimerService, TokioTimers};
pub use traits::{
    AuthLayer, DialogId, DialogLayer, DialogRefusal, FlowHandle, Gate, OpenGate, Peers,
    SessionGate, Transport, UpstreamReply,
};
pub use uac::{CancelState, Status, UacTrans, MAX_AUTH_ITERATIONS};
pub use uriset::{normalize, Dest, UriSet};
