// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use smol_str::SmolStr;

use crate::reply::UserSink;

/// Option set accepted by `proxy_route` and carried on every downstream
/// transaction.
///
/// A single vocabulary covers both the router-level behaviour (forking,
/// record-routing, header edits) and the per-request behaviour (dialog
/// bypass, reply shaping), since the fork clones its options into each
/// branch it launches.
#[derive(Clone, Default)]
pub struct Opts {
    /// Proxy without keeping transaction state.
    pub stateless: bool,
    /// Insert a Record-Route header on dialog-forming requests.
    pub record_route: bool,
    /// Follow 3xx responses by launching their Contacts as a new group.
    pub follow_redirects: bool,
    /// REGISTER Path handling (RFC 3327) with outbound flows (RFC 5626).
    pub make_path: bool,
    /// Drop any pre-existing Route headers before forwarding.
    pub remove_routes: bool,
    /// Header names to drop before forwarding.
    pub remove_headers: Vec<SmolStr>,
    /// Headers to append before forwarding.
    pub headers: Vec<(SmolStr, SmolStr)>,
    /// Raw route set to prepend (each entry a URI or comma-separated list).
    pub route: Vec<SmolStr>,
    /// Pinned connection handle for outbound flows.
    pub flow: Option<SmolStr>,
    /// Do not consult the dialog layer for this request.
    pub no_dialog: bool,
    /// Force a dialog update even where one would be skipped.
    pub update_dialog: bool,
    /// Acknowledge the user immediately, before the transaction completes.
    pub async_reply: bool,
    /// Deliver the sent request back to the user.
    pub get_request: bool,
    /// Deliver full responses to the user instead of status summaries.
    pub get_response: bool,
    /// Header names to extract into status summaries.
    pub fields: Vec<SmolStr>,
    /// User sink receiving the transaction outcome.
    pub callback: Option<Arc<dyn UserSink>>,
    /// Generate a Contact on the outgoing request.
    pub make_contact: bool,
}

impl Opts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stateless(mut self) -> Self {
        self.stateless = true;
        self
    }

    pub fn record_route(mut self) -> Self {
        self.record_route = true;
        self
    }

    pub fn follow_redirects(mut self) -> Self {
        self.follow_redirects = true;
        self
    }

    pub fn make_path(mut self) -> Self {
        self.make_path = true;
        self
    }

    pub fn no_dialog(mut self) -> Self {
        self.no_dialog = true;
        self
    }

    pub fn header(mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn route(mut self, route: impl Into<SmolStr>) -> Self {
        self.route.push(route.into());
        self
    }

    pub fn callback(mut self, sink: Arc<dyn UserSink>) -> Self {
        self.callback = Some(sink);
        self
    }
}

impl std::fmt::Debug for Opts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opts")
            .field("stateless", &self.stateless)
            .field("record_route", &self.record_route)
            .field("follow_redirects", &self.follow_redirects)
            .field("make_path", &self.make_path)
            .field("remove_routes", &self.remove_routes)
            .field("no_dialog", &self.no_dialog)
            .field("async_reply", &self.async_reply)
            .field("flow", &self.flow)
            .field("callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}
