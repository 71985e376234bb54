// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The Call: single-owner aggregate for everything alive under one Call-ID.
//!
//! Every externally driven event (inbound message, timer fire, user call)
//! is serialized into whoever owns the Call; there are no locks inside it.
//! Transactions and forks reference each other by integer id only, and timer
//! fires re-resolve their target through the Call, so no reference cycles
//! exist.

use std::time::{Duration, Instant};

use prism_core::{Request, SipUri};
use smol_str::SmolStr;

use crate::{
    fork::Fork,
    key::TransKey,
    timer::TimerConfig,
    traits::{DialogId, Peers},
    uac::{Status, UacTrans},
    ForkId, TransId,
};

/// Engine configuration for one application.
#[derive(Debug, Clone)]
pub struct Config {
    /// Application identity; part of every transaction key.
    pub app_id: SmolStr,
    /// Host placed in the Via headers this node generates.
    pub via_host: SmolStr,
    /// Extension tokens this application supports.
    pub supported: Vec<SmolStr>,
    /// Allow header advertised in capability replies.
    pub allow: SmolStr,
    /// URI inserted when record-routing is requested.
    pub record_route_uri: Option<SipUri>,
    pub timers: TimerConfig,
    /// Hard wall-clock ceiling for any single transaction.
    pub max_trans_time: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: SmolStr::new("prism"),
            via_host: SmolStr::new("localhost"),
            supported: vec![
                SmolStr::new("path"),
                SmolStr::new("outbound"),
                SmolStr::new("100rel"),
            ],
            allow: SmolStr::new(
                "INVITE, ACK, CANCEL, BYE, OPTIONS, REGISTER, UPDATE, SUBSCRIBE, NOTIFY, REFER, INFO, MESSAGE",
            ),
            record_route_uri: None,
            timers: TimerConfig::default(),
            max_trans_time: Duration::from_secs(900),
        }
    }
}

impl Config {
    pub fn supports(&self, token: &str) -> bool {
        self.supported.iter().any(|t| t.eq_ignore_ascii_case(token))
    }
}

/// The upstream server transaction a proxied request arrived on. Owned by
/// the UAS layer; the engine only needs its id and the request.
#[derive(Debug, Clone)]
pub struct UasTrans {
    pub id: u32,
    pub request: Request,
}

/// Message-index entry: message id to the transaction (and dialog, once
/// known) it belongs to. Append-only within a Call.
#[derive(Debug, Clone)]
pub struct MsgEntry {
    pub msg_id: SmolStr,
    pub trans: TransId,
    pub dialog: Option<DialogId>,
}

/// All live proxy state for one Call-ID.
pub struct Call {
    pub app_id: SmolStr,
    pub call_id: SmolStr,
    pub config: Config,
    pub(crate) peers: Peers,
    pub(crate) trans: Vec<UacTrans>,
    pub(crate) forks: Vec<Fork>,
    pub(crate) msgs: Vec<MsgEntry>,
    next: u32,
    /// Hint for the owner that the Call has gone quiet.
    pub hibernate: bool,
}

impl Call {
    pub fn new(call_id: impl Into<SmolStr>, config: Config, peers: Peers) -> Self {
        Self {
            app_id: config.app_id.clone(),
            call_id: call_id.into(),
            config,
            peers,
            trans: Vec::new(),
            forks: Vec::new(),
            msgs: Vec::new(),
            next: 0,
            hibernate: false,
        }
    }

    /// Mints the next transaction id. Ids are unique within the Call and
    /// never reused.
    pub(crate) fn next_id(&mut self) -> TransId {
        self.next += 1;
        self.next
    }

    pub(crate) fn trans_idx(&self, id: TransId) -> Option<usize> {
        self.trans.iter().position(|t| t.id == id)
    }

    pub(crate) fn trans_idx_by_key(&self, key: &TransKey) -> Option<usize> {
        self.trans.iter().position(|t| &t.key == key)
    }

    pub(crate) fn fork_idx(&self, id: ForkId) -> Option<usize> {
        self.forks.iter().position(|f| f.id == id)
    }

    /// Looks up a transaction by id.
    pub fn transaction(&self, id: TransId) -> Option<&UacTrans> {
        self.trans.iter().find(|t| t.id == id)
    }

    /// Looks up a fork by id.
    pub fn fork(&self, id: ForkId) -> Option<&Fork> {
        self.forks.iter().find(|f| f.id == id)
    }

    /// True when an inbound response matches one of this Call's client
    /// transactions.
    pub fn matches_response(&self, resp: &prism_core::Response) -> bool {
        TransKey::from_response(&self.app_id, resp)
            .and_then(|key| self.trans_idx_by_key(&key))
            .is_some()
    }

    pub(crate) fn index_msg(&mut self, msg_id: SmolStr, trans: TransId, dialog: Option<DialogId>) {
        self.msgs.push(MsgEntry {
            msg_id,
            trans,
            dialog,
        });
    }

    /// Message-index lookup for asynchronous callers.
    pub fn find_msg(&self, msg_id: &str) -> Option<&MsgEntry> {
        self.msgs.iter().find(|m| m.msg_id == msg_id)
    }

    /// Drops finished transactions and reports whether the Call is empty and
    /// can be removed by its owner.
    pub fn garbage(&mut self) -> bool {
        self.trans.retain(|t| t.status != Status::Finished);
        let empty = self.trans.is_empty() && self.forks.is_empty();
        self.hibernate = empty;
        empty
    }

    /// Elapsed lifetime of a transaction, for diagnostics.
    pub fn trans_age(&self, id: TransId) -> Option<Duration> {
        Some(Instant::now().duration_since(self.transaction(id)?.started))
    }
}
