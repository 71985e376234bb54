// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-call registry: one Call per Call-ID, each mutated under its own
//! lock. Parallelism exists only across Call-IDs; within a Call every event
//! is serialized.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use prism_core::Response;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    call::{Call, Config},
    stateless,
    timer::TimerKey,
    traits::Peers,
};

/// Owns every live Call of one application.
pub struct CallRegistry {
    config: Config,
    peers: Peers,
    calls: DashMap<SmolStr, Arc<Mutex<Call>>>,
}

impl CallRegistry {
    pub fn new(config: Config, peers: Peers) -> Self {
        Self {
            config,
            peers,
            calls: DashMap::new(),
        }
    }

    /// The Call for `call_id`, created on first use.
    pub fn call(&self, call_id: &SmolStr) -> Arc<Mutex<Call>> {
        self.calls
            .entry(call_id.clone())
            .or_insert_with(|| {
                debug!(%call_id, "creating call");
                Arc::new(Mutex::new(Call::new(
                    call_id.clone(),
                    self.config.clone(),
                    self.peers.clone(),
                )))
            })
            .clone()
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<Mutex<Call>>> {
        self.calls.get(call_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Routes an inbound response: to its transaction when one matches,
    /// through the stateless relay otherwise.
    pub fn on_response(&self, resp: Response) {
        let matched = resp
            .call_id()
            .and_then(|call_id| self.get(call_id))
            .filter(|call| call.lock().matches_response(&resp));
        match matched {
            Some(call) => call.lock().uac_response(resp),
            None => stateless::relay_response(self.peers.transport.as_ref(), &resp),
        }
    }

    /// Delivers a timer fire into its Call. Fires for pruned calls are
    /// dropped.
    pub fn on_timer(&self, key: TimerKey) {
        if let Some(call) = self.get(&key.call_id) {
            call.lock().uac_timer(key.kind, key.trans);
        }
    }

    /// Runs garbage passes over every Call and drops the empty ones.
    pub fn prune(&self) {
        self.calls.retain(|_, call| !call.lock().garbage());
    }

    /// Drains timer fires into the registry. Spawn this next to whatever
    /// feeds `TokioTimers`.
    pub async fn run_timers(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<TimerKey>) {
        while let Some(key) = rx.recv().await {
            self.on_timer(key);
        }
    }
}
