// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transaction timers (RFC 3261 §17) and the timer service seam.
//!
//! Timer fires never touch a transaction directly: the service posts the
//! `(call, transaction, kind)` key back to whoever owns the Call, which
//! re-resolves the target. Reliable transports zero the retransmission and
//! linger timers per RFC 3261 §17.1.2.2.

use std::time::Duration;

use prism_core::SipUri;
use smol_str::SmolStr;
use tokio::sync::{mpsc, oneshot};

use crate::TransId;

/// Transport family of a downstream branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    Udp,
    Tcp,
    Tls,
}

impl Proto {
    pub fn is_reliable(self) -> bool {
        matches!(self, Proto::Tcp | Proto::Tls)
    }

    /// Derives the transport family from a request-URI.
    pub fn for_uri(uri: &SipUri) -> Self {
        match uri.transport_token().as_str() {
            "tcp" => Proto::Tcp,
            "tls" => Proto::Tls,
            _ => Proto::Udp,
        }
    }
}

/// Client-transaction timers used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// INVITE retransmission (exponential).
    A,
    /// INVITE transaction timeout.
    B,
    /// Long-running provisional timeout.
    C,
    /// Linger in `invite_completed` (unreliable transports).
    D,
    /// Non-INVITE retransmission (exponential, capped at T2).
    E,
    /// Non-INVITE transaction timeout.
    F,
    /// Linger in `completed` (unreliable transports).
    K,
    /// Linger in `invite_accepted`, absorbing 2xx retransmissions.
    M,
    /// Request Expires ceiling; triggers CANCEL while still unanswered.
    Expire,
}

/// Key a timer fire carries back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub call_id: SmolStr,
    pub trans: TransId,
    pub kind: TimerKind,
}

/// Cancellation handle for a scheduled timer. Cancelling twice, or after the
/// fire, is a no-op.
#[derive(Debug, Default)]
pub struct TimerHandle {
    cancel: Option<oneshot::Sender<()>>,
}

impl TimerHandle {
    pub fn new(cancel: oneshot::Sender<()>) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    /// Handle that controls nothing; useful for recording test doubles.
    pub fn inert() -> Self {
        Self::default()
    }

    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

/// Schedules one-shot timers for the engine.
pub trait TimerService: Send + Sync {
    fn schedule(&self, key: TimerKey, after: Duration) -> TimerHandle;
}

/// Base timer values (RFC 3261 Table 4) plus the proxy-specific knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// RTT estimate, 500 ms by default.
    pub t1: Duration,
    /// Maximum non-INVITE retransmission interval.
    pub t2: Duration,
    /// Maximum time a message stays in the network.
    pub t4: Duration,
    /// Timer C: provisional-state ceiling for proxied INVITEs.
    pub tc: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            tc: Duration::from_secs(180),
        }
    }
}

impl TimerConfig {
    /// Initial duration for a timer on the given transport family.
    ///
    /// `Expire` has no static duration; its value comes from the request's
    /// Expires header.
    pub fn duration(&self, kind: TimerKind, proto: Proto) -> Duration {
        let reliable = proto.is_reliable();
        match kind {
            TimerKind::A | TimerKind::E => {
                if reliable {
                    Duration::ZERO
                } else {
                    self.t1
                }
            }
            TimerKind::B | TimerKind::F | TimerKind::M => self.t1.saturating_mul(64),
            TimerKind::C => self.tc,
            TimerKind::D => {
                if reliable {
                    Duration::ZERO
                } else {
                    Duration::from_secs(32)
                }
            }
            TimerKind::K => {
                if reliable {
                    Duration::ZERO
                } else {
                    self.t4
                }
            }
            TimerKind::Expire => Duration::ZERO,
        }
    }
}

/// Timer service backed by the tokio runtime. Fires are posted to the channel
/// given at construction; the receiver feeds them into the owning Call.
pub struct TokioTimers {
    tx: mpsc::UnboundedSender<TimerKey>,
}

impl TokioTimers {
    pub fn new(tx: mpsc::UnboundedSender<TimerKey>) -> Self {
        Self { tx }
    }
}

impl TimerService for TokioTimers {
    fn schedule(&self, key: TimerKey, after: Duration) -> TimerHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let fire_tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    let _ = fire_tx.send(key);
                }
                _ = cancel_rx => {}
            }
        });
        TimerHandle::new(cancel_tx)
    }
}
