// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scripted walkthrough of the forking engine.
//!
//! Wires a Call registry with tokio timers and an in-process "wire" that
//! answers each branch from a script, then proxies one INVITE across three
//! parallel destinations:
//!
//! - branch a rings and answers 200
//! - branch b rings and gets cancelled
//! - branch c is down (503)
//!
//! Usage:
//! ```bash
//! cargo run --example forking_walkthrough
//! ```

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use prism_core::{Headers, Method, Request, RequestLine, Response, SipUri, StatusLine};
use prism_engine::{
    AuthLayer, CallRegistry, Config, DialogId, DialogLayer, DialogRefusal, FlowHandle, OpenGate,
    Opts, Peers, TokioTimers, Transport, UasTrans, UpstreamReply,
};
use smol_str::SmolStr;
use tokio::sync::mpsc;

/// In-process wire: remembers what went out so the script can answer it.
#[derive(Default)]
struct ScriptedWire {
    outbound: Mutex<Vec<(Request, SipUri)>>,
}

impl Transport for ScriptedWire {
    fn send_request(
        &self,
        req: &Request,
        target: &SipUri,
        _flow: Option<&FlowHandle>,
    ) -> Result<()> {
        if target.host.as_str() == "c.example.net" {
            anyhow::bail!("host down");
        }
        println!("  --> {} {}", req.start.method, target);
        self.outbound.lock().push((req.clone(), target.clone()));
        Ok(())
    }

    fn resend_request(&self, req: &Request) -> Result<()> {
        println!("  --> {} (retransmit path)", req.start.method);
        Ok(())
    }

    fn send_response(&self, resp: &Response) -> Result<()> {
        println!("  <-- {} {}", resp.code(), resp.start.reason);
        Ok(())
    }

    fn get_connected(&self, _handle: &str) -> Option<FlowHandle> {
        None
    }

    fn is_local(&self, _uri: &SipUri) -> bool {
        false
    }

    fn is_local_route(&self, _uri: &SipUri) -> bool {
        false
    }
}

struct NoDialogs;

impl DialogLayer for NoDialogs {
    fn request(&self, _req: &Request) -> std::result::Result<(), DialogRefusal> {
        Ok(())
    }
    fn response(&self, _req: &Request, _resp: &Response) {}
    fn ack(&self, _req: &Request) {}
    fn new_local_seq(&self, _req: &Request) -> u32 {
        1
    }
    fn ack_and_bye(&self, dialog: DialogId) {
        println!("  !! tearing down secondary leg {:?}", dialog.remote_tag);
    }
}

struct NoAuth;

impl AuthLayer for NoAuth {
    fn make_request(&self, _req: &Request, _resp: &Response, _opts: &Opts) -> Option<Request> {
        None
    }
    fn update_cache(&self, _resp: &Response) {}
}

struct PrintUpstream;

impl UpstreamReply for PrintUpstream {
    fn reply(&self, uas_id: u32, resp: &Response) {
        println!("upstream[{}] <= {} {}", uas_id, resp.code(), resp.start.reason);
    }
}

fn upstream_invite() -> Request {
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/UDP caller.example.org;branch=z9hG4bKcaller1");
    headers.push("From", "<sip:alice@example.org>;tag=alice-1");
    headers.push("To", "<sip:bob@example.net>");
    headers.push("Call-ID", "walkthrough-call-1");
    headers.push("CSeq", "1 INVITE");
    headers.push("Max-Forwards", "70");
    Request::new(
        RequestLine::new(Method::Invite, SipUri::parse("sip:bob@example.net").unwrap()),
        headers,
        Bytes::new(),
    )
}

/// Builds the answer a branch peer would send for a forwarded request.
fn answer(req: &Request, code: u16, reason: &str, to_tag: &str) -> Response {
    let mut headers = Headers::new();
    for via in req.headers.get_all("Via") {
        headers.push("Via", via.clone());
    }
    for name in ["From", "Call-ID", "CSeq"] {
        if let Some(value) = req.headers.get(name) {
            headers.push(name, value.clone());
        }
    }
    let to = req.headers.get("To").cloned().unwrap_or_default();
    headers.push(
        "To",
        if to_tag.is_empty() {
            to
        } else {
            SmolStr::new(format!("{};tag={}", to, to_tag))
        },
    );
    Response::new(StatusLine::new(code, reason), headers, Bytes::new())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let wire = Arc::new(ScriptedWire::default());
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let peers = Peers {
        transport: wire.clone(),
        dialog: Arc::new(NoDialogs),
        auth: Arc::new(NoAuth),
        timers: Arc::new(TokioTimers::new(timer_tx)),
        upstream: Arc::new(PrintUpstream),
        session: Arc::new(OpenGate),
    };
    let registry = Arc::new(CallRegistry::new(Config::default(), peers));
    tokio::spawn(registry.clone().run_timers(timer_rx));

    let call_id = SmolStr::new("walkthrough-call-1");
    let call = registry.call(&call_id);

    println!("== routing INVITE to three parallel branches ==");
    call.lock().proxy_route(
        &UasTrans {
            id: 1,
            request: upstream_invite(),
        },
        &"sip:bob@a.example.net, sip:bob@b.example.net, sip:bob@c.example.net".into(),
        Opts::default(),
    );

    let branches = wire.outbound.lock().clone();
    println!("\n== branch a rings, branch b rings ==");
    for (req, _) in &branches {
        call.lock().uac_response(answer(req, 180, "Ringing", ""));
    }

    println!("\n== branch a answers ==");
    call.lock()
        .uac_response(answer(&branches[0].0, 200, "OK", "leg-a"));

    println!("\n== branch b confirms the cancel ==");
    call.lock()
        .uac_response(answer(&branches[1].0, 487, "Request Terminated", "leg-b"));

    registry.prune();
    println!("\nlive calls after prune: {}", registry.len());
}
