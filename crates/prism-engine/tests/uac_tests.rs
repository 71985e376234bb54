//! Client-transaction state machine coverage: send path, receive dispatch,
//! timers, cancellation, and the authentication retry budget.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use prism_core::Method;
use prism_engine::{
    CancelState, Config, DialogRefusal, Opts, Origin, Status, TimerKind, UserEvent,
    MAX_AUTH_ITERATIONS,
};

fn user_origin() -> (Origin, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    (Origin::User(sink.clone()), sink)
}

#[test]
fn non_invite_happy_path_over_udp() {
    let h = Harness::new();
    let mut call = h.call("u-1");
    let (origin, sink) = user_origin();

    let id = call.uac_request(
        request(Method::Options, "sip:opt@ha", "u-1"),
        Opts::default(),
        origin,
    );
    assert_eq!(call.transaction(id).unwrap().status, Status::Trying);
    assert_eq!(h.timers.kinds_for(id), vec![TimerKind::F, TimerKind::E]);

    let sent = h.transport.sent_with_method(&Method::Options);
    assert_eq!(sent.len(), 1);

    call.uac_response(response_for(&sent[0], 100, ""));
    assert_eq!(call.transaction(id).unwrap().status, Status::Proceeding);

    call.uac_response(response_for(&sent[0], 200, "tag-x"));
    let trans = call.transaction(id).unwrap();
    assert_eq!(trans.status, Status::Completed);
    // The lingering transaction keeps only what retransmission absorption
    // needs.
    assert!(trans.request.body.is_empty());
    assert!(trans.response.is_none());
    assert_eq!(trans.to_tags, vec!["tag-x"]);
    assert_eq!(sink.final_codes(), vec![200]);

    // Retransmission of the final is absorbed silently.
    call.uac_response(response_for(&sent[0], 200, "tag-x"));
    assert_eq!(sink.final_codes(), vec![200]);

    call.uac_timer(TimerKind::K, id);
    assert_eq!(call.transaction(id).unwrap().status, Status::Finished);

    assert!(call.garbage());
    assert!(call.transaction(id).is_none());
}

#[test]
fn reliable_transport_skips_retransmission_and_linger() {
    let h = Harness::new();
    let mut call = h.call("u-2");
    let (origin, _sink) = user_origin();

    let id = call.uac_request(
        request(Method::Options, "sip:opt@ha;transport=tcp", "u-2"),
        Opts::default(),
        origin,
    );
    assert_eq!(h.timers.kinds_for(id), vec![TimerKind::F]);

    let sent = h.transport.sent_with_method(&Method::Options);
    call.uac_response(response_for(&sent[0], 200, "tag-x"));
    assert_eq!(call.transaction(id).unwrap().status, Status::Finished);
}

#[test]
fn invite_error_response_is_acked_exactly_once() {
    let h = Harness::new();
    let mut call = h.call("u-3");
    let (origin, sink) = user_origin();

    let id = call.uac_request(invite("sip:bob@ha", "u-3"), Opts::default(), origin);
    assert_eq!(h.timers.kinds_for(id), vec![TimerKind::B, TimerKind::A]);

    let sent = h.transport.sent_with_method(&Method::Invite);
    call.uac_response(response_for(&sent[0], 486, "tag-e"));

    let trans = call.transaction(id).unwrap();
    assert_eq!(trans.status, Status::InviteCompleted);
    // The stored request now addresses the answering leg.
    assert!(trans.request.headers.get("To").unwrap().contains("tag-e"));
    assert_eq!(h.transport.sent_with_method(&Method::Ack).len(), 1);
    assert_eq!(sink.final_codes(), vec![486]);

    // A retransmitted 486 re-triggers the ACK, nothing else.
    call.uac_response(response_for(&sent[0], 486, "tag-e"));
    assert_eq!(h.transport.sent_with_method(&Method::Ack).len(), 2);
    assert_eq!(sink.final_codes(), vec![486]);

    // Same leg, different code: ignored.
    call.uac_response(response_for(&sent[0], 480, "tag-e"));
    assert_eq!(h.transport.sent_with_method(&Method::Ack).len(), 2);
    assert_eq!(sink.final_codes(), vec![486]);

    call.uac_timer(TimerKind::D, id);
    assert_eq!(call.transaction(id).unwrap().status, Status::Finished);
}

#[test]
fn timer_b_synthesizes_408() {
    let h = Harness::new();
    let mut call = h.call("u-4");
    let (origin, sink) = user_origin();

    let id = call.uac_request(invite("sip:bob@ha", "u-4"), Opts::default(), origin);
    call.uac_timer(TimerKind::B, id);

    assert_eq!(call.transaction(id).unwrap().status, Status::Finished);
    assert_eq!(sink.final_codes(), vec![408]);
}

#[test]
fn timer_c_fires_only_while_proceeding() {
    let h = Harness::new();
    let mut call = h.call("u-5");
    let (origin, sink) = user_origin();

    let id = call.uac_request(invite("sip:bob@ha", "u-5"), Opts::default(), origin);
    let sent = h.transport.sent_with_method(&Method::Invite);
    call.uac_response(response_for(&sent[0], 183, ""));
    assert_eq!(call.transaction(id).unwrap().status, Status::InviteProceeding);

    call.uac_timer(TimerKind::C, id);
    assert_eq!(call.transaction(id).unwrap().status, Status::Finished);
    let finals = sink.final_codes();
    assert_eq!(finals, vec![408]);
}

#[test]
fn timer_e_backs_off_exponentially_up_to_t2() {
    let h = Harness::new();
    let mut call = h.call("u-6");
    let (origin, _sink) = user_origin();

    let id = call.uac_request(
        request(Method::Message, "sip:m@ha", "u-6"),
        Opts::default(),
        origin,
    );

    for _ in 0..4 {
        call.uac_timer(TimerKind::E, id);
    }
    assert_eq!(h.transport.resent.lock().len(), 4);

    let intervals: Vec<Duration> = h
        .timers
        .scheduled
        .lock()
        .iter()
        .filter(|(key, _)| key.trans == id && key.kind == TimerKind::E)
        .map(|(_, after)| *after)
        .collect();
    assert_eq!(
        intervals,
        vec![
            Duration::from_millis(500),
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(4), // capped at T2
        ]
    );
}

#[test]
fn auth_retry_spawns_authorized_successor() {
    let h = Harness::new();
    h.auth.arm();
    let mut call = h.call("u-7");
    let (origin, sink) = user_origin();

    call.uac_request(
        request(Method::Register, "sip:registrar@ha", "u-7"),
        Opts::default(),
        origin,
    );

    let sent = h.transport.sent_with_method(&Method::Register);
    call.uac_response(response_for(&sent[0], 401, "tag-r"));

    // No 401 reached the user; a credentialed retry went out instead.
    assert!(sink.final_codes().is_empty());
    let sent = h.transport.sent_with_method(&Method::Register);
    assert_eq!(sent.len(), 2);
    assert!(sent[1].headers.get("Authorization").is_some());
    // Fresh CSeq from the dialog layer, fresh branch from this node.
    assert_eq!(sent[1].cseq().unwrap().0, 1000);
    assert_ne!(
        sent[0].headers.get("Via").unwrap(),
        sent[1].headers.get("Via").unwrap()
    );

    call.uac_response(response_for(&sent[1], 200, "tag-r"));
    assert_eq!(sink.final_codes(), vec![200]);
}

#[test]
fn invite_auth_retry_goes_out_without_to_tag() {
    let h = Harness::new();
    h.auth.arm();
    let mut call = h.call("u-18");
    let (origin, sink) = user_origin();

    call.uac_request(invite("sip:bob@ha", "u-18"), Opts::default(), origin);
    let sent = h.transport.sent_with_method(&Method::Invite);
    call.uac_response(response_for(&sent[0], 407, "srv-tag"));

    // The ACK addresses the leg that answered...
    let acks = h.transport.sent_with_method(&Method::Ack);
    assert_eq!(acks.len(), 1);
    assert!(acks[0].headers.get("To").unwrap().contains("srv-tag"));

    // ...but the challenge formed no dialog, so the credentialed re-INVITE
    // is a fresh out-of-dialog request without the peer's tag.
    let sent = h.transport.sent_with_method(&Method::Invite);
    assert_eq!(sent.len(), 2);
    assert!(sent[1].headers.get("Proxy-Authorization").is_some());
    assert_eq!(sent[1].to_tag(), None);

    call.uac_response(response_for(&sent[1], 200, "srv-tag"));
    assert_eq!(sink.final_codes(), vec![200]);
}

#[test]
fn auth_retry_chain_is_capped() {
    let h = Harness::new();
    h.auth.arm();
    let mut call = h.call("u-8");
    let (origin, sink) = user_origin();

    call.uac_request(
        request(Method::Register, "sip:registrar@ha", "u-8"),
        Opts::default(),
        origin,
    );

    // The peer challenges every attempt.
    loop {
        let sent = h.transport.sent_with_method(&Method::Register);
        let last = sent.last().unwrap().clone();
        call.uac_response(response_for(&last, 401, "tag-r"));
        if !sink.final_codes().is_empty() {
            break;
        }
    }

    let attempts = h.transport.sent_with_method(&Method::Register).len();
    assert_eq!(attempts as u8, MAX_AUTH_ITERATIONS + 1);
    assert_eq!(sink.final_codes(), vec![401]);
}

#[test]
fn fork_branches_never_auth_retry() {
    let h = Harness::new();
    h.auth.arm();
    let mut call = h.call("u-9");

    call.proxy_route(
        &uas(90, invite("sip:bob@example.com", "u-9")),
        &"sip:a@ha".into(),
        Opts::default(),
    );

    let sent = h.transport.sent_with_method(&Method::Invite);
    call.uac_response(response_for(&sent[0], 401, "tag-a"));

    // The challenge went upstream for the caller to answer; no local retry.
    assert_eq!(h.transport.sent_with_method(&Method::Invite).len(), 1);
    assert_eq!(h.upstream.codes(), vec![401]);
}

#[test]
fn dialog_refusal_finishes_without_sending() {
    let h = Harness::new();
    *h.dialog.refusal.lock() = Some(DialogRefusal::RequestPending);
    let mut call = h.call("u-10");
    let (origin, sink) = user_origin();

    let id = call.uac_request(invite("sip:bob@ha", "u-10"), Opts::default(), origin);

    assert!(h.transport.sent.lock().is_empty());
    assert_eq!(call.transaction(id).unwrap().status, Status::Finished);
    assert_eq!(sink.final_codes(), vec![491]);
}

#[test]
fn expire_timer_cancels_the_invite() {
    let h = Harness::new();
    let mut call = h.call("u-11");
    let (origin, _sink) = user_origin();

    let mut req = invite("sip:bob@ha", "u-11");
    req.headers.push("Expires", "120");
    let id = call.uac_request(req, Opts::default(), origin);
    assert_eq!(
        h.timers.kinds_for(id),
        vec![TimerKind::B, TimerKind::Expire, TimerKind::A]
    );

    // Still unanswered: the expiry defers the cancel per RFC 3261 §9.1.
    call.uac_timer(TimerKind::Expire, id);
    assert_eq!(call.transaction(id).unwrap().cancel, CancelState::ToCancel);

    let sent = h.transport.sent_with_method(&Method::Invite);
    call.uac_response(response_for(&sent[0], 180, ""));
    assert_eq!(h.transport.resent_with_method(&Method::Cancel).len(), 1);
    assert_eq!(
        call.transaction(id).unwrap().cancel,
        CancelState::Cancelled
    );
}

#[test]
fn cancel_on_non_invite_is_a_noop() {
    let h = Harness::new();
    let mut call = h.call("u-12");
    let (origin, _sink) = user_origin();

    let id = call.uac_request(
        request(Method::Options, "sip:opt@ha", "u-12"),
        Opts::default(),
        origin,
    );
    call.uac_cancel(id);
    assert_eq!(call.transaction(id).unwrap().cancel, CancelState::None);
    assert!(h.transport.resent_with_method(&Method::Cancel).is_empty());
}

#[test]
fn hard_ceiling_overrides_inflight_response() {
    let h = Harness::new();
    let mut call = h.call_with(
        "u-13",
        Config {
            max_trans_time: Duration::ZERO,
            ..Config::default()
        },
    );
    let (origin, sink) = user_origin();

    call.uac_request(invite("sip:bob@ha", "u-13"), Opts::default(), origin);
    let sent = h.transport.sent_with_method(&Method::Invite);
    call.uac_response(response_for(&sent[0], 200, "tag-a"));

    assert_eq!(sink.final_codes(), vec![408]);
}

#[test]
fn async_reply_acknowledges_before_outcome() {
    let h = Harness::new();
    let mut call = h.call("u-14");
    let sink = Arc::new(RecordingSink::default());

    let mut opts = Opts::default();
    opts.async_reply = true;
    opts.callback = Some(sink.clone());

    call.uac_request(
        request(Method::Options, "sip:opt@ha", "u-14"),
        opts,
        Origin::None,
    );

    let events = sink.events.lock();
    let UserEvent::Ok { code, fields } = &events[0] else {
        panic!("expected async acknowledgement");
    };
    assert_eq!(*code, 100);
    assert_eq!(fields[0].0.as_str(), "message-id");
}

#[test]
fn transaction_ids_are_unique_and_indexed() {
    let h = Harness::new();
    let mut call = h.call("u-15");

    let a = call.uac_request(
        request(Method::Options, "sip:1@ha", "u-15"),
        Opts::default(),
        Origin::None,
    );
    let b = call.uac_request(
        request(Method::Options, "sip:2@ha", "u-15"),
        Opts::default(),
        Origin::None,
    );
    assert_ne!(a, b);

    let sent = h.transport.sent_with_method(&Method::Options);
    for req in &sent {
        let entry = call.find_msg(&req.id).expect("indexed");
        assert!(entry.trans == a || entry.trans == b);
    }
}

#[test]
fn ack_requests_notify_dialog_and_finish() {
    let h = Harness::new();
    let mut call = h.call("u-16");

    let id = call.uac_request(
        request(Method::Ack, "sip:bob@ha", "u-16"),
        Opts::default(),
        Origin::None,
    );

    assert_eq!(call.transaction(id).unwrap().status, Status::Finished);
    assert_eq!(h.dialog.acks.lock().len(), 1);
    // ACK never arms timers.
    assert!(h.timers.kinds_for(id).is_empty());
}

#[test]
fn ack_transport_error_reports_network_error() {
    let h = Harness::new();
    h.transport.fail_host("down");
    let mut call = h.call("u-17");
    let (origin, sink) = user_origin();

    call.uac_request(request(Method::Ack, "sip:bob@down", "u-17"), Opts::default(), origin);

    let events = sink.events.lock();
    assert!(matches!(
        events.last().unwrap(),
        UserEvent::Error(prism_core::Reject::NetworkError)
    ));
    assert!(h.dialog.acks.lock().is_empty());
}
