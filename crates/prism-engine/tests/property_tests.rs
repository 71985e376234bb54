//! Property coverage for the pure pieces: destination normalization and
//! best-response selection.

mod common;

use bytes::Bytes;
use common::invite;
use prism_core::{Headers, Response, SipUri, StatusLine};
use prism_engine::{best_response, normalize, rank, uriset::as_dest, Dest};
use proptest::prelude::*;

fn arb_uri() -> impl Strategy<Value = String> {
    ("[a-z]{1,8}", "[a-z]{1,8}", prop::bool::ANY).prop_map(|(user, host, secure)| {
        format!("{}:{}@{}", if secure { "sips" } else { "sip" }, user, host)
    })
}

fn arb_scalar() -> BoxedStrategy<Dest> {
    prop_oneof![
        arb_uri().prop_map(|u| Dest::Uri(SipUri::parse(&u).unwrap())),
        arb_uri().prop_map(|u| Dest::Raw(u.into())),
        "[a-z ]{0,12}".prop_map(|junk| Dest::Raw(junk.into())),
    ]
    .boxed()
}

fn arb_dest() -> BoxedStrategy<Dest> {
    let group = || prop::collection::vec(arb_scalar(), 0..4).prop_map(Dest::List);
    prop_oneof![
        arb_scalar(),
        group(),
        prop::collection::vec(group(), 0..4).prop_map(Dest::List),
    ]
    .boxed()
}

fn response(code: u16, marker: usize) -> Response {
    let mut headers = Headers::new();
    headers.push("X-Arrival", marker.to_string());
    Response::new(StatusLine::new(code, "T"), headers, Bytes::new())
}

proptest! {
    /// normalize(normalize(x)) == normalize(x) under structural equality.
    #[test]
    fn normalization_is_idempotent(dest in arb_dest()) {
        let once = normalize(&dest);
        let twice = normalize(&as_dest(&once));
        prop_assert_eq!(once, twice);
    }

    /// The result is always at least one group, and empty only in the
    /// canonical no-destinations shape.
    #[test]
    fn normalization_shape(dest in arb_dest()) {
        let set = normalize(&dest);
        prop_assert!(!set.is_empty());
        if set.iter().any(|g| g.is_empty()) {
            prop_assert_eq!(set.len(), 1);
        }
    }

    /// The winner always carries the minimal rank of the set, and selection
    /// re-run on the same sequence is deterministic.
    #[test]
    fn best_response_minimizes_rank(codes in prop::collection::vec(300u16..700, 1..8)) {
        let template = invite("sip:bob@example.com", "prop-1");
        let responses: Vec<Response> = codes
            .iter()
            .enumerate()
            .map(|(i, code)| response(*code, i))
            .collect();

        let best = best_response(&template, &responses);
        let min_rank = codes.iter().map(|c| rank(*c)).min().unwrap();
        // 503 is rewritten to 500 after selection.
        let observed_rank = if best.code() == 500 && min_rank == rank(503) {
            rank(503)
        } else {
            rank(best.code())
        };
        prop_assert_eq!(observed_rank, min_rank);

        let again = best_response(&template, &responses);
        prop_assert_eq!(best.headers.get("X-Arrival"), again.headers.get("X-Arrival"));
    }

    /// Within equal rank, the earliest arrival wins.
    #[test]
    fn best_response_is_stable_by_arrival(codes in prop::collection::vec(300u16..700, 1..8)) {
        let template = invite("sip:bob@example.com", "prop-2");
        let responses: Vec<Response> = codes
            .iter()
            .enumerate()
            .map(|(i, code)| response(*code, i))
            .collect();

        let best = best_response(&template, &responses);
        let min_rank = codes.iter().map(|c| rank(*c)).min().unwrap();
        let first_with_min = codes.iter().position(|c| rank(*c) == min_rank).unwrap();
        let first_with_min_str = first_with_min.to_string();
        prop_assert_eq!(
            best.headers.get("X-Arrival").unwrap().as_str(),
            first_with_min_str.as_str()
        );
    }
}
