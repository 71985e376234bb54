// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reply adapter: turns internal transaction outcomes into the single event
//! shape a user-origin caller sees. Fork origins never pass through here;
//! their responses feed straight back into the fork controller.

use std::sync::Arc;

use prism_core::{Reject, Request, Response};
use smol_str::SmolStr;

use crate::{options::Opts, ForkId};

/// Where a downstream transaction came from, and therefore where its outcome
/// must be routed. Forks are referenced by id, never by pointer.
#[derive(Clone, Default)]
pub enum Origin {
    /// Fire-and-forget (locally originated CANCELs).
    #[default]
    None,
    /// A user call; the sink receives the outcome events.
    User(Arc<dyn UserSink>),
    /// A branch of the identified fork.
    Fork(ForkId),
}

impl Origin {
    pub fn is_fork(&self) -> bool {
        matches!(self, Origin::Fork(_))
    }
}

impl std::fmt::Debug for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::None => f.write_str("None"),
            Origin::User(_) => f.write_str("User"),
            Origin::Fork(id) => write!(f, "Fork({})", id),
        }
    }
}

/// The one event shape user-origin callers receive, regardless of which
/// reply-shaping options they picked.
#[derive(Debug, Clone)]
pub enum UserEvent {
    /// The request as sent (`get_request`).
    Request(Request),
    /// A full response (`get_response`, or any provisional).
    Response(Response),
    /// A local failure before or instead of a response.
    Error(Reject),
    /// Status summary: code plus any requested `fields`, and the async
    /// acknowledgement (code 100 with the message id).
    Ok {
        code: u16,
        fields: Vec<(SmolStr, SmolStr)>,
    },
}

/// Receiver of user-origin outcomes.
pub trait UserSink: Send + Sync {
    fn deliver(&self, event: UserEvent);
}

impl<F: Fn(UserEvent) + Send + Sync> UserSink for F {
    fn deliver(&self, event: UserEvent) {
        self(event)
    }
}

/// Computes the event for a response once from the options, then hands it to
/// the sink. `None` origins drop the outcome.
pub fn deliver_response(origin: &Origin, resp: &Response, opts: &Opts) {
    let Origin::User(sink) = origin else {
        return;
    };
    let event = if opts.get_response || resp.code() < 200 {
        UserEvent::Response(resp.clone())
    } else {
        UserEvent::Ok {
            code: resp.code(),
            fields: extract_fields(resp, &opts.fields),
        }
    };
    sink.deliver(event);
}

/// Routes a local failure to a user origin.
pub fn deliver_error(origin: &Origin, reject: Reject) {
    if let Origin::User(sink) = origin {
        sink.deliver(UserEvent::Error(reject));
    }
}

/// Immediate acknowledgement for `async_reply` callers: the transaction is
/// on its way, identified by `msg_id` when there is something to wait for.
pub fn acknowledge_async(origin: &Origin, msg_id: Option<&SmolStr>) {
    if let Origin::User(sink) = origin {
        let fields = msg_id
            .map(|id| vec![(SmolStr::new("message-id"), id.clone())])
            .unwrap_or_default();
        sink.deliver(UserEvent::Ok { code: 100, fields });
    }
}

/// Hands the sent request back to `get_request` callers.
pub fn deliver_request(origin: &Origin, req: &Request, opts: &Opts) {
    if !opts.get_request {
        return;
    }
    if let Origin::User(sink) = origin {
        sink.deliver(UserEvent::Request(req.clone()));
    }
}

fn extract_fields(resp: &Response, names: &[SmolStr]) -> Vec<(SmolStr, SmolStr)> {
    names
        .iter()
        .filter_map(|name| {
            resp.headers
                .get(name.as_str())
                .map(|v| (name.clone(), v.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use prism_core::{Headers, StatusLine};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<UserEvent>>,
    }

    impl UserSink for Recorder {
        fn deliver(&self, event: UserEvent) {
            self.events.lock().push(event);
        }
    }

    fn response(code: u16) -> Response {
        let mut headers = Headers::new();
        headers.push("Contact", "<sip:c@h>");
        Response::new(StatusLine::new(code, "X"), headers, Bytes::new())
    }

    #[test]
    fn summary_by_default_full_response_on_request() {
        let sink = Arc::new(Recorder::default());
        let origin = Origin::User(sink.clone());

        deliver_response(&origin, &response(486), &Opts::default());
        let mut opts = Opts::default();
        opts.get_response = true;
        deliver_response(&origin, &response(486), &opts);

        let events = sink.events.lock();
        assert!(matches!(events[0], UserEvent::Ok { code: 486, .. }));
        assert!(matches!(events[1], UserEvent::Response(_)));
    }

    #[test]
    fn provisionals_always_deliver_the_response() {
        let sink = Arc::new(Recorder::default());
        deliver_response(&Origin::User(sink.clone()), &response(180), &Opts::default());
        assert!(matches!(sink.events.lock()[0], UserEvent::Response(_)));
    }

    #[test]
    fn requested_fields_are_extracted() {
        let sink = Arc::new(Recorder::default());
        let mut opts = Opts::default();
        opts.fields = vec![SmolStr::new("Contact"), SmolStr::new("Warning")];
        deliver_response(&Origin::User(sink.clone()), &response(200), &opts);

        let events = sink.events.lock();
        let UserEvent::Ok { code, fields } = &events[0] else {
            panic!("expected summary");
        };
        assert_eq!(*code, 200);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0.as_str(), "Contact");
    }

    #[test]
    fn none_origin_swallows_everything() {
        deliver_response(&Origin::None, &response(200), &Opts::default());
        deliver_error(&Origin::None, Reject::InternalError);
        acknowledge_async(&Origin::None, None);
    }
}
