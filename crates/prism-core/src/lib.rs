// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Message value types shared by the prism proxy engine.
//!
//! The engine consumes *parsed* SIP messages and never touches the wire; this
//! crate holds the plain value types those seams exchange (methods, URIs,
//! header collections, request/response pairs) plus the synthetic-response
//! builder used to materialize local rejections.

pub mod headers;
pub mod method;
pub mod msg;
pub mod reply;
pub mod uri;
pub mod via;

pub use headers::{Header, Headers};
pub use method::Method;
pub use msg::{Request, RequestLine, Response, StatusLine};
pub use reply::{reply, reply_with, Reject};
pub use uri::{parse_uri_list, SipUri};
pub use via::{branch_from_via, generate_branch, new_msg_id, new_tag, MAGIC_COOKIE};
