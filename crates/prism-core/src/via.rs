// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use rand::{distributions::Alphanumeric, Rng};
use smol_str::SmolStr;

use crate::{headers::Headers, msg::Request};

/// RFC 3261 §8.1.1.7 branch magic cookie.
pub const MAGIC_COOKIE: &str = "z9hG4bK";

fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Mints an engine-unique Via branch token.
pub fn generate_branch() -> SmolStr {
    SmolStr::new(format!("{}{}", MAGIC_COOKIE, random_token(16)))
}

/// Mints a message identifier for a locally built or cloned message.
pub fn new_msg_id() -> SmolStr {
    SmolStr::new(format!("M{}", random_token(12)))
}

/// Mints a dialog tag.
pub fn new_tag() -> SmolStr {
    SmolStr::new(random_token(10))
}

/// Extracts the `branch` parameter from a Via header value.
pub fn branch_from_via(via: &str) -> Option<&str> {
    via.split(';').skip(1).find_map(|part| {
        let (name, value) = part.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("branch") {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Topmost Via value, if any.
pub fn top_via(headers: &Headers) -> Option<&SmolStr> {
    headers.get("Via")
}

/// Branch of the topmost Via.
pub fn top_branch(headers: &Headers) -> Option<SmolStr> {
    let via = top_via(headers)?;
    branch_from_via(via).map(|b| SmolStr::new(b.to_owned()))
}

/// Number of Via entries.
pub fn via_count(headers: &Headers) -> usize {
    headers.count("Via")
}

/// Prepends a Via for this hop.
pub fn push_via(req: &mut Request, host: &str, transport: &str, branch: &str) {
    let value = format!(
        "SIP/2.0/{} {};branch={}",
        transport.to_ascii_uppercase(),
        host,
        branch
    );
    req.headers.push_front("Via", value);
}

/// Removes the topmost Via, returning it.
pub fn pop_via(headers: &mut Headers) -> Option<SmolStr> {
    headers.remove_first("Via")
}
