// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Destination normalization.
//!
//! Callers describe where a request should go in whatever shape is handy: a
//! single URI, a comma-separated string, a flat list, or a nested list where
//! inner lists are parallel groups. The router only ever sees the canonical
//! form: serial groups of parallel URIs.

use prism_core::{parse_uri_list, SipUri};
use smol_str::SmolStr;

/// Heterogeneous destination description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dest {
    Uri(SipUri),
    /// One URI or a comma-separated list in textual form.
    Raw(SmolStr),
    /// A flat list is one parallel group; a nested list is serial groups.
    List(Vec<Dest>),
}

impl From<SipUri> for Dest {
    fn from(uri: SipUri) -> Self {
        Dest::Uri(uri)
    }
}

impl From<&str> for Dest {
    fn from(raw: &str) -> Self {
        Dest::Raw(SmolStr::new(raw.to_owned()))
    }
}

impl From<Vec<SipUri>> for Dest {
    fn from(uris: Vec<SipUri>) -> Self {
        Dest::List(uris.into_iter().map(Dest::Uri).collect())
    }
}

/// Canonical destination set: outer list is serial order, each inner list is
/// attempted in parallel.
pub type UriSet = Vec<Vec<SipUri>>;

/// Normalizes a destination description. Never fails: unparseable strings
/// contribute nothing, and a fully empty result is `[[]]`, which the router
/// reads as "no destinations".
pub fn normalize(dest: &Dest) -> UriSet {
    let mut groups: Vec<Vec<SipUri>> = Vec::new();
    match dest {
        Dest::Uri(_) | Dest::Raw(_) => {
            let group = scalar_uris(dest);
            if !group.is_empty() {
                groups.push(group);
            }
        }
        Dest::List(items) => {
            if items.iter().any(|i| matches!(i, Dest::List(_))) {
                // Multi-group form: nested lists become groups, scalar runs
                // coalesce into their own group in position.
                let mut run: Vec<SipUri> = Vec::new();
                for item in items {
                    match item {
                        Dest::List(inner) => {
                            if !run.is_empty() {
                                groups.push(std::mem::take(&mut run));
                            }
                            let group: Vec<SipUri> =
                                inner.iter().flat_map(scalar_uris).collect();
                            if !group.is_empty() {
                                groups.push(group);
                            }
                        }
                        scalar => run.extend(scalar_uris(scalar)),
                    }
                }
                if !run.is_empty() {
                    groups.push(run);
                }
            } else {
                let group: Vec<SipUri> = items.iter().flat_map(scalar_uris).collect();
                if !group.is_empty() {
                    groups.push(group);
                }
            }
        }
    }
    if groups.is_empty() {
        groups.push(Vec::new());
    }
    groups
}

/// Turns a canonical set back into a `Dest`, for idempotence checks and for
/// callers that stash a normalized set.
pub fn as_dest(set: &UriSet) -> Dest {
    Dest::List(
        set.iter()
            .map(|group| Dest::List(group.iter().cloned().map(Dest::Uri).collect()))
            .collect(),
    )
}

fn scalar_uris(dest: &Dest) -> Vec<SipUri> {
    let mut uris = match dest {
        Dest::Uri(uri) => vec![uri.clone()],
        Dest::Raw(raw) => parse_uri_list(raw),
        // Nested lists are handled by the caller; a list reaching here is
        // flattened into the surrounding group.
        Dest::List(items) => items.iter().flat_map(scalar_uris).collect(),
    };
    for uri in &mut uris {
        uri.strip_transport_artifacts();
    }
    uris
}
