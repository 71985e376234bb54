// prism - SIP forking proxy engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use percent_encoding::percent_decode_str;
use smol_str::SmolStr;

/// Parsed SIP or SIPS URI (RFC 3261 §19.1).
///
/// Parameters and URI-embedded headers keep their original order; the textual
/// form is regenerated on demand so the value can be freely edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    pub params: Vec<(SmolStr, Option<SmolStr>)>,
    pub headers: Vec<(SmolStr, SmolStr)>,
}

impl SipUri {
    /// Bare `sip:` URI for the given host.
    pub fn new(host: impl Into<SmolStr>) -> Self {
        Self {
            sips: false,
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Attempts to parse a SIP or SIPS URI, with or without angle brackets
    /// and a leading display name.
    pub fn parse(input: &str) -> Option<Self> {
        let bare = strip_name_addr(input.trim());
        let (scheme, rest) = bare.split_once(':')?;
        let sips = scheme.eq_ignore_ascii_case("sips");
        if !sips && !scheme.eq_ignore_ascii_case("sip") {
            return None;
        }

        let (addr_part, headers_part) = match rest.split_once('?') {
            Some((addr, headers)) => (addr, Some(headers)),
            None => (rest, None),
        };

        let mut segments = addr_part.split(';');
        let base = segments.next()?.trim();

        let mut params = Vec::new();
        for seg in segments {
            let seg = seg.trim();
            if seg.is_empty() {
                continue;
            }
            match seg.split_once('=') {
                Some((k, v)) => params.push((
                    SmolStr::new(k.trim().to_owned()),
                    Some(SmolStr::new(v.trim().to_owned())),
                )),
                None => params.push((SmolStr::new(seg.to_owned()), None)),
            }
        }

        let (user, host_port) = match base.split_once('@') {
            Some((user, host)) => (
                percent_decode_str(user.trim())
                    .decode_utf8()
                    .ok()
                    .map(|s| SmolStr::new(s.to_string())),
                host.trim(),
            ),
            None => (None, base.trim()),
        };
        if host_port.is_empty() {
            return None;
        }

        let (host, port) = split_host_port(host_port)?;
        let host = SmolStr::new(host.to_ascii_lowercase());

        let mut headers = Vec::new();
        if let Some(headers_part) = headers_part {
            for pair in headers_part.split('&') {
                if pair.is_empty() {
                    continue;
                }
                if let Some((k, v)) = pair.split_once('=') {
                    headers.push((
                        SmolStr::new(k.trim().to_owned()),
                        SmolStr::new(v.trim().to_owned()),
                    ));
                }
            }
        }

        Some(Self {
            sips,
            user,
            host,
            port,
            params,
            headers,
        })
    }

    /// Value of a URI parameter, `None` if absent. Flag parameters yield
    /// `Some(None)`.
    pub fn param(&self, name: &str) -> Option<Option<&SmolStr>> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    pub fn remove_param(&mut self, name: &str) {
        self.params.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Value of a URI-embedded header (the part after `?`).
    pub fn header(&self, name: &str) -> Option<&SmolStr> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Drops transport artifacts (`received`, `rport`) that a previous hop
    /// may have stamped; they never belong in a request-URI.
    pub fn strip_transport_artifacts(&mut self) {
        self.remove_param("received");
        self.remove_param("rport");
    }

    /// The URI as usable in a request line: same address, embedded headers
    /// dropped.
    pub fn request_target(&self) -> SipUri {
        let mut target = self.clone();
        target.headers.clear();
        target
    }

    /// Transport token for this URI: the `transport` parameter when present,
    /// otherwise UDP (TLS for `sips:`).
    pub fn transport_token(&self) -> SmolStr {
        match self.param("transport").flatten() {
            Some(v) => SmolStr::new(v.to_ascii_lowercase()),
            None if self.sips => SmolStr::new("tls"),
            None => SmolStr::new("udp"),
        }
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", if self.sips { "sips" } else { "sip" })?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (k, v) in &self.params {
            match v {
                Some(v) => write!(f, ";{}={}", k, v)?,
                None => write!(f, ";{}", k)?,
            }
        }
        for (i, (k, v)) in self.headers.iter().enumerate() {
            write!(f, "{}{}={}", if i == 0 { "?" } else { "&" }, k, v)?;
        }
        Ok(())
    }
}

/// Splits a comma-separated URI list, honoring angle brackets and quoted
/// display names, and parses each element. Unparseable elements are skipped.
pub fn parse_uri_list(input: &str) -> Vec<SipUri> {
    split_uri_list(input)
        .into_iter()
        .filter_map(|part| SipUri::parse(part))
        .collect()
}

fn split_uri_list(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0usize;
    for (i, ch) in input.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '<' if !quoted => depth += 1,
            '>' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Drops a display name and angle brackets from a name-addr form, leaving the
/// addr-spec. Parameters outside the brackets belong to the header, not the
/// URI, and are dropped with the brackets.
fn strip_name_addr(input: &str) -> &str {
    match input.find('<') {
        Some(open) => match input[open..].find('>') {
            Some(close) => &input[open + 1..open + close],
            None => &input[open + 1..],
        },
        None => input,
    }
}

fn split_host_port(input: &str) -> Option<(&str, Option<u16>)> {
    if let Some(rest) = input.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let port = match rest[end + 1..].strip_prefix(':') {
            Some(p) => Some(p.parse().ok()?),
            None => None,
        };
        return Some((host, port));
    }
    match input.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Some((host, Some(port.parse().ok()?))),
        _ => Some((input, None)),
    }
}
