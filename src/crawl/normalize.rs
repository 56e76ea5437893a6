//! URL canonicalization
//!
//! Maps syntactically distinct but equivalent URL spellings onto one
//! canonical fingerprint so the cache and single-flight layers treat them as
//! the same resource:
//! - scheme and host lowercased, default ports elided
//! - `.`/`..` path segments resolved, repeated slashes collapsed
//! - unreserved percent-escapes decoded; an encoded `/` in the path is a
//!   segment boundary, so `/a%2Fb` and `/a/b` fingerprint identically
//! - query pairs sorted by key, then value
//! - fragment discarded
//!
//! Parsing is strict: the validation pass runs before the `url` crate sees
//! the input, so malformed ports, unclosed IPv6 brackets, bad escapes, and
//! missing schemes each fail with a stable diagnostic phrase.

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;
use url::Url;

/// Characters percent-encoded when a path segment is re-serialized.
/// Bytes above 0x7F are always encoded by `percent_encode`.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'^')
    .add(b'|')
    .add(b'\\');

/// Reasons a URL cannot be fingerprinted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("missing protocol scheme")]
    MissingScheme,
    #[error("invalid port {0:?} after host")]
    InvalidPort(String),
    #[error("missing ']' in host")]
    UnclosedBracket,
    #[error("invalid URL escape {0:?}")]
    InvalidEscape(String),
    #[error("{0}")]
    Parse(String),
}

/// Canonicalize a raw URL string into its fingerprint.
///
/// The fingerprint is used as cache and single-flight key and as the URL the
/// fetcher actually requests; the caller keeps the original string for
/// reporting. Canonical input maps to itself.
///
/// A URL with no path serializes with the root path, so `http://host` and
/// `http://host/` share a fingerprint. Parsers that keep the empty path
/// would treat those as distinct; here the coarser grouping only ever
/// coalesces more fetches onto one upstream hit.
pub fn canonicalize(raw: &str) -> Result<String, UrlError> {
    let scheme = split_scheme(raw)?;
    validate_escapes(raw)?;

    let rest = &raw[scheme.len() + 1..];
    let rewritten = match authority_of(rest) {
        Some(authority) => {
            validate_authority(authority)?;
            elide_default_port(raw, &scheme, authority)
        }
        None => raw.to_string(),
    };

    let mut url = Url::parse(&rewritten).map_err(|e| UrlError::Parse(e.to_string()))?;

    if !url.cannot_be_a_base() {
        let path = canonical_path(url.path());
        url.set_path(&path);

        let sorted_query = match url.query() {
            None | Some("") => None,
            Some(_) => {
                let mut pairs: Vec<(String, String)> = url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                pairs.sort();
                Some(
                    url::form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(pairs.iter())
                        .finish(),
                )
            }
        };
        url.set_query(sorted_query.as_deref());
    }

    url.set_fragment(None);
    Ok(url.to_string())
}

/// Extract the scheme, rejecting URLs that carry none.
///
/// A scheme starts with a letter, continues with letters, digits, `+`, `-`,
/// or `.`, and ends at the first `:`.
fn split_scheme(raw: &str) -> Result<String, UrlError> {
    for (i, b) in raw.bytes().enumerate() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' => {}
            b'0'..=b'9' | b'+' | b'-' | b'.' if i > 0 => {}
            b':' if i > 0 => return Ok(raw[..i].to_ascii_lowercase()),
            _ => return Err(UrlError::MissingScheme),
        }
    }
    Err(UrlError::MissingScheme)
}

/// The authority component of everything after `scheme:`, if present.
fn authority_of(rest: &str) -> Option<&str> {
    let after = rest.strip_prefix("//")?;
    let end = after.find(['/', '?', '#']).unwrap_or(after.len());
    Some(&after[..end])
}

/// Validate the host and port of an authority component.
fn validate_authority(authority: &str) -> Result<(), UrlError> {
    let hostport = match authority.rfind('@') {
        Some(i) => &authority[i + 1..],
        None => authority,
    };

    // A bracketed IPv6 literal must close before any port.
    let after_bracket = if hostport.starts_with('[') {
        match hostport.find(']') {
            Some(i) => &hostport[i + 1..],
            None => return Err(UrlError::UnclosedBracket),
        }
    } else {
        hostport
    };

    // Whatever follows the final colon must be a (possibly empty) port.
    if let Some(i) = after_bracket.rfind(':') {
        let colon_port = &after_bracket[i..];
        if !valid_optional_port(colon_port) {
            return Err(UrlError::InvalidPort(colon_port.to_string()));
        }
    }

    validate_host_escapes(hostport)
}

fn valid_optional_port(colon_port: &str) -> bool {
    colon_port
        .strip_prefix(':')
        .is_some_and(|port| port.bytes().all(|b| b.is_ascii_digit()))
}

/// Check that every `%` in the input begins a two-hex-digit escape.
fn validate_escapes(raw: &str) -> Result<(), UrlError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                let end = (i + 3).min(bytes.len());
                return Err(UrlError::InvalidEscape(raw[i..end].to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// In the host, percent-encoding is reserved for non-ASCII bytes; the only
/// ASCII escape admitted is `%25`.
fn validate_host_escapes(hostport: &str) -> Result<(), UrlError> {
    let bytes = hostport.as_bytes();
    let mut i = 0;
    while i + 2 < bytes.len() {
        if bytes[i] == b'%' && bytes[i + 1].is_ascii_hexdigit() && bytes[i + 2].is_ascii_hexdigit()
        {
            let escape = &hostport[i..i + 3];
            let value = u8::from_str_radix(&escape[1..], 16).unwrap_or(0);
            if value < 0x80 && !escape.eq_ignore_ascii_case("%25") {
                return Err(UrlError::InvalidEscape(escape.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Strip a scheme-default port suffix from the authority before parsing.
///
/// This works on the raw string so that a degenerate authority like
/// `host:3000:80` still coalesces with `host:3000`; the `url` crate would
/// reject the double port outright.
fn elide_default_port(raw: &str, scheme: &str, authority: &str) -> String {
    let suffix = match scheme {
        "http" => ":80",
        "https" => ":443",
        _ => return raw.to_string(),
    };
    if !authority.ends_with(suffix) {
        return raw.to_string();
    }
    let start = scheme.len() + 3;
    let end = start + authority.len();
    let mut out = String::with_capacity(raw.len() - suffix.len());
    out.push_str(&raw[..end - suffix.len()]);
    out.push_str(&raw[end..]);
    out
}

/// Lexically resolve a percent-encoded path into its canonical form.
///
/// Decoding happens before segmentation, so `%2F` becomes a real segment
/// boundary. `.` segments and empty segments (repeated or trailing slashes)
/// drop out; `..` pops, clamping at the root.
fn canonical_path(path: &str) -> String {
    let decoded: Vec<u8> = percent_decode_str(path).collect();

    let mut segments: Vec<&[u8]> = Vec::new();
    for segment in decoded.split(|&b| b == b'/') {
        match segment {
            b"" | b"." => {}
            b".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.extend(percent_encode(segment, PATH_SEGMENT));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(raw: &str) -> String {
        canonicalize(raw).unwrap()
    }

    #[test]
    fn test_missing_scheme() {
        for raw in ["://example.com", "example.com", "/relative/path", "1http://x"] {
            let err = canonicalize(raw).unwrap_err();
            assert!(
                err.to_string().contains("missing protocol scheme"),
                "{raw}: {err}"
            );
        }
    }

    #[test]
    fn test_invalid_port() {
        let err = canonicalize("http://example.com:abc").unwrap_err();
        assert!(err.to_string().contains("invalid port"), "{err}");

        let err = canonicalize("http://example.com:12x/path").unwrap_err();
        assert!(err.to_string().contains("invalid port"), "{err}");
    }

    #[test]
    fn test_unclosed_ipv6_bracket() {
        let err = canonicalize("http://[::1").unwrap_err();
        assert!(err.to_string().contains("missing ']' in host"), "{err}");
    }

    #[test]
    fn test_invalid_escape() {
        // ASCII bytes may not be percent-encoded in the host
        let err = canonicalize("http://%41").unwrap_err();
        assert!(err.to_string().contains("invalid URL escape"), "{err}");

        // Truncated escape anywhere
        let err = canonicalize("http://example.com/a%4").unwrap_err();
        assert!(err.to_string().contains("invalid URL escape"), "{err}");

        let err = canonicalize("http://example.com/a%zz").unwrap_err();
        assert!(err.to_string().contains("invalid URL escape"), "{err}");
    }

    #[test]
    fn test_non_ascii_host_escape_allowed() {
        // %C3%A9 is "é"; non-ASCII escapes are legal in the host
        assert!(canonicalize("http://ex%C3%A9mple.com/").is_ok());
    }

    #[test]
    fn test_dot_segment_resolution() {
        let root = fp("http://example.com/");
        assert_eq!(fp("http://example.com/a/.."), root);
        assert_eq!(fp("http://example.com/a/b/../.."), root);
        assert_eq!(fp("http://example.com/a/b/c/../../.."), root);
    }

    #[test]
    fn test_traversal_above_root_clamps() {
        assert_eq!(fp("http://example.com/../../x"), "http://example.com/x");
    }

    #[test]
    fn test_bare_authority_gets_root_path() {
        assert_eq!(fp("http://example.com"), fp("http://example.com/"));
    }

    #[test]
    fn test_repeated_and_trailing_slashes_collapse() {
        assert_eq!(fp("http://example.com//a///b/"), fp("http://example.com/a/b"));
    }

    #[test]
    fn test_encoded_slash_is_a_segment_boundary() {
        assert_eq!(
            fp("http://example.com/a%2Fb?1=hello&2=ohhh"),
            fp("http://example.com/a/b?2=ohhh&1=hello"),
        );
    }

    #[test]
    fn test_query_pairs_sorted() {
        assert_eq!(fp("http://e.com/p?b=2&a=1"), fp("http://e.com/p?a=1&b=2"));
        assert_ne!(fp("http://e.com/p?a=1&b=2"), fp("http://e.com/p?a=2&b=1"));
    }

    #[test]
    fn test_empty_query_dropped() {
        assert_eq!(fp("http://example.com/p?"), fp("http://example.com/p"));
    }

    #[test]
    fn test_fragment_discarded() {
        assert_eq!(fp("http://example.com/p#section"), fp("http://example.com/p"));
    }

    #[test]
    fn test_default_port_elision() {
        assert_eq!(fp("http://example.com:80/x"), fp("http://example.com/x"));
        assert_eq!(fp("https://example.com:443/x"), fp("https://example.com/x"));
        // A non-default port is kept
        assert_ne!(fp("http://example.com:8080/x"), fp("http://example.com/x"));
    }

    #[test]
    fn test_default_port_suffix_on_explicit_port() {
        assert_eq!(
            fp("http://127.0.0.1:3000:80/a/b?2=ohhh&1=hello"),
            fp("http://127.0.0.1:3000/a%2Fb?1=hello&2=ohhh"),
        );
    }

    #[test]
    fn test_scheme_and_host_lowercased() {
        assert_eq!(fp("HTTP://EXAMPLE.COM/Path"), "http://example.com/Path");
    }

    #[test]
    fn test_idempotent() {
        for raw in [
            "http://example.com/a/b/../c?z=1&a=2#frag",
            "http://example.com/a%2Fb?1=hello&2=ohhh",
            "https://user@example.com:8443//x/./y/",
            "http://example.com/a%20b?key=v%20v",
        ] {
            let once = fp(raw);
            assert_eq!(fp(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn test_bracketed_ipv6_with_port() {
        assert_eq!(fp("http://[::1]:80/x"), fp("http://[::1]/x"));
        assert!(canonicalize("http://[::1]:8080/x").is_ok());
    }
}
