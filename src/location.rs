use crate::{Error, Result};

/// A parsed document URL.
///
/// Only the parts the harness compares are kept: origin identity for
/// messages and frames, and the full href for exact URL assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    scheme: String,
    has_authority: bool,
    hostname: String,
    port: String,
    pathname: String,
    opaque_path: String,
    search: String,
    hash: String,
}

impl Location {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let scheme_end = trimmed
            .find(':')
            .ok_or_else(|| Error::InvalidUrl(input.to_string()))?;
        let scheme = trimmed[..scheme_end].to_ascii_lowercase();
        if !is_valid_url_scheme(&scheme) {
            return Err(Error::InvalidUrl(input.to_string()));
        }
        let rest = &trimmed[scheme_end + 1..];
        if let Some(without_slashes) = rest.strip_prefix("//") {
            let authority_end = without_slashes
                .find(|ch| ['/', '?', '#'].contains(&ch))
                .unwrap_or(without_slashes.len());
            let authority = &without_slashes[..authority_end];
            let tail = &without_slashes[authority_end..];
            let (hostname, port) = split_hostname_and_port(strip_userinfo(authority));
            if hostname.is_empty() {
                return Err(Error::InvalidUrl(input.to_string()));
            }
            let (pathname, search, hash) = split_path_search_hash(tail);
            let pathname = if pathname.is_empty() {
                "/".to_string()
            } else {
                normalize_pathname(&pathname)
            };
            Ok(Self {
                port: drop_default_port(&scheme, port),
                scheme,
                has_authority: true,
                hostname: hostname.to_ascii_lowercase(),
                pathname,
                opaque_path: String::new(),
                search,
                hash,
            })
        } else {
            let (opaque_path, search, _) = split_path_search_hash(rest);
            Ok(Self {
                scheme,
                has_authority: false,
                hostname: String::new(),
                port: String::new(),
                pathname: String::new(),
                opaque_path,
                search,
                hash: String::new(),
            })
        }
    }

    pub fn protocol(&self) -> String {
        format!("{}:", self.scheme)
    }

    pub fn host(&self) -> String {
        if self.port.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    /// Serialized origin, or `"null"` for opaque URLs such as `about:blank`.
    pub fn origin(&self) -> String {
        if self.has_authority {
            format!("{}//{}", self.protocol(), self.host())
        } else {
            "null".to_string()
        }
    }

    pub fn href(&self) -> String {
        if self.has_authority {
            format!(
                "{}//{}{}{}{}",
                self.protocol(),
                self.host(),
                self.pathname,
                self.search,
                self.hash
            )
        } else {
            format!("{}{}{}", self.protocol(), self.opaque_path, self.search)
        }
    }

    pub fn same_origin(&self, other: &Location) -> bool {
        self.has_authority && other.has_authority && self.origin() == other.origin()
    }
}

/// Resolves `origin` of a raw URL string, falling back to `"null"`.
pub(crate) fn origin_of(url: &str) -> String {
    Location::parse(url)
        .map(|location| location.origin())
        .unwrap_or_else(|_| "null".to_string())
}

fn is_valid_url_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
}

fn strip_userinfo(authority: &str) -> &str {
    match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    }
}

fn split_hostname_and_port(authority: &str) -> (String, String) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some(end_idx) = rest.find(']') {
            let hostname = authority[..end_idx + 2].to_string();
            let suffix = &authority[end_idx + 2..];
            if let Some(port) = suffix.strip_prefix(':') {
                return (hostname, port.to_string());
            }
            return (hostname, String::new());
        }
    }

    if let Some(idx) = authority.rfind(':') {
        let hostname = &authority[..idx];
        let port = &authority[idx + 1..];
        if !hostname.contains(':') {
            return (hostname.to_string(), port.to_string());
        }
    }
    (authority.to_string(), String::new())
}

fn drop_default_port(scheme: &str, port: String) -> String {
    match (scheme, port.as_str()) {
        ("http" | "ws", "80") | ("https" | "wss", "443") => String::new(),
        _ => port,
    }
}

fn split_path_search_hash(tail: &str) -> (String, String, String) {
    let mut path = tail;
    let mut search = "";
    let mut hash = "";

    if let Some(hash_pos) = tail.find('#') {
        path = &tail[..hash_pos];
        hash = &tail[hash_pos..];
    }

    if let Some(search_pos) = path.find('?') {
        search = &path[search_pos..];
        path = &path[..search_pos];
    }

    (path.to_string(), search.to_string(), hash.to_string())
}

fn normalize_pathname(pathname: &str) -> String {
    let ends_with_slash = pathname.ends_with('/') && pathname.len() > 1;
    let mut parts = Vec::new();
    for segment in pathname.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            parts.pop();
            continue;
        }
        parts.push(segment);
    }
    let mut out = format!("/{}", parts.join("/"));
    if ends_with_slash && !out.ends_with('/') {
        out.push('/');
    }
    out
}
