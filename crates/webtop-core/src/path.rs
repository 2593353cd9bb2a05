//! Path helpers for scheme-qualified VFS paths
//!
//! VFS paths look like `home:///docs/readme.txt` (scheme + absolute path)
//! or plain absolute paths such as `/remote/x.txt`. These helpers never
//! touch the local filesystem.

use crate::error::CallError;

/// Split `scheme:///a/b` into `(Some("scheme"), "/a/b")`
pub fn split_scheme(p: &str) -> (Option<&str>, &str) {
    match p.find("://") {
        Some(i) if !p[..i].contains('/') => (Some(&p[..i]), &p[i + 3..]),
        _ => (None, p),
    }
}

fn with_scheme(scheme: Option<&str>, rest: &str) -> String {
    match scheme {
        Some(s) => format!("{}://{}", s, rest),
        None => rest.to_string(),
    }
}

/// Parent directory of a path, always ending in `/`
pub fn dirname(p: &str) -> String {
    let (scheme, rest) = split_scheme(p);
    let trimmed = rest.trim_end_matches('/');
    let dir = match trimmed.rfind('/') {
        Some(i) => &trimmed[..=i],
        None => "/",
    };
    with_scheme(scheme, dir)
}

/// Last component of a path, ignoring a trailing `/`
pub fn basename(p: &str) -> &str {
    let (_, rest) = split_scheme(p);
    let trimmed = rest.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// Append a single component to a directory path
pub fn join(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Whether `path` falls under `prefix` on a component boundary
///
/// `/home` matches `/home` and `/home/x` but not `/homework`; a prefix
/// ending in `/` matches anything that starts with it.
pub fn prefix_matches(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || !path.starts_with(prefix) {
        return false;
    }
    if prefix.ends_with('/') || path.len() == prefix.len() {
        return true;
    }
    path.as_bytes()[prefix.len()] == b'/'
}

/// Path of `path` relative to its mount prefix, always starting with `/`
pub fn mount_relative(path: &str, prefix: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}

/// Reject paths that cannot be sent to any backend
pub fn validate(p: &str) -> Result<(), CallError> {
    if p.is_empty() {
        return Err(CallError::InvalidArgument("empty path".into()));
    }
    if p.contains('\0') {
        return Err(CallError::InvalidArgument("path contains null byte".into()));
    }
    let (_, rest) = split_scheme(p);
    if rest.split('/').any(|c| c == "..") {
        return Err(CallError::InvalidArgument(format!(
            "parent directory (..) not allowed: {}",
            p
        )));
    }
    Ok(())
}
