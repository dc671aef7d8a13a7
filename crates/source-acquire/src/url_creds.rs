//! Credential-embedded URL construction/stripping and the LFS URL derivation rule,
//! per the URL & credential handling component. Kept pure and synchronous so it is
//! unit-testable without any process or filesystem dependency.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::error::AcquireError;

/// RFC 3986 userinfo reserved set: `@ : / ? #` plus the generic `CONTROLS` set.
const USERINFO_ESCAPE: &AsciiSet = &CONTROLS
    .add(b'@')
    .add(b':')
    .add(b'/')
    .add(b'?')
    .add(b'#')
    .add(b' ')
    .add(b'%');

/// Embeds `username`/`password` into `url`'s userinfo component, percent-encoding
/// both per RFC 3986. Returns the literal rendered string (not just a parsed [`Url`])
/// because the literal form must be preferred over the re-serialized absolute form
/// when they diverge — e.g. a default port elided by `Url`'s serializer, which some
/// external binaries refuse to accept without the explicit port notation.
pub fn credential_embed(url: &Url, username: &str, password: &str) -> Result<String, AcquireError> {
    let encoded_user = utf8_percent_encode(username, USERINFO_ESCAPE).to_string();
    let encoded_pass = utf8_percent_encode(password, USERINFO_ESCAPE).to_string();

    let mut with_creds = url.clone();
    with_creds
        .set_username(&encoded_user)
        .map_err(|_| AcquireError::BadInput { reason: format!("url `{url}` cannot carry a username") })?;
    with_creds
        .set_password(Some(&encoded_pass))
        .map_err(|_| AcquireError::BadInput { reason: format!("url `{url}` cannot carry a password") })?;

    let rendered = with_creds.to_string();
    let literal = render_literal_with_userinfo(url, &encoded_user, &encoded_pass);
    Ok(if literal == rendered { rendered } else { literal })
}

/// Reconstructs the original URL's literal text with a `user:pass@` prefix spliced
/// in front of the host, preserving the original's explicit port (if any) exactly as
/// written rather than through `Url`'s own serializer.
fn render_literal_with_userinfo(url: &Url, username: &str, password: &str) -> String {
    let scheme = url.scheme();
    let rest = url.as_str().strip_prefix(scheme).and_then(|s| s.strip_prefix("://")).unwrap_or("");
    let authority_and_path = strip_existing_userinfo(rest);
    format!("{scheme}://{username}:{password}@{authority_and_path}")
}

fn strip_existing_userinfo(rest: &str) -> &str {
    match rest.rfind('@') {
        Some(at) => &rest[at + 1..],
        None => rest,
    }
}

/// Strips any userinfo component from `url`, returning a sanitized URL with no `@`
/// credential prefix. Used for the non-`exposeCredentials` Finalize path.
pub fn credential_strip(url: &Url) -> Result<Url, AcquireError> {
    let mut stripped = url.clone();
    stripped
        .set_username("")
        .map_err(|_| AcquireError::BadInput { reason: format!("url `{url}` cannot be sanitized") })?;
    stripped.set_password(None).ok();
    Ok(stripped)
}

/// Derives the LFS endpoint URL by string append: `/info/lfs` if the path ends in
/// `.git`, else `.git/info/lfs`. Inherited from the original implementation as-is —
/// it mishandles URLs carrying a query string or fragment, a known limitation.
pub fn derive_lfs_url(url: &str) -> String {
    if url.ends_with(".git") {
        format!("{url}/info/lfs")
    } else {
        format!("{url}.git/info/lfs")
    }
}

/// The reference-normalization rule for the checkout target when no explicit
/// `commit` is used. Idempotent: applying it twice equals applying it once.
pub fn to_remote_ref(branch: &str) -> String {
    if branch.is_empty() || branch == "master" {
        return "refs/remotes/origin/master".to_string();
    }
    if let Some(name) = branch.strip_prefix("refs/heads/") {
        return format!("refs/remotes/origin/{name}");
    }
    if let Some(rest) = branch.strip_prefix("refs/pull/") {
        return format!("refs/remotes/pull/{rest}");
    }
    if branch.starts_with("refs/remotes/origin/") || branch.starts_with("refs/remotes/pull/") {
        return branch.to_string();
    }
    branch.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_clean_credentials() {
        let url = Url::parse("https://github.com/acme/w.git").unwrap();
        let embedded = credential_embed(&url, "x", "tok").unwrap();
        let parsed = Url::parse(&embedded).unwrap();
        let stripped = credential_strip(&parsed).unwrap();
        assert_eq!(stripped.as_str(), url.as_str());
    }

    #[test]
    fn embeds_percent_encoded_reserved_characters() {
        let url = Url::parse("https://github.com/acme/w.git").unwrap();
        let embedded = credential_embed(&url, "user@corp", "p@ss:word").unwrap();
        assert!(embedded.contains("user%40corp"));
        assert!(embedded.contains("p%40ss%3Aword"));
        assert!(!embedded.contains("p@ss:word@"));
    }

    #[test]
    fn lfs_url_appends_info_lfs_for_dot_git_suffix() {
        assert_eq!(derive_lfs_url("https://github.com/acme/w.git"), "https://github.com/acme/w.git/info/lfs");
    }

    #[test]
    fn lfs_url_appends_dot_git_info_lfs_without_suffix() {
        assert_eq!(derive_lfs_url("https://github.com/acme/w"), "https://github.com/acme/w.git/info/lfs");
    }

    #[test]
    fn to_remote_ref_is_idempotent() {
        for branch in ["", "master", "refs/heads/main", "refs/pull/7/merge", "refs/tags/v1"] {
            let once = to_remote_ref(branch);
            let twice = to_remote_ref(&once);
            assert_eq!(once, twice, "not idempotent for {branch}");
        }
    }

    #[test]
    fn to_remote_ref_maps_heads_and_pull_refs() {
        assert_eq!(to_remote_ref(""), "refs/remotes/origin/master");
        assert_eq!(to_remote_ref("master"), "refs/remotes/origin/master");
        assert_eq!(to_remote_ref("refs/heads/main"), "refs/remotes/origin/main");
        assert_eq!(to_remote_ref("refs/pull/7/merge"), "refs/remotes/pull/7/merge");
        assert_eq!(to_remote_ref("refs/tags/v1"), "refs/tags/v1");
    }
}
