//! Credential redaction for connection strings and free text.

use std::sync::LazyLock;

use regex::Regex;

/// `scheme://user[:password]@` userinfo in a URL. Runs to the last `@` before
/// the path so unescaped `@` in a password is covered.
static URL_USERINFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*://)[^/\s]+@").expect("valid userinfo regex")
});

/// `password=...` style key/value secrets inside free text.
static KV_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?P<key>password|passwd|pwd|secret|token)=(?P<value>[^\s;&]+)")
        .expect("valid secret regex")
});

/// Replace the userinfo part of a URL with `***@`.
#[must_use]
pub fn redact_url_credentials(url: &str) -> String {
    URL_USERINFO.replace_all(url, "${scheme}***@").into_owned()
}

/// Redact every URL userinfo and `key=secret` pair inside arbitrary text.
#[must_use]
pub fn redact_text_credentials(text: &str) -> String {
    let text = URL_USERINFO.replace_all(text, "${scheme}***@");
    KV_SECRET.replace_all(&text, "${key}=***").into_owned()
}
