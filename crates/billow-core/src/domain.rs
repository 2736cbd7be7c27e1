//! Browser helpers: domain extraction and browser executable detection.

use url::Url;

/// Executables treated as web browsers (compared case-insensitively).
pub const BROWSER_EXES: &[&str] = &[
    "chrome.exe",
    "msedge.exe",
    "firefox.exe",
    "brave.exe",
    "opera.exe",
    "vivaldi.exe",
];

/// Number of trailing host labels kept when extracting a domain.
const DOMAIN_LABELS: usize = 3;

/// Whether `exe` is a recognized browser.
pub fn is_browser_exe(exe: &str) -> bool {
    BROWSER_EXES
        .iter()
        .any(|browser| exe.eq_ignore_ascii_case(browser))
}

/// Extracts a coarse domain from a URL: at most the last three host labels
/// (e.g. `a.b.example.com` becomes `b.example.com`).
///
/// Returns `None` when the URL does not parse or has no host.
pub fn extract_domain(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    let labels: Vec<&str> = host.split('.').collect();
    let keep = labels.len().min(DOMAIN_LABELS);
    Some(labels[labels.len() - keep..].join(".").to_ascii_lowercase())
}
