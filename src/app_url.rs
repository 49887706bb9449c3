use std::collections::HashMap;

const COMPUTE_API_URL_KEY: &str = "COMPUTE_API_URL";
const DOMAIN_KEY: &str = "DOMAIN";
const LOCAL_DOMAIN_PREFIXES: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

fn is_local_domain(value: &str) -> bool {
    let lower = value.to_lowercase();
    LOCAL_DOMAIN_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Bare host name, optionally with a port. Anything that looks like a URL is rejected.
pub fn normalize_domain(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://")
        || trimmed.contains('/')
        || trimmed.contains('?')
        || trimmed.contains('#')
    {
        return None;
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == ':' || c == '[' || c == ']')
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// An http(s) URL without trailing slashes.
pub fn normalize_base_url(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim().trim_end_matches('/');
    let lower = trimmed.to_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))?;
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Explicit `COMPUTE_API_URL` wins; otherwise `DOMAIN` is turned into `<scheme>://<domain>/api`,
/// plain http for local hosts.
pub fn resolve_compute_base_url(settings: &HashMap<String, String>) -> Option<String> {
    if let Some(url) = normalize_base_url(settings.get(COMPUTE_API_URL_KEY).map(String::as_str)) {
        return Some(url);
    }
    let domain = normalize_domain(settings.get(DOMAIN_KEY).map(String::as_str))?;
    let scheme = if is_local_domain(&domain) {
        "http"
    } else {
        "https"
    };
    Some(format!("{}://{}/api", scheme, domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn explicit_url_wins_over_domain() {
        let map = settings(&[
            ("COMPUTE_API_URL", "https://engine.example.com/v2/"),
            ("DOMAIN", "app.example.com"),
        ]);
        assert_eq!(
            resolve_compute_base_url(&map).as_deref(),
            Some("https://engine.example.com/v2")
        );
    }

    #[test]
    fn domain_derives_scheme() {
        assert_eq!(
            resolve_compute_base_url(&settings(&[("DOMAIN", "app.example.com")])).as_deref(),
            Some("https://app.example.com/api")
        );
        assert_eq!(
            resolve_compute_base_url(&settings(&[("DOMAIN", "localhost:8000")])).as_deref(),
            Some("http://localhost:8000/api")
        );
    }

    #[test]
    fn malformed_values_are_ignored() {
        assert!(normalize_base_url(Some("ftp://x")).is_none());
        assert!(normalize_base_url(Some("https://")).is_none());
        assert!(normalize_domain(Some("https://app.example.com")).is_none());
        assert!(resolve_compute_base_url(&settings(&[("COMPUTE_API_URL", "nope")])).is_none());
    }
}
