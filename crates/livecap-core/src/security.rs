use secrecy::{ExposeSecret, SecretString};

/// Provider API credential (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Returns `None` for a missing or blank credential.
    pub fn from_optional(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Self(SecretString::from(s.to_owned())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Replaces the value of an `apiKey` query parameter so URLs can be logged.
pub fn redact_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_owned();
    };
    let pairs: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some(("apiKey", _)) => "apiKey=[REDACTED]".to_owned(),
            _ => pair.to_owned(),
        })
        .collect();
    format!("{base}?{}", pairs.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_key_is_none() {
        assert!(ApiKey::from_optional(None).is_none());
        assert!(ApiKey::from_optional(Some("")).is_none());
        assert!(ApiKey::from_optional(Some("   ")).is_none());
    }

    #[test]
    fn key_is_trimmed_and_exposed() {
        let key = ApiKey::from_optional(Some(" secret ")).unwrap();
        assert_eq!(key.expose(), "secret");
    }

    #[test]
    fn debug_is_redacted() {
        let key = ApiKey::from_optional(Some("sk-12345")).unwrap();
        let dbg = format!("{key:?}");
        assert!(!dbg.contains("sk-12345"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn redact_url_hides_api_key() {
        let url = "wss://host/?uniqueId=someone&apiKey=topsecret";
        let redacted = redact_url(url);
        assert_eq!(redacted, "wss://host/?uniqueId=someone&apiKey=[REDACTED]");
    }

    #[test]
    fn redact_url_without_query_is_unchanged() {
        assert_eq!(redact_url("wss://host/"), "wss://host/");
    }
}
