use std::collections::HashSet;

use {
    axum::http::Uri,
    rand::{Rng, distr::Alphanumeric},
};

use {
    chargegate_config::AuthConfig,
    chargegate_protocol::{AUTH_FAILED_REASON, MISSING_IDENTITY_REASON},
};

/// Length of tokens produced by [`generate_token`].
pub const GENERATED_TOKEN_LEN: usize = 10;

// ── Credential store ─────────────────────────────────────────────────────────

/// Answers whether a presented token is currently valid.
///
/// Queried once per connection attempt, from many admission tasks at once.
pub trait CredentialStore: Send + Sync {
    fn is_valid(&self, token: &str) -> bool;
}

/// Fixed token set, populated at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    tokens: HashSet<String>,
}

impl StaticCredentialStore {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.is_empty())
                .collect(),
        }
    }

    /// Build the store from config plus a comma-separated env list, generating
    /// `auth.generate` random tokens on top. Returns the generated tokens so
    /// the caller can announce them.
    pub fn seed(auth: &AuthConfig, env_tokens: Option<&str>) -> (Self, Vec<String>) {
        let generated: Vec<String> = (0..auth.generate).map(|_| generate_token()).collect();
        let from_env = env_tokens
            .into_iter()
            .flat_map(|list| list.split(','))
            .map(str::trim)
            .map(str::to_string);
        let store = Self::new(
            auth.tokens
                .iter()
                .cloned()
                .chain(from_env)
                .chain(generated.iter().cloned()),
        );
        (store, generated)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl CredentialStore for StaticCredentialStore {
    fn is_valid(&self, token: &str) -> bool {
        // Compare against every entry so timing does not reveal which matched.
        self.tokens
            .iter()
            .fold(false, |found, known| found | safe_equal(known, token))
    }
}

/// Random alphanumeric token.
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

// ── Admission request ────────────────────────────────────────────────────────

/// What a station asked for when it opened the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub path: String,
    pub token: Option<String>,
}

impl AdmissionRequest {
    pub fn from_uri(uri: &Uri) -> Self {
        Self::from_parts(uri.path(), uri.query())
    }

    /// Parse `"/station-7?token=TOKEN123"` style targets.
    pub fn parse(target: &str) -> Self {
        match target.split_once('?') {
            Some((path, query)) => Self::from_parts(path, Some(query)),
            None => Self::from_parts(target, None),
        }
    }

    fn from_parts(path: &str, query: Option<&str>) -> Self {
        let token = query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
        });
        Self {
            path: path.to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Final non-empty path segment.
    pub fn identity(&self) -> Option<&str> {
        self.path.rsplit('/').find(|segment| !segment.is_empty())
    }
}

// ── Rejection ────────────────────────────────────────────────────────────────

/// Why a connection was refused. The reason text goes out as the close reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("{}", AUTH_FAILED_REASON)]
    InvalidToken,
    #[error("{}", MISSING_IDENTITY_REASON)]
    MissingIdentity,
}

impl Rejection {
    pub fn reason(self) -> &'static str {
        match self {
            Self::InvalidToken => AUTH_FAILED_REASON,
            Self::MissingIdentity => MISSING_IDENTITY_REASON,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_answers_membership() {
        let store = StaticCredentialStore::new(["TOKEN123", "abc"]);
        assert!(store.is_valid("TOKEN123"));
        assert!(store.is_valid("abc"));
        assert!(!store.is_valid("TOKEN12"));
        assert!(!store.is_valid(""));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn empty_tokens_are_never_stored() {
        let store = StaticCredentialStore::new(["", "x"]);
        assert_eq!(store.len(), 1);
        assert!(!store.is_valid(""));
    }

    #[test]
    fn repeated_invalid_checks_do_not_change_store() {
        let store = StaticCredentialStore::new(["TOKEN123"]);
        for _ in 0..100 {
            assert!(!store.is_valid("nope"));
        }
        assert_eq!(store.len(), 1);
        assert!(store.is_valid("TOKEN123"));
    }

    #[test]
    fn seed_merges_config_env_and_generated() {
        let auth = AuthConfig {
            tokens: vec!["TOKEN123".into()],
            generate: 2,
        };
        let (store, generated) = StaticCredentialStore::seed(&auth, Some("envA, envB,"));
        assert_eq!(generated.len(), 2);
        assert!(store.is_valid("TOKEN123"));
        assert!(store.is_valid("envA"));
        assert!(store.is_valid("envB"));
        for token in &generated {
            assert!(store.is_valid(token));
        }
    }

    #[test]
    fn generated_tokens_are_alphanumeric() {
        let token = generate_token();
        assert_eq!(token.len(), GENERATED_TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn parses_identity_and_token() {
        let req = AdmissionRequest::parse("/station-7?token=TOKEN123");
        assert_eq!(req.identity(), Some("station-7"));
        assert_eq!(req.token.as_deref(), Some("TOKEN123"));
    }

    #[test]
    fn identity_is_last_non_empty_segment() {
        assert_eq!(
            AdmissionRequest::parse("/ocpp/CS-01/").identity(),
            Some("CS-01")
        );
        assert_eq!(AdmissionRequest::parse("/").identity(), None);
        assert_eq!(AdmissionRequest::parse("?token=x").identity(), None);
    }

    #[test]
    fn missing_or_empty_token_is_none() {
        assert_eq!(AdmissionRequest::parse("/station-7").token, None);
        assert_eq!(AdmissionRequest::parse("/station-7?token=").token, None);
        assert_eq!(AdmissionRequest::parse("/station-7?other=1").token, None);
    }

    #[test]
    fn token_is_percent_decoded_and_first_wins() {
        let req = AdmissionRequest::parse("/s?token=a%2Bb&token=second");
        assert_eq!(req.token.as_deref(), Some("a+b"));
    }

    #[test]
    fn from_uri_matches_parse() {
        let uri: Uri = "/station-7?token=TOKEN123".parse().unwrap();
        assert_eq!(
            AdmissionRequest::from_uri(&uri),
            AdmissionRequest::parse("/station-7?token=TOKEN123")
        );
    }

    #[test]
    fn rejection_reasons_match_close_text() {
        assert_eq!(
            Rejection::InvalidToken.reason(),
            "Invalid or missing authentication token."
        );
        assert_eq!(Rejection::InvalidToken.to_string(), Rejection::InvalidToken.reason());
    }
}
