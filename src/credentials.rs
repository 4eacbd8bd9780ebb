// Jarvis Engine — Credential Pool
// An ordered, immutable set of API credentials read once at startup.
// Failover walks the pool in configured order; logs only ever show the
// last four characters of a key.

use std::env;
use std::fmt;

/// Environment variable slots checked at startup: `GEMINI_API_KEY_1` through
/// `GEMINI_API_KEY_5`. Absent or empty slots are skipped.
pub const CREDENTIAL_ENV_PREFIX: &str = "GEMINI_API_KEY_";

/// Maximum number of configuration slots.
pub const MAX_CREDENTIAL_SLOTS: usize = 5;

// ── Credential ─────────────────────────────────────────────────────────

/// An opaque API secret. Identity is the secret value itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Credential(secret.into())
    }

    /// The raw secret, for building requests. Never log this.
    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Last four characters of the secret, for log lines.
    pub fn last4(&self) -> &str {
        let start = self.0.len().saturating_sub(4);
        self.0.get(start..).unwrap_or("")
    }
}

// Redacted Debug so a credential can never leak through `{:?}` formatting.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(...{})", self.last4())
    }
}

// ── Pool ───────────────────────────────────────────────────────────────

/// Ordered sequence of credentials, loaded once and immutable thereafter.
/// An empty pool is valid; dependents must handle it.
#[derive(Debug, Clone, Default)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    /// Read the configured slots from the environment, preserving slot order.
    pub fn from_env() -> Self {
        Self::from_slots(
            (1..=MAX_CREDENTIAL_SLOTS)
                .map(|i| env::var(format!("{CREDENTIAL_ENV_PREFIX}{i}")).ok()),
        )
    }

    /// Build a pool from optional slot values, skipping absent/empty slots.
    pub fn from_slots(slots: impl IntoIterator<Item = Option<String>>) -> Self {
        let credentials = slots
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .map(Credential::new)
            .collect();
        CredentialPool { credentials }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.iter()
    }

    /// Position of `credential` in the pool, if configured.
    pub fn position(&self, credential: &Credential) -> Option<usize> {
        self.credentials.iter().position(|c| c == credential)
    }

    /// The credentials strictly after `credential`'s position, in pool order.
    /// A credential not present in the pool yields the whole pool — the
    /// failover walk then retries every configured key.
    pub fn after(&self, credential: &Credential) -> &[Credential] {
        match self.position(credential) {
            Some(i) => &self.credentials[i + 1..],
            None => &self.credentials[..],
        }
    }
}
