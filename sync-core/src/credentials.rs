use std::sync::{Arc, PoisonError, RwLock};

/// Read access to the bearer token kept by the external auth store.
///
/// Components query this on every connect attempt and poll tick so that a
/// logout (token removed) halts network activity without further wiring.
pub trait TokenSource: Send + Sync + 'static {
    fn token(&self) -> Option<String>;
}

/// Fixed token, mostly for binaries configured from the environment.
#[derive(Clone, Debug, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token slot shared with whatever performs login/logout.
#[derive(Clone, Debug, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token)),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl TokenSource for SharedToken {
    fn token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|t| !t.trim().is_empty())
    }
}

/// Strips an optional `Bearer ` scheme so the raw token can go in a query.
pub fn bare_token(token: &str) -> &str {
    let trimmed = token.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if trimmed.eq_ignore_ascii_case("bearer") => "",
        _ => trimmed,
    }
}
