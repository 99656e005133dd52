//! Admin access gate.
//!
//! Exactly one identity, configured as an email address, may use the admin area. The gate
//! compares the live identity reported by an [`IdentityProvider`] with that address
//! (case-sensitively) and forces a sign-out when a signed-in identity does not match.
//!
//! The [`AdmissionCache`] only remembers who was last admitted, for display purposes. It is never
//! consulted when making a decision.

use crate::error::{ClinicError, ClinicResult};
use clinic_types::EmailAddress;
use std::future::Future;
use std::sync::{PoisonError, RwLock};

/// Identity as last reported by the provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    email: Option<String>,
    is_loaded: bool,
}

impl Identity {
    /// The provider has not finished resolving the session.
    pub fn loading() -> Self {
        Self::default()
    }

    pub fn signed_in(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            is_loaded: true,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            email: None,
            is_loaded: true,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn is_signed_in(&self) -> bool {
        self.is_loaded && self.email.is_some()
    }
}

/// True iff `identity` is loaded and its email equals `authorized_email` exactly.
pub fn is_authorized(identity: &Identity, authorized_email: &str) -> bool {
    identity.is_loaded && identity.email.as_deref() == Some(authorized_email)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Identity still loading; render nothing privileged and do nothing else.
    Pending,
    Admit,
    Deny,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("identity provider request failed: {0}")]
    Request(String),
    #[error("identity provider responded with HTTP {status}")]
    Status { status: u16 },
}

/// Source of the current identity and the sign-out action.
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> impl Future<Output = Identity> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

/// Last admitted email. Advisory only.
#[derive(Debug, Default)]
pub struct AdmissionCache {
    admitted: RwLock<Option<String>>,
}

impl AdmissionCache {
    fn record(&self, email: &str) {
        *self.admitted.write().unwrap_or_else(PoisonError::into_inner) = Some(email.to_owned());
    }

    fn clear(&self) {
        *self.admitted.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn get(&self) -> Option<String> {
        self.admitted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug)]
pub struct AccessGate {
    authorized_email: EmailAddress,
    cache: AdmissionCache,
}

impl AccessGate {
    pub fn new(authorized_email: EmailAddress) -> Self {
        Self {
            authorized_email,
            cache: AdmissionCache::default(),
        }
    }

    pub fn authorized_email(&self) -> &EmailAddress {
        &self.authorized_email
    }

    pub fn is_authorized(&self, identity: &Identity) -> bool {
        is_authorized(identity, self.authorized_email.as_str())
    }

    /// Pure decision for `identity`, with no side effects.
    pub fn evaluate(&self, identity: &Identity) -> Decision {
        if !identity.is_loaded() {
            Decision::Pending
        } else if self.is_authorized(identity) {
            Decision::Admit
        } else {
            Decision::Deny
        }
    }

    /// Decides on the provider's live identity.
    ///
    /// A signed-in identity that is not authorised is signed out once before `Deny` is
    /// returned. A failed sign-out is logged and does not change the decision.
    pub async fn admit<P: IdentityProvider>(&self, provider: &P) -> Decision {
        let identity = provider.identity().await;
        let decision = self.evaluate(&identity);

        match decision {
            Decision::Pending => {
                tracing::debug!("identity not loaded yet");
            }
            Decision::Admit => {
                self.cache.record(self.authorized_email.as_str());
            }
            Decision::Deny => {
                self.cache.clear();
                if identity.is_signed_in() {
                    tracing::warn!(
                        email = identity.email().unwrap_or_default(),
                        "unauthorised identity, signing out"
                    );
                    if let Err(e) = provider.sign_out().await {
                        tracing::error!("forced sign-out failed: {:?}", e);
                    }
                }
            }
        }

        decision
    }

    /// Like [`AccessGate::admit`] but as a guard for privileged operations.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::IdentityPending`] while the identity is still loading
    /// - [`ClinicError::Unauthorized`] on `Deny`, after the forced sign-out
    pub async fn require_admin<P: IdentityProvider>(&self, provider: &P) -> ClinicResult<()> {
        match self.admit(provider).await {
            Decision::Admit => Ok(()),
            Decision::Pending => Err(ClinicError::IdentityPending),
            Decision::Deny => Err(ClinicError::Unauthorized),
        }
    }

    /// Voluntary sign-out. The cache is cleared even if the provider call fails.
    pub async fn sign_out<P: IdentityProvider>(&self, provider: &P) -> Result<(), ProviderError> {
        self.cache.clear();
        provider.sign_out().await
    }

    /// Whether `email` was the last admitted identity. Not an authorisation check.
    pub fn cached_admission(&self, email: &str) -> bool {
        self.cache.get().as_deref() == Some(email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADMIN: &str = "admin@clinic.com";

    struct FakeProvider {
        identity: Mutex<Identity>,
        sign_outs: AtomicUsize,
        fail_sign_out: bool,
    }

    impl FakeProvider {
        fn new(identity: Identity) -> Self {
            Self {
                identity: Mutex::new(identity),
                sign_outs: AtomicUsize::new(0),
                fail_sign_out: false,
            }
        }

        fn set(&self, identity: Identity) {
            *self.identity.lock().unwrap() = identity;
        }

        fn sign_outs(&self) -> usize {
            self.sign_outs.load(Ordering::SeqCst)
        }
    }

    impl IdentityProvider for FakeProvider {
        async fn identity(&self) -> Identity {
            self.identity.lock().unwrap().clone()
        }

        async fn sign_out(&self) -> Result<(), ProviderError> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            self.set(Identity::signed_out());
            if self.fail_sign_out {
                Err(ProviderError::Status { status: 500 })
            } else {
                Ok(())
            }
        }
    }

    fn gate() -> AccessGate {
        AccessGate::new(EmailAddress::parse(ADMIN).unwrap())
    }

    #[test]
    fn authorisation_is_exact_and_case_sensitive() {
        assert!(is_authorized(&Identity::signed_in(ADMIN), ADMIN));
        assert!(!is_authorized(&Identity::signed_in("Admin@clinic.com"), ADMIN));
        assert!(!is_authorized(&Identity::signed_in("other@clinic.com"), ADMIN));
        assert!(!is_authorized(&Identity::signed_out(), ADMIN));
        assert!(!is_authorized(&Identity::loading(), ADMIN));
    }

    #[tokio::test]
    async fn authorised_identity_is_admitted() {
        let gate = gate();
        let provider = FakeProvider::new(Identity::signed_in(ADMIN));

        assert_eq!(gate.admit(&provider).await, Decision::Admit);
        assert_eq!(provider.sign_outs(), 0);
        assert!(gate.cached_admission(ADMIN));
    }

    #[tokio::test]
    async fn wrong_email_is_denied_after_one_sign_out() {
        let gate = gate();
        let provider = FakeProvider::new(Identity::signed_in("intruder@x.com"));

        assert_eq!(gate.admit(&provider).await, Decision::Deny);
        assert_eq!(provider.sign_outs(), 1);

        // Now signed out: still denied, but there is nothing left to sign out.
        assert_eq!(gate.admit(&provider).await, Decision::Deny);
        assert_eq!(provider.sign_outs(), 1);
    }

    #[tokio::test]
    async fn loading_identity_is_pending_without_side_effects() {
        let gate = gate();
        let provider = FakeProvider::new(Identity::loading());

        assert_eq!(gate.admit(&provider).await, Decision::Pending);
        assert_eq!(provider.sign_outs(), 0);
        assert!(matches!(
            gate.require_admin(&provider).await,
            Err(ClinicError::IdentityPending)
        ));
        assert_eq!(provider.sign_outs(), 0);
    }

    #[tokio::test]
    async fn failed_sign_out_still_denies() {
        let gate = gate();
        let mut provider = FakeProvider::new(Identity::signed_in("intruder@x.com"));
        provider.fail_sign_out = true;

        assert!(matches!(
            gate.require_admin(&provider).await,
            Err(ClinicError::Unauthorized)
        ));
        assert_eq!(provider.sign_outs(), 1);
    }

    #[tokio::test]
    async fn cache_never_admits_on_its_own() {
        let gate = gate();
        let provider = FakeProvider::new(Identity::signed_in(ADMIN));
        gate.require_admin(&provider).await.unwrap();
        assert!(gate.cached_admission(ADMIN));

        provider.set(Identity::loading());
        assert_eq!(gate.admit(&provider).await, Decision::Pending);

        provider.set(Identity::signed_in("intruder@x.com"));
        assert_eq!(gate.admit(&provider).await, Decision::Deny);
        assert!(!gate.cached_admission(ADMIN));
    }

    #[tokio::test]
    async fn voluntary_sign_out_clears_cache() {
        let gate = gate();
        let provider = FakeProvider::new(Identity::signed_in(ADMIN));
        gate.admit(&provider).await;

        gate.sign_out(&provider).await.unwrap();
        assert!(!gate.cached_admission(ADMIN));
        assert_eq!(provider.sign_outs(), 1);
        assert_eq!(gate.admit(&provider).await, Decision::Deny);
    }
}
