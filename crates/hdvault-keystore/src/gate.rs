//! Authentication gate
//!
//! Owns the prompt surface and guarantees at most one outstanding challenge
//! per key alias. A second challenge for a busy alias is rejected with
//! [`VaultError::GateBusy`] rather than queued. There is no timeout: a pending
//! challenge ends when the user resolves it or the request's cancellation
//! token fires, which reads as [`VaultError::AuthCanceled`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::{Result, VaultError};
use crate::platform::{AuthOutcome, AuthPromptSurface, AuthRequest, GateKind};

pub struct GateCoordinator {
    surface: Arc<dyn AuthPromptSurface>,
    outstanding: Mutex<HashSet<String>>,
}

/// Marks an alias busy until dropped.
pub struct PendingChallenge<'a> {
    gate: &'a GateCoordinator,
    alias: String,
}

impl PendingChallenge<'_> {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Show the prompt for the claimed alias, then release the claim.
    pub async fn present(
        self,
        kind: GateKind,
        prompt: String,
        ceremony: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = AuthRequest {
            alias: self.alias.clone(),
            kind,
            prompt,
            ceremony,
        };
        self.gate.run(request, cancel).await
    }
}

impl Drop for PendingChallenge<'_> {
    fn drop(&mut self) {
        self.gate.outstanding().remove(&self.alias);
    }
}

impl GateCoordinator {
    pub fn new(surface: Arc<dyn AuthPromptSurface>) -> Self {
        Self {
            surface,
            outstanding: Mutex::new(HashSet::new()),
        }
    }

    /// Whether a challenge for `alias` is on screen.
    pub fn is_pending(&self, alias: &str) -> bool {
        self.outstanding().contains(alias)
    }

    fn outstanding(&self) -> MutexGuard<'_, HashSet<String>> {
        self.outstanding.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve `alias` ahead of presenting a prompt for it.
    ///
    /// Fails with [`VaultError::GateBusy`] while another claim is held.
    pub fn claim(&self, alias: &str) -> Result<PendingChallenge<'_>> {
        if !self.outstanding().insert(alias.to_string()) {
            return Err(VaultError::GateBusy(alias.to_string()));
        }
        Ok(PendingChallenge {
            gate: self,
            alias: alias.to_string(),
        })
    }

    /// Claim `request.alias`, present `request` once and map the outcome.
    pub async fn challenge(&self, request: AuthRequest, cancel: &CancellationToken) -> Result<()> {
        let _pending = self.claim(&request.alias)?;
        self.run(request, cancel).await
    }

    async fn run(&self, request: AuthRequest, cancel: &CancellationToken) -> Result<()> {
        log::debug!("Auth challenge for {} ({:?})", request.alias, request.kind);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => AuthOutcome::Canceled,
            outcome = self.surface.present(request) => outcome,
        };

        match outcome {
            AuthOutcome::Unlocked => Ok(()),
            AuthOutcome::Canceled => Err(VaultError::AuthCanceled),
            AuthOutcome::Failed(reason) => Err(VaultError::AuthFailed(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Resolves with `outcome`, optionally once `release` hands out a permit.
    struct FixedPrompt {
        outcome: AuthOutcome,
        release: Option<Arc<Semaphore>>,
        shown: AtomicUsize,
    }

    impl FixedPrompt {
        fn new(outcome: AuthOutcome) -> Self {
            Self {
                outcome,
                release: None,
                shown: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AuthPromptSurface for FixedPrompt {
        async fn present(&self, _request: AuthRequest) -> AuthOutcome {
            self.shown.fetch_add(1, Ordering::SeqCst);
            if let Some(release) = &self.release {
                release.acquire().await.unwrap().forget();
            }
            self.outcome.clone()
        }
    }

    fn request(alias: &str) -> AuthRequest {
        AuthRequest {
            alias: alias.to_string(),
            kind: GateKind::LockScreen,
            prompt: "Sign transaction".to_string(),
            ceremony: None,
        }
    }

    #[tokio::test]
    async fn test_outcomes_map_to_results() {
        let token = CancellationToken::new();

        let gate = GateCoordinator::new(Arc::new(FixedPrompt::new(AuthOutcome::Unlocked)));
        assert!(gate.challenge(request("a"), &token).await.is_ok());

        let gate = GateCoordinator::new(Arc::new(FixedPrompt::new(AuthOutcome::Canceled)));
        assert!(matches!(
            gate.challenge(request("a"), &token).await,
            Err(VaultError::AuthCanceled)
        ));

        let gate = GateCoordinator::new(Arc::new(FixedPrompt::new(AuthOutcome::Failed(
            "no match".into(),
        ))));
        assert!(matches!(
            gate.challenge(request("a"), &token).await,
            Err(VaultError::AuthFailed(_))
        ));
        assert!(!gate.is_pending("a"));
    }

    #[tokio::test]
    async fn test_second_challenge_same_alias_is_busy() {
        let release = Arc::new(Semaphore::new(0));
        let prompt = Arc::new(FixedPrompt {
            release: Some(release.clone()),
            ..FixedPrompt::new(AuthOutcome::Unlocked)
        });
        let gate = Arc::new(GateCoordinator::new(prompt.clone()));
        let token = CancellationToken::new();

        let first = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.challenge(request("ls"), &token).await })
        };
        while !gate.is_pending("ls") {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            gate.challenge(request("ls"), &token).await,
            Err(VaultError::GateBusy(_))
        ));

        release.add_permits(1);
        assert!(first.await.unwrap().is_ok());
        assert_eq!(prompt.shown.load(Ordering::SeqCst), 1);
        assert!(!gate.is_pending("ls"));
    }

    #[tokio::test]
    async fn test_aliases_are_independent() {
        let release = Arc::new(Semaphore::new(0));
        let prompt = Arc::new(FixedPrompt {
            release: Some(release.clone()),
            ..FixedPrompt::new(AuthOutcome::Unlocked)
        });
        let gate = Arc::new(GateCoordinator::new(prompt));
        let token = CancellationToken::new();

        let a = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.challenge(request("a"), &token).await })
        };
        let b = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.challenge(request("b"), &token).await })
        };
        while !(gate.is_pending("a") && gate.is_pending("b")) {
            tokio::task::yield_now().await;
        }

        release.add_permits(2);
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_resolves_pending_challenge() {
        let prompt = Arc::new(FixedPrompt {
            release: Some(Arc::new(Semaphore::new(0))),
            ..FixedPrompt::new(AuthOutcome::Unlocked)
        });
        let gate = Arc::new(GateCoordinator::new(prompt));
        let token = CancellationToken::new();

        let pending = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.challenge(request("a"), &token).await })
        };
        while !gate.is_pending("a") {
            tokio::task::yield_now().await;
        }

        token.cancel();
        assert!(matches!(
            pending.await.unwrap(),
            Err(VaultError::AuthCanceled)
        ));
        assert!(!gate.is_pending("a"));
    }

    #[tokio::test]
    async fn test_claim_blocks_until_released() {
        let prompt = Arc::new(FixedPrompt::new(AuthOutcome::Unlocked));
        let gate = GateCoordinator::new(prompt.clone());
        let token = CancellationToken::new();

        let pending = gate.claim("bio").unwrap();
        assert_eq!(pending.alias(), "bio");
        assert!(matches!(gate.claim("bio"), Err(VaultError::GateBusy(_))));
        assert!(matches!(
            gate.challenge(request("bio"), &token).await,
            Err(VaultError::GateBusy(_))
        ));
        assert_eq!(prompt.shown.load(Ordering::SeqCst), 0);

        pending
            .present(GateKind::Biometric, "Sign in".into(), Some(7), &token)
            .await
            .unwrap();
        assert_eq!(prompt.shown.load(Ordering::SeqCst), 1);
        assert!(!gate.is_pending("bio"));
    }
}
