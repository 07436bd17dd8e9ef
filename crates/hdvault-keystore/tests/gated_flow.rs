//! Gated decrypt flow through the full vault.
//!
//! Uses the software provisioner and a scripted prompt surface to check:
//!
//! 1. A locked key triggers exactly one challenge, then one retry
//! 2. Cancel and failure surface as distinct errors, without a second prompt
//! 3. Biometric seeds prompt on every use
//! 4. A second request for a busy key is rejected
//! 5. A cancellation token resolves a pending prompt
//! 6. A key still locked after a successful prompt fails without a second prompt

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hdvault_keystore::{
    AuthOutcome, AuthPrompt, AuthPromptSurface, AuthRequest, GateKind, HdVault,
    MemoryKeyValueStore, ProtectionLevel, SoftwareKeyProvisioner, VaultError, VaultOptions,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const PATH: &str = "m/44'/60'/0'/0/0";

/// Plays back a queue of outcomes; `Unlocked` also unlocks the software key.
struct ScriptedPrompt {
    keys: Arc<SoftwareKeyProvisioner>,
    script: Mutex<VecDeque<AuthOutcome>>,
    seen: Mutex<Vec<AuthRequest>>,
    hold: Option<Arc<Semaphore>>,
    /// Whether `Unlocked` actually unlocks the software key
    unlocks: bool,
    shown: AtomicUsize,
}

#[async_trait]
impl AuthPromptSurface for ScriptedPrompt {
    async fn present(&self, request: AuthRequest) -> AuthOutcome {
        self.shown.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        if let Some(hold) = &self.hold {
            hold.acquire().await.unwrap().forget();
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AuthOutcome::Unlocked);
        if outcome == AuthOutcome::Unlocked && self.unlocks {
            self.keys.record_authentication(&request.alias);
            if let Some(id) = request.ceremony {
                self.keys.authorize_ceremony(id);
            }
        }
        outcome
    }
}

struct Fixture {
    keys: Arc<SoftwareKeyProvisioner>,
    prompt: Arc<ScriptedPrompt>,
    vault: Arc<HdVault>,
}

fn fixture(script: Vec<AuthOutcome>, hold: Option<Arc<Semaphore>>) -> Fixture {
    fixture_with(script, hold, true)
}

fn fixture_with(script: Vec<AuthOutcome>, hold: Option<Arc<Semaphore>>, unlocks: bool) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let keys = Arc::new(SoftwareKeyProvisioner::new());
    let prompt = Arc::new(ScriptedPrompt {
        keys: keys.clone(),
        script: Mutex::new(script.into()),
        seen: Mutex::new(Vec::new()),
        hold,
        unlocks,
        shown: AtomicUsize::new(0),
    });
    let vault = HdVault::new(
        keys.clone(),
        prompt.clone(),
        Arc::new(MemoryKeyValueStore::new()),
        VaultOptions::default(),
    )
    .unwrap();
    Fixture {
        keys,
        prompt,
        vault: Arc::new(vault),
    }
}

impl Fixture {
    fn shown(&self) -> usize {
        self.prompt.shown.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_lockscreen_unlock_then_single_retry() {
    let f = fixture(vec![AuthOutcome::Unlocked], None);
    let id = f.vault.create_seed(ProtectionLevel::LockScreen).await.unwrap();
    assert_eq!(f.shown(), 0, "creating a seed never prompts");

    let sig = f
        .vault
        .sign_message(&id.label, PATH, b"hello", "Sign message".into())
        .await
        .unwrap();
    assert!(sig.v == 27 || sig.v == 28);
    assert_eq!(f.shown(), 1);

    let seen = f.prompt.seen.lock().unwrap().clone();
    assert_eq!(seen[0].kind, GateKind::LockScreen);
    assert_eq!(seen[0].prompt, "Sign message");
    assert_eq!(seen[0].alias, "hdvault.lockscreen");
    assert_eq!(seen[0].ceremony, None);

    // The validity window is still open
    f.vault
        .derive_address(&id.label, PATH, "Derive".into())
        .await
        .unwrap();
    assert_eq!(f.shown(), 1);

    // Closing the window prompts again
    f.keys.lock("hdvault.lockscreen");
    f.vault
        .derive_address(&id.label, PATH, "Derive".into())
        .await
        .unwrap();
    assert_eq!(f.shown(), 2);
}

#[tokio::test]
async fn test_cancel_reports_canceled_without_retry() {
    let f = fixture(vec![AuthOutcome::Canceled], None);
    let id = f.vault.create_seed(ProtectionLevel::LockScreen).await.unwrap();

    let result = f
        .vault
        .reveal_seed_phrase(&id.label, "Show recovery phrase".into())
        .await;
    assert!(matches!(result, Err(VaultError::AuthCanceled)));
    assert_eq!(f.shown(), 1);
}

#[tokio::test]
async fn test_failed_gesture_reports_failed() {
    let f = fixture(vec![AuthOutcome::Failed("not recognized".into())], None);
    let id = f.vault.create_seed(ProtectionLevel::Biometric).await.unwrap();

    let result = f
        .vault
        .sign_transaction(&id.label, PATH, b"tx", "Sign transaction".into())
        .await;
    assert!(matches!(result, Err(VaultError::AuthFailed(_))));
    assert_eq!(f.shown(), 1);
}

#[tokio::test]
async fn test_biometric_prompts_every_use_with_fresh_ceremony() {
    let f = fixture(vec![], None);
    let id = f.vault.create_seed(ProtectionLevel::Biometric).await.unwrap();

    for _ in 0..2 {
        f.vault
            .sign_jwt(&id.label, PATH, b"eyJhbGciOiJFUzI1NksifQ.e30", "Sign in".into())
            .await
            .unwrap();
    }
    assert_eq!(f.shown(), 2);

    let seen = f.prompt.seen.lock().unwrap().clone();
    assert!(seen.iter().all(|r| r.kind == GateKind::Biometric));
    let first = seen[0].ceremony.unwrap();
    let second = seen[1].ceremony.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_open_seed_never_prompts() {
    let f = fixture(vec![AuthOutcome::Canceled], None);
    let id = f.vault.create_seed(ProtectionLevel::Open).await.unwrap();

    f.vault
        .reveal_seed_phrase(&id.label, "Show".into())
        .await
        .unwrap();
    f.vault
        .sign_message(&id.label, PATH, b"hi", "Sign".into())
        .await
        .unwrap();
    assert_eq!(f.shown(), 0);
}

#[tokio::test]
async fn test_invalid_path_never_prompts() {
    let f = fixture(vec![], None);
    let id = f.vault.create_seed(ProtectionLevel::Biometric).await.unwrap();

    let result = f
        .vault
        .derive_address(&id.label, "m/44'/60'/zero", "Derive".into())
        .await;
    assert!(matches!(result, Err(VaultError::InvalidPath(_))));
    assert_eq!(f.shown(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_request_for_busy_key_is_rejected() {
    let hold = Arc::new(Semaphore::new(0));
    let f = fixture(vec![], Some(hold.clone()));
    let id = f.vault.create_seed(ProtectionLevel::LockScreen).await.unwrap();

    let first = {
        let vault = f.vault.clone();
        let label = id.label.clone();
        tokio::spawn(async move {
            vault
                .sign_message(&label, PATH, b"first", "Sign".into())
                .await
        })
    };
    while f.shown() == 0 {
        tokio::task::yield_now().await;
    }

    let second = f
        .vault
        .sign_message(&id.label, PATH, b"second", "Sign".into())
        .await;
    assert!(matches!(second, Err(VaultError::GateBusy(_))));

    hold.add_permits(1);
    assert!(first.await.unwrap().is_ok());
    assert_eq!(f.shown(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_token_resolves_pending_prompt() {
    let f = fixture(vec![], Some(Arc::new(Semaphore::new(0))));
    let id = f.vault.create_seed(ProtectionLevel::Biometric).await.unwrap();
    let token = CancellationToken::new();

    let pending = {
        let vault = f.vault.clone();
        let label = id.label.clone();
        let prompt = AuthPrompt::new("Sign", token.clone());
        tokio::spawn(async move { vault.sign_message(&label, PATH, b"x", prompt).await })
    };
    while f.shown() == 0 {
        tokio::task::yield_now().await;
    }

    token.cancel();
    assert!(matches!(
        pending.await.unwrap(),
        Err(VaultError::AuthCanceled)
    ));
}

#[tokio::test]
async fn test_still_locked_after_unlock_fails_without_second_prompt() {
    let f = fixture_with(vec![], None, false);
    let id = f.vault.create_seed(ProtectionLevel::LockScreen).await.unwrap();

    let result = f
        .vault
        .sign_message(&id.label, PATH, b"hello", "Sign message".into())
        .await;
    match result {
        Err(VaultError::AuthFailed(reason)) => assert!(reason.contains("still locked")),
        other => panic!("expected AuthFailed, got {:?}", other.map(|_| ())),
    }
    assert_eq!(f.shown(), 1);

    let bio = f.vault.create_seed(ProtectionLevel::Biometric).await.unwrap();
    let result = f
        .vault
        .derive_address(&bio.label, PATH, "Derive address".into())
        .await;
    assert!(matches!(result, Err(VaultError::AuthFailed(_))));
    assert_eq!(f.shown(), 2);
    assert_eq!(f.keys.pending_ceremonies(), 0);
}
