//! Callback dispatch
//!
//! For hosts that can't await: each call spawns the operation on a runtime and
//! hands its result to `on_result` exactly once, from a runtime thread.

use std::future::Future;
use std::sync::Arc;

use hdvault_core::SignatureData;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::error::Result;
use crate::protection::ProtectionLevel;
use crate::vault::{AuthPrompt, DerivedAccount, HdVault, SeedIdentity};

#[derive(Clone)]
pub struct CallbackVault {
    vault: Arc<HdVault>,
    runtime: Handle,
}

impl CallbackVault {
    pub fn new(vault: Arc<HdVault>, runtime: Handle) -> Self {
        Self { vault, runtime }
    }

    pub fn vault(&self) -> &Arc<HdVault> {
        &self.vault
    }

    fn dispatch<T, Fut, C>(
        &self,
        operation: impl FnOnce(Arc<HdVault>) -> Fut,
        on_result: C,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: FnOnce(Result<T>) + Send + 'static,
    {
        let fut = operation(self.vault.clone());
        self.runtime.spawn(async move { on_result(fut.await) })
    }

    pub fn has_seed(&self, on_result: impl FnOnce(Result<bool>) + Send + 'static) -> JoinHandle<()> {
        self.dispatch(|v| async move { v.has_seed().await }, on_result)
    }

    pub fn list_seeds(
        &self,
        on_result: impl FnOnce(Result<Vec<String>>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(|v| async move { v.list_seeds().await }, on_result)
    }

    pub fn protection_level(
        &self,
        label: String,
        on_result: impl FnOnce(Result<ProtectionLevel>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(
            |v| async move { v.protection_level(&label).await },
            on_result,
        )
    }

    pub fn create_seed(
        &self,
        level: ProtectionLevel,
        on_result: impl FnOnce(Result<SeedIdentity>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(|v| async move { v.create_seed(level).await }, on_result)
    }

    pub fn import_seed(
        &self,
        level: ProtectionLevel,
        phrase: Zeroizing<String>,
        on_result: impl FnOnce(Result<SeedIdentity>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(
            |v| async move { v.import_seed(level, &phrase).await },
            on_result,
        )
    }

    pub fn delete_seed(
        &self,
        label: String,
        on_result: impl FnOnce(Result<()>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(|v| async move { v.delete_seed(&label).await }, on_result)
    }

    pub fn sign_transaction(
        &self,
        label: String,
        path: String,
        payload: Vec<u8>,
        prompt: AuthPrompt,
        on_result: impl FnOnce(Result<SignatureData>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(
            |v| async move { v.sign_transaction(&label, &path, &payload, prompt).await },
            on_result,
        )
    }

    pub fn sign_message(
        &self,
        label: String,
        path: String,
        message: Vec<u8>,
        prompt: AuthPrompt,
        on_result: impl FnOnce(Result<SignatureData>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(
            |v| async move { v.sign_message(&label, &path, &message, prompt).await },
            on_result,
        )
    }

    pub fn sign_jwt(
        &self,
        label: String,
        path: String,
        signing_input: Vec<u8>,
        prompt: AuthPrompt,
        on_result: impl FnOnce(Result<SignatureData>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(
            |v| async move { v.sign_jwt(&label, &path, &signing_input, prompt).await },
            on_result,
        )
    }

    pub fn derive_address(
        &self,
        label: String,
        path: String,
        prompt: AuthPrompt,
        on_result: impl FnOnce(Result<DerivedAccount>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(
            |v| async move { v.derive_address(&label, &path, prompt).await },
            on_result,
        )
    }

    pub fn reveal_seed_phrase(
        &self,
        label: String,
        prompt: AuthPrompt,
        on_result: impl FnOnce(Result<Zeroizing<String>>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.dispatch(
            |v| async move { v.reveal_seed_phrase(&label, prompt).await },
            on_result,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use crate::kv::MemoryKeyValueStore;
    use crate::platform::{AuthOutcome, AuthPromptSurface, AuthRequest};
    use crate::software::SoftwareKeyProvisioner;
    use crate::vault::VaultOptions;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    struct Cancels;

    #[async_trait]
    impl AuthPromptSurface for Cancels {
        async fn present(&self, _request: AuthRequest) -> AuthOutcome {
            AuthOutcome::Canceled
        }
    }

    fn callback_vault() -> CallbackVault {
        let vault = HdVault::new(
            Arc::new(SoftwareKeyProvisioner::new()),
            Arc::new(Cancels),
            Arc::new(MemoryKeyValueStore::new()),
            VaultOptions::default(),
        )
        .unwrap();
        CallbackVault::new(Arc::new(vault), Handle::current())
    }

    #[tokio::test]
    async fn test_result_delivered_once() {
        let cb = callback_vault();
        let calls = Arc::new(AtomicUsize::new(0));

        let (tx, rx) = oneshot::channel();
        let counter = calls.clone();
        cb.create_seed(ProtectionLevel::Open, move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        })
        .await
        .unwrap();
        let identity = rx.await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (tx, rx) = oneshot::channel();
        cb.list_seeds(move |result| {
            let _ = tx.send(result);
        });
        assert_eq!(rx.await.unwrap().unwrap(), vec![identity.label]);
    }

    #[tokio::test]
    async fn test_errors_are_delivered() {
        let cb = callback_vault();
        let identity = cb
            .vault()
            .create_seed(ProtectionLevel::LockScreen)
            .await
            .unwrap();

        let (tx, rx) = oneshot::channel();
        cb.sign_message(
            identity.label,
            "m/44'/60'/0'/0/0".into(),
            b"hello".to_vec(),
            "Sign".into(),
            move |result| {
                let _ = tx.send(result);
            },
        );
        assert!(matches!(rx.await.unwrap(), Err(VaultError::AuthCanceled)));
    }
}
