//! Terminal stand-in for the device authentication prompt.
//!
//! Asks for a confirmation on stderr/stdin. A `y` counts as a successful
//! gesture and unlocks the software key; an empty answer or `n` cancels; any
//! other answer is a failed attempt.

use std::io::{BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use hdvault_keystore::{AuthOutcome, AuthPromptSurface, AuthRequest, GateKind, SoftwareKeyProvisioner};

pub struct TerminalPrompt {
    keys: Arc<SoftwareKeyProvisioner>,
}

impl TerminalPrompt {
    pub fn new(keys: Arc<SoftwareKeyProvisioner>) -> Self {
        Self { keys }
    }
}

fn read_answer(question: String) -> std::io::Result<String> {
    let mut stderr = std::io::stderr().lock();
    write!(stderr, "{}", question)?;
    stderr.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_lowercase())
}

#[async_trait]
impl AuthPromptSurface for TerminalPrompt {
    async fn present(&self, request: AuthRequest) -> AuthOutcome {
        let gesture = match request.kind {
            GateKind::LockScreen => "device unlock",
            GateKind::Biometric => "biometric check",
        };
        let question = format!("{} ({}). Confirm? [y/N] ", request.prompt, gesture);

        let answer = match tokio::task::spawn_blocking(move || read_answer(question)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => return AuthOutcome::Failed(format!("prompt unavailable: {}", e)),
            Err(e) => return AuthOutcome::Failed(format!("prompt task failed: {}", e)),
        };

        match answer.as_str() {
            "y" | "yes" => {
                self.keys.record_authentication(&request.alias);
                if let Some(id) = request.ceremony {
                    self.keys.authorize_ceremony(id);
                }
                AuthOutcome::Unlocked
            }
            "" | "n" | "no" => AuthOutcome::Canceled,
            _ => AuthOutcome::Failed("not confirmed".to_string()),
        }
    }
}
