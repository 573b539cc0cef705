//! Interactive confirmation for running assertion scripts

use std::io::IsTerminal;

use async_trait::async_trait;
use tracing::warn;

use chappie_engine::ExecutionPrompt;

pub const QUESTION: &str = "Do you want to allow assertion script execution?";

/// Asks on the terminal. Anything but an explicit yes is a decline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl ExecutionPrompt for TerminalPrompt {
    async fn confirm_assertion_execution(&self) -> bool {
        if !std::io::stdin().is_terminal() {
            warn!("stdin is not a terminal, not running assertion scripts");
            return false;
        }

        let answer = tokio::task::spawn_blocking(|| {
            dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
                .with_prompt(QUESTION)
                .default(false)
                .show_default(true)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(allowed)) => allowed,
            Ok(Err(e)) => {
                warn!("Confirmation prompt failed: {}", e);
                false
            }
            Err(e) => {
                warn!("Confirmation prompt task failed: {}", e);
                false
            }
        }
    }
}
