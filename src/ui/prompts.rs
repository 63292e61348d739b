//! Confirmation prompt with CI/non-interactive fallback

use super::context::UiContext;
use crate::error::{DepcacheError, DepcacheResult};

/// Ask a yes/no question
///
/// `--yes` answers yes; without a terminal the default is taken.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> DepcacheResult<bool> {
    if ctx.auto_yes() {
        eprintln!("  {} (auto-approved)", message);
        return Ok(true);
    }

    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| DepcacheError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| DepcacheError::io("reading confirmation", e))
}
