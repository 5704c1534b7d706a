// User confirmation for swaps that move the best-network cell.

pub const BEST_NETWORK_SWAP_ID: &str = "best_network_swap";
pub const BEST_NETWORK_SWAP_TITLE: &str = "Move best network?";
pub const BEST_NETWORK_SWAP_MESSAGE: &str =
    "The top-left cell shows the best-ranked network. Swap it with another cell anyway?";

/// Asks the user a yes/no question. May block until answered.
pub trait ConfirmationDialog: Send + Sync {
    fn confirm(&self, id: &str, title: &str, message: &str) -> bool;
}

/// Answers every question with a fixed value and logs it. Used headless.
pub struct AutoConfirm(pub bool);

impl ConfirmationDialog for AutoConfirm {
    fn confirm(&self, id: &str, title: &str, _message: &str) -> bool {
        tracing::info!(dialog = id, title, answer = self.0, "confirmation auto-answered");
        self.0
    }
}
