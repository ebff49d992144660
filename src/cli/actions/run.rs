use crate::cli::actions::{client, server, Action};
use anyhow::Result;

/// Execute the provided action.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
        Action::Request(args) => client::request(args).await,
        Action::Verify(args) => client::verify(args).await,
        Action::ResetPassword(args) => client::reset_password(args).await,
    }
}
