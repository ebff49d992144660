pub mod client;
pub mod server;

// The match over `Action` lives in `run` so this file only lists variants.
mod run;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Request(client::RequestArgs),
    Verify(client::VerifyArgs),
    ResetPassword(client::ResetPasswordArgs),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
