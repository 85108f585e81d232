use anyhow::{bail, Result};
use clap::Args;
use owo_colors::OwoColorize;
use std::sync::Arc;

use crate::context::AppContext;
use crate::errors::AuthError;

#[derive(Args)]
pub struct LoginArgs {
    /// Username to authenticate as
    #[arg(long, short)]
    pub username: String,

    /// Password; prompted interactively when not given
    #[arg(long)]
    pub password: Option<String>,
}

pub async fn execute(ctx: Arc<AppContext>, args: LoginArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ")?,
    };

    match ctx.session.login(&args.username, &password).await {
        Ok(session) => {
            println!(
                "{} Logged in as {}",
                "✓".green(),
                session.user.username.bold()
            );
            if session.user.is_data_admin {
                println!("  data admin: may publish price updates");
            }
            Ok(())
        }
        Err(AuthError::AuthRejected(detail)) => {
            bail!("login rejected: {detail}")
        }
        Err(e) => bail!("login failed: {e}"),
    }
}
