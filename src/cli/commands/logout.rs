use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use std::sync::Arc;

use crate::context::AppContext;

#[derive(Args)]
pub struct LogoutArgs {}

pub async fn execute(ctx: Arc<AppContext>, _args: LogoutArgs) -> Result<()> {
    if ctx.session.current_user().await.is_none() {
        println!("No active session");
        return Ok(());
    }

    ctx.session.logout().await;
    println!("{} Logged out, credentials cleared", "✓".green());
    Ok(())
}
