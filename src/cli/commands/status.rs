use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use owo_colors::OwoColorize;
use std::sync::Arc;

use crate::auth::claims;
use crate::context::AppContext;

#[derive(Args)]
pub struct StatusArgs {}

pub async fn execute(ctx: Arc<AppContext>, _args: StatusArgs) -> Result<()> {
    let Some(user) = ctx.session.current_user().await else {
        println!("{} Not logged in", "✗".red());
        return Ok(());
    };

    println!("Logged in as {} <{}>", user.username.bold(), user.email);
    println!("  user id:    {}", user.user_id);
    println!(
        "  data admin: {}",
        if ctx.session.is_admin().await {
            "yes".green().to_string()
        } else {
            "no".to_string()
        }
    );

    // Expiry of the held access token; an unreadable token reads as expired
    match ctx.session.access_token().await {
        Ok(Some(token)) => match claims::decode(&token).ok().and_then(|c| c.exp) {
            Some(exp) => {
                let expires = DateTime::<Utc>::from_timestamp(exp, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| exp.to_string());
                println!("  token:      valid until {expires}");
            }
            None => println!("  token:      {}", "expired".yellow()),
        },
        Ok(None) => println!("  token:      none"),
        Err(e) => println!("  token:      {} ({e})", "session ended".red()),
    }

    Ok(())
}
