use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;

use crate::context::AppContext;

#[derive(Args)]
pub struct StatsArgs {}

pub async fn execute(ctx: Arc<AppContext>, _args: StatsArgs) -> Result<()> {
    let stats = ctx
        .api
        .overall_stats()
        .await
        .context("Failed to fetch overall stats")?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
