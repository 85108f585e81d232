use anyhow::{bail, Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use crate::context::AppContext;
use crate::sync::cache::PriceUpdate;
use crate::sync::channel::ChannelState;

#[derive(Args)]
pub struct PublishArgs {
    /// Instrument to update
    #[arg(long)]
    pub asset_id: i64,

    /// New price, e.g. 25.50
    #[arg(long)]
    pub price: Decimal,
}

pub async fn execute(ctx: Arc<AppContext>, args: PublishArgs) -> Result<()> {
    if !ctx.session.is_admin().await {
        bail!("publishing price updates requires a data-admin session");
    }

    let mut state = ctx.start_live_updates().await;

    // Wait for the channel to open before pushing
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match &*state.borrow_and_update() {
                ChannelState::Open => break Ok(()),
                ChannelState::Closed(reason) => {
                    break Err(anyhow::anyhow!("channel closed: {reason:?}"))
                }
                ChannelState::Connecting => {}
            }
            state
                .changed()
                .await
                .map_err(|_| anyhow::anyhow!("channel task ended"))?;
        }
    })
    .await
    .context("Timed out waiting for the price feed connection")??;

    ctx.publish_price_update(PriceUpdate {
        asset_id: args.asset_id,
        new_price: args.price,
    })
    .await?;

    println!(
        "{} Published asset {} -> {}",
        "✓".green(),
        args.asset_id,
        args.price
    );

    ctx.teardown().await;
    Ok(())
}
