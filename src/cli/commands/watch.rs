use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::context::AppContext;
use crate::sync::channel::{ChannelConfig, ChannelState, LiveChannel};

#[derive(Args)]
pub struct WatchArgs {
    /// Warm the cache with the investment list before following updates
    #[arg(long)]
    pub prefetch: bool,
}

/// Follow the price feed, applying each event to the cached view and
/// printing what changed, until Ctrl-C.
pub async fn execute(ctx: Arc<AppContext>, args: WatchArgs) -> Result<()> {
    if args.prefetch {
        let investments = ctx
            .api
            .investments()
            .await
            .context("Failed to prefetch investments")?;
        println!("Prefetched {} investments", investments.len());
    }

    let config = ChannelConfig {
        url: ctx.config.ws_url.clone(),
        ..ChannelConfig::default()
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let channel = LiveChannel::connect(config, events_tx);
    let mut state = channel.state();

    println!("Watching {} (Ctrl-C to stop)", ctx.config.ws_url);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping");
                let _ = channel.close();
                break;
            }
            event = events_rx.recv() => {
                let Some(update) = event else { break };
                let patched = ctx.cache.apply_price_update(&update);
                println!(
                    "{} asset {} -> {} ({} cached rows patched)",
                    "●".green(),
                    update.asset_id,
                    update.new_price,
                    patched
                );
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                match current {
                    ChannelState::Connecting => println!("{} connecting...", "○".yellow()),
                    ChannelState::Open => println!("{} live", "●".green()),
                    ChannelState::Closed(reason) => {
                        println!("{} closed: {:?}", "○".red(), reason);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
