use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use owo_colors::OwoColorize;
use std::sync::Arc;

use crate::context::AppContext;

#[derive(Args)]
pub struct InvestmentsArgs {
    /// Only show investments under this goal id
    #[arg(long)]
    pub goal: Option<i64>,
}

pub async fn execute(ctx: Arc<AppContext>, args: InvestmentsArgs) -> Result<()> {
    let investments = ctx
        .api
        .investments()
        .await
        .context("Failed to fetch investments")?;

    let rows: Vec<_> = investments
        .iter()
        .filter(|inv| args.goal.map_or(true, |goal| inv.goal == goal))
        .collect();

    if rows.is_empty() {
        println!("No investments");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Date",
        "Goal",
        "Asset",
        "Qty",
        "Paid",
        "Cost",
        "Value",
        "Gain/Loss",
        "ROI %",
    ]);

    for inv in &rows {
        let gain = if inv.is_profitable {
            inv.gain_loss.to_string().green().to_string()
        } else {
            inv.gain_loss.to_string().red().to_string()
        };
        table.add_row(vec![
            Cell::new(inv.date),
            Cell::new(inv.goal),
            Cell::new(
                inv.asset_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(inv.quantity),
            Cell::new(inv.purchase_price),
            Cell::new(inv.total_cost),
            Cell::new(inv.current_value),
            Cell::new(gain),
            Cell::new(inv.roi),
        ]);
    }

    println!("{table}");
    println!("{} investments", rows.len());

    Ok(())
}
