use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use owo_colors::OwoColorize;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::context::AppContext;

#[derive(Args)]
pub struct GoalsArgs {}

pub async fn execute(ctx: Arc<AppContext>, _args: GoalsArgs) -> Result<()> {
    let goals = ctx.api.goals().await.context("Failed to fetch goals")?;

    if goals.is_empty() {
        println!("No goals yet");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Name",
        "Type",
        "Target",
        "Invested",
        "Value",
        "Gain/Loss",
        "ROI %",
    ]);

    for goal in &goals {
        table.add_row(vec![
            Cell::new(&goal.name),
            Cell::new(&goal.investment_type),
            Cell::new(goal.target_amount),
            Cell::new(goal.total_invested),
            Cell::new(display_opt(goal.current_portfolio_value)),
            Cell::new(display_opt(goal.net_gain_loss)),
            Cell::new(display_opt(goal.portfolio_roi)),
        ]);
    }

    println!("{table}");

    let in_profit = goals
        .iter()
        .filter(|g| g.net_gain_loss.unwrap_or(Decimal::ZERO) >= Decimal::ZERO)
        .count();
    println!(
        "{} goals, {} in profit",
        goals.len(),
        in_profit.to_string().green()
    );

    Ok(())
}

fn display_opt(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
