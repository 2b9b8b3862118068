use super::ui;
use crate::core::sync::{CandleSynchronizer, SyncOutcome};
use anyhow::Result;
use comfy_table::{Cell, CellAlignment, Color};

fn outcomes_table(outcomes: &[SyncOutcome]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("New candles"),
        ui::header_cell("Status"),
    ]);

    for outcome in outcomes {
        let (count, status) = match &outcome.result {
            Ok(count) => (
                Cell::new(count).set_alignment(CellAlignment::Right),
                Cell::new("ok").fg(Color::Green),
            ),
            Err(e) if outcome.retryable => (
                ui::na_cell(false),
                Cell::new(format!("{e} (retry later)")).fg(Color::Yellow),
            ),
            Err(e) => (ui::na_cell(true), Cell::new(e).fg(Color::Red)),
        };
        table.add_row(vec![Cell::new(&outcome.symbol), count, status]);
    }
    table.to_string()
}

pub async fn run(synchronizer: &CandleSynchronizer) -> Result<()> {
    let pb = ui::new_spinner("Syncing price history...");

    let mut outcomes = synchronizer.sync_all(&|| pb.inc(1)).await?;
    pb.finish_and_clear();

    if outcomes.is_empty() {
        println!("{}", ui::style_text("No assets registered.", ui::StyleType::Subtle));
        return Ok(());
    }
    outcomes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    println!("{}", outcomes_table(&outcomes));

    let added: usize = outcomes.iter().filter_map(|o| o.result.as_ref().ok()).sum();
    println!(
        "\n{}: {}",
        ui::style_text("Candles added", ui::StyleType::TotalLabel),
        ui::style_text(&added.to_string(), ui::StyleType::TotalValue)
    );
    Ok(())
}
