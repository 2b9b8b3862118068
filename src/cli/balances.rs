use super::ui;
use crate::App;
use crate::core::balances::{BalanceAggregator, BalanceReport, value_balances};
use anyhow::Result;
use comfy_table::{Cell, CellAlignment};

impl BalanceReport {
    pub fn display_as_table(&self, currency: &str) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Asset"),
            ui::header_cell("Amount"),
            ui::header_cell(&format!("Value ({currency})")),
        ]);

        for balance in &self.balances {
            table.add_row(vec![
                Cell::new(&balance.asset),
                Cell::new(format!("{:.8}", balance.amount)).set_alignment(CellAlignment::Right),
                ui::format_optional_cell(balance.usd_value, |v| format!("{v:.2}")),
            ]);
        }

        let mut output = table.to_string();
        output.push_str(&format!(
            "\n\nTotal Value ({}): {}",
            ui::style_text(currency, ui::StyleType::TotalLabel),
            ui::style_text(&format!("{:.2}", self.valued_total), ui::StyleType::TotalValue)
        ));

        if self.unpriced().next().is_some() {
            output.push_str(&format!(
                "\n{}",
                ui::style_text("N/A rows have no rate and are not in the total.", ui::StyleType::Subtle)
            ));
        }

        let carried = [
            ("Recorded total (USD)", self.usd_total),
            ("Recorded total (fiat)", self.fiat_total),
        ];
        for (label, value) in carried {
            let value = value.map_or("N/A".to_string(), |v| format!("{v:.2}"));
            output.push_str(&format!(
                "\n{}: {}",
                ui::style_text(label, ui::StyleType::Subtle),
                value
            ));
        }
        output
    }
}

pub async fn run(app: &App) -> Result<()> {
    let pb = ui::new_spinner("Fetching balances...");
    let balances = BalanceAggregator::new(app.binance.as_ref())
        .get_all_balances()
        .await;

    pb.set_message("Valuing balances...");
    let report = value_balances(
        &balances,
        &app.rates.session(),
        &app.registers,
        &app.config.registers.usd_total,
        &app.config.registers.fiat_total,
    )
    .await?;
    pb.finish_and_clear();

    if report.balances.is_empty() {
        println!("{}", ui::style_text("No balances found.", ui::StyleType::Subtle));
        return Ok(());
    }
    println!(
        "{}",
        report.display_as_table(&app.config.rates.settlement_currency)
    );
    Ok(())
}
