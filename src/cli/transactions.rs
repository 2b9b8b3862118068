use super::ui;
use crate::core::models::{Side, Transaction, TransactionStatus};
use crate::core::portfolio::Portfolio;
use crate::core::transactions::{CloseRequest, OpenRequest, TransactionBook};
use anyhow::Result;
use comfy_table::{Cell, CellAlignment};
use std::collections::HashMap;

fn transactions_table(transactions: &[Transaction], symbols: &HashMap<String, String>) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Id"),
        ui::header_cell("Asset"),
        ui::header_cell("Side"),
        ui::header_cell("Amount"),
        ui::header_cell("Open"),
        ui::header_cell("Close"),
        ui::header_cell("Fees"),
        ui::header_cell("Profit"),
        ui::header_cell("Profit (%)"),
    ]);

    for tx in transactions {
        let symbol = symbols.get(&tx.asset_id).unwrap_or(&tx.asset_id);
        let side = match tx.side {
            Side::Long => "long",
            Side::Short => "short",
        };
        let fees = tx.open_fee + tx.close_fee.unwrap_or(0.0);
        table.add_row(vec![
            Cell::new(&tx.id),
            Cell::new(symbol),
            Cell::new(side),
            Cell::new(format!("{:.8}", tx.amount)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.4}", tx.open_price)).set_alignment(CellAlignment::Right),
            ui::format_optional_cell(tx.close_price, |p| format!("{p:.4}")),
            Cell::new(format!("{fees:.2}")).set_alignment(CellAlignment::Right),
            ui::format_optional_cell(tx.profit_total_fiat, |p| format!("{p:.2}")),
            tx.profit_percent
                .map_or_else(|| ui::na_cell(tx.status == TransactionStatus::Closed), ui::change_cell),
        ]);
    }
    table.to_string()
}

pub async fn open(book: &TransactionBook, request: OpenRequest) -> Result<()> {
    let tx = book.open(request).await?;
    println!(
        "Opened {} worth {} (fees {:.2})",
        ui::style_text(&tx.id, ui::StyleType::Title),
        ui::style_text(&format!("{:.2}", tx.open_value_fiat), ui::StyleType::TotalValue),
        tx.open_fee
    );
    Ok(())
}

pub async fn close(book: &TransactionBook, id: &str, request: CloseRequest) -> Result<()> {
    let tx = book.close(id, request).await?;
    let profit = tx.profit_total_fiat.unwrap_or(0.0);
    let style = if profit >= 0.0 {
        ui::StyleType::TotalValue
    } else {
        ui::StyleType::Error
    };
    println!(
        "Closed {} with profit {} ({:.2}%)",
        ui::style_text(&tx.id, ui::StyleType::Title),
        ui::style_text(&format!("{profit:.2}"), style),
        tx.profit_percent.unwrap_or(0.0)
    );
    Ok(())
}

pub async fn list(portfolio: &Portfolio, book: &TransactionBook, symbol: Option<&str>) -> Result<()> {
    let asset_id = match symbol {
        Some(symbol) => Some(portfolio.find_by_symbol(symbol).await?.id),
        None => None,
    };
    let transactions = book.list(asset_id.as_deref()).await?;
    if transactions.is_empty() {
        println!("{}", ui::style_text("No transactions recorded.", ui::StyleType::Subtle));
        return Ok(());
    }

    let symbols: HashMap<String, String> = portfolio
        .list_assets()
        .await?
        .into_iter()
        .map(|a| (a.id, a.symbol))
        .collect();
    println!("{}", transactions_table(&transactions, &symbols));
    Ok(())
}
