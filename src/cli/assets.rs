use super::ui;
use crate::core::models::Asset;
use crate::core::portfolio::{NewAsset, Portfolio};
use anyhow::Result;
use comfy_table::{Cell, CellAlignment};

fn assets_table(assets: &[Asset]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Type"),
        ui::header_cell("Capital"),
        ui::header_cell("Window high"),
        ui::header_cell("Window low"),
        ui::header_cell("Trend (1y)"),
    ]);

    for asset in assets {
        let trend = asset.trend_estimate.map_or_else(|| ui::na_cell(false), ui::change_cell);
        table.add_row(vec![
            Cell::new(&asset.symbol),
            Cell::new(asset.asset_type),
            Cell::new(format!("{:.2}", asset.capital_allocation.amount()))
                .set_alignment(CellAlignment::Right),
            ui::format_optional_cell(asset.max_price_window, |v| format!("{v:.4}")),
            ui::format_optional_cell(asset.min_price_window, |v| format!("{v:.4}")),
            trend,
        ]);
    }
    table.to_string()
}

pub async fn list(portfolio: &Portfolio) -> Result<()> {
    let assets = portfolio.list_assets().await?;
    if assets.is_empty() {
        println!("{}", ui::style_text("No assets registered.", ui::StyleType::Subtle));
        return Ok(());
    }
    println!("{}", assets_table(&assets));

    let total: f64 = assets.iter().map(|a| a.capital_allocation.amount()).sum();
    println!(
        "\n{}: {}",
        ui::style_text("Allocated capital", ui::StyleType::TotalLabel),
        ui::style_text(&format!("{total:.2}"), ui::StyleType::TotalValue)
    );
    Ok(())
}

pub async fn add(portfolio: &Portfolio, new: NewAsset) -> Result<()> {
    let pb = ui::new_spinner(&format!("Registering {}...", new.symbol));
    let result = portfolio.register_asset(new).await;
    pb.finish_and_clear();

    let asset = result?;
    println!("Registered {} ({})", ui::style_text(&asset.symbol, ui::StyleType::Title), asset.id);
    println!("{}", assets_table(std::slice::from_ref(&asset)));
    Ok(())
}
