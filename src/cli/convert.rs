use super::ui;
use crate::core::rates::RateResolver;
use anyhow::Result;

pub async fn run(rates: &RateResolver, amount: f64, currency: &str) -> Result<()> {
    let session = rates.session();
    let converted = session.convert(amount, currency).await;
    let rate = session.usd_rate(currency).await;

    println!(
        "{} {} = {}",
        amount,
        currency.to_uppercase(),
        ui::style_text(&format!("{converted:.8}"), ui::StyleType::TotalValue)
    );
    if rate.is_none() {
        println!(
            "{}",
            ui::style_text("No rate found, amount shown unconverted.", ui::StyleType::Error)
        );
    }
    Ok(())
}
