use crate::context::AppContext;
use anyhow::Result;

pub async fn run(app: &AppContext, query: &str) -> Result<()> {
    let matches = app.search_symbols(query).await;
    if matches.is_empty() {
        println!("No matches for '{}'", query.trim());
        return Ok(());
    }
    for item in matches {
        println!(
            "{:<10} {:<40} {:<10} {}",
            item.symbol, item.name, item.kind, item.exchange
        );
    }
    Ok(())
}
