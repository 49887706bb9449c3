pub mod backtest;
pub mod chat;
pub mod explain;
pub mod export;
pub mod search;
pub mod session;
pub mod strategies;

use crate::config::parse_date;
use crate::context::AppContext;
use crate::models::{BacktestResult, Configuration, Projection, StrategyKind, StrategyParameters};
use crate::param_utils::{format_parameters, merge_parameters};
use anyhow::{anyhow, Result};
use clap::Args;

/// Configuration flags shared by every command that describes a backtest.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Instrument symbol (defaults to DEFAULT_SYMBOL)
    #[arg(long)]
    pub symbol: Option<String>,
    /// First date, YYYY-MM-DD (defaults to one year before --end)
    #[arg(long)]
    pub start: Option<String>,
    /// Last date, YYYY-MM-DD (defaults to today)
    #[arg(long)]
    pub end: Option<String>,
    /// Strategy kind, e.g. SMA_CROSSOVER or rsi-reversal
    #[arg(long)]
    pub strategy: Option<String>,
    /// Strategy parameter override, repeatable: --param shortWindow=10
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
    /// Fee rate as a fraction of traded value
    #[arg(long)]
    pub fee: Option<f64>,
    /// Slippage rate as a fraction of price
    #[arg(long)]
    pub slippage: Option<f64>,
}

impl ConfigArgs {
    /// Flags layered over the application defaults. Range checks happen in `ConfigStore`.
    pub fn to_configuration(&self, app: &AppContext) -> Result<Configuration> {
        let mut config = app.default_configuration();

        if let Some(symbol) = self.symbol.as_deref() {
            config.symbol = symbol.trim().to_uppercase();
        }
        if let Some(end) = self.end.as_deref() {
            config.end_date = parse_date(end)?;
            config.start_date = config.end_date - chrono::Duration::days(365);
        }
        if let Some(start) = self.start.as_deref() {
            config.start_date = parse_date(start)?;
        }
        if let Some(raw) = self.strategy.as_deref() {
            let kind: StrategyKind = raw.parse()?;
            config.strategy = kind;
            config.params = crate::param_utils::default_parameters(kind);
        }
        let overrides = parse_param_overrides(&self.params)?;
        config.params = merge_parameters(config.strategy, &config.params, &overrides);
        if let Some(fee) = self.fee {
            config.fee_rate = fee;
        }
        if let Some(slippage) = self.slippage {
            config.slippage_rate = slippage;
        }
        Ok(config)
    }
}

pub fn parse_param_overrides(raw: &[String]) -> Result<StrategyParameters> {
    let mut params = StrategyParameters::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Parameter override '{}' must look like key=value", entry))?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| anyhow!("Parameter {} must be a number (value: {})", key.trim(), value))?;
        params.insert(key.trim().to_string(), value);
    }
    Ok(params)
}

pub fn describe_configuration(config: &Configuration) -> String {
    format!(
        "{} {} to {} | {} | {} | fees {} slippage {}",
        config.symbol,
        config.start_date,
        config.end_date,
        config.strategy,
        format_parameters(&config.params),
        config.fee_rate,
        config.slippage_rate
    )
}

pub fn print_result_summary(result: &BacktestResult, projection: &Projection) {
    let metrics = &result.metrics;
    println!(
        "Records: {} (in-sample until index {})",
        projection.records.len(),
        projection.split_index
    );
    if let Some(bounds) = projection.bounds {
        println!("Price axis: {:.2} .. {:.2}", bounds.min, bounds.max);
    }
    println!(
        "Trades: {} buys, {} sells",
        projection.buys.len(),
        projection.sells.len()
    );
    println!(
        "Return: {:.2}% | Final capital: {:.2} | Max drawdown: {:.2}% | Win rate: {:.1}% | Sharpe: {:.2}",
        metrics.total_return,
        metrics.final_capital,
        metrics.max_drawdown,
        metrics.win_rate,
        metrics.sharpe_ratio
    );
    for trade in &projection.highlighted {
        println!(
            "  * {} {} @ {:.2} ({})",
            trade.date,
            trade.side.as_str(),
            trade.price,
            trade.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_parse_key_value_pairs() {
        let params =
            parse_param_overrides(&["shortWindow=10".to_string(), " bbStdDev = 2.5".to_string()])
                .unwrap();
        assert_eq!(params.get("shortWindow"), Some(&10.0));
        assert_eq!(params.get("bbStdDev"), Some(&2.5));

        assert!(parse_param_overrides(&["shortWindow".to_string()]).is_err());
        assert!(parse_param_overrides(&["shortWindow=fast".to_string()]).is_err());
    }
}
