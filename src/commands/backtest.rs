use super::{describe_configuration, print_result_summary, ConfigArgs};
use crate::backtest_api_client::ensure_non_empty;
use crate::config_store::ConfigStore;
use crate::context::AppContext;
use crate::models::ComputationRequest;
use crate::projector::project;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::collections::BTreeSet;
use std::time::Duration;

/// One computation for the given flags, without debouncing.
pub async fn run(
    app: &AppContext,
    args: &ConfigArgs,
    highlights: &[NaiveDate],
    json: bool,
) -> Result<()> {
    let store = ConfigStore::new(args.to_configuration(app)?)
        .context("backtest configuration is invalid")?;
    let request = ComputationRequest {
        version: 1,
        config: store.get(),
    };
    info!("Running {}", describe_configuration(&request.config));

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!("Backtesting {}", request.config.symbol));
    pb.enable_steady_tick(Duration::from_millis(120));

    let outcome = app
        .compute()
        .run_backtest(&request)
        .await
        .and_then(|result| ensure_non_empty(result, &request.config));
    match &outcome {
        Ok(_) => pb.finish_with_message("Backtest completed"),
        Err(_) => pb.finish_with_message("Backtest failed"),
    }
    let result = outcome?;

    let highlights: BTreeSet<NaiveDate> = highlights.iter().copied().collect();
    let projection = project(&result, &highlights);
    if json {
        println!("{}", serde_json::to_string_pretty(&projection)?);
    } else {
        println!("{}", describe_configuration(&request.config));
        print_result_summary(&result, &projection);
    }
    Ok(())
}
