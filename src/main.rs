use anyhow::Result;
use clap::{Parser, Subcommand};
use quantdesk::{
    commands::{
        backtest, chat, explain, export, search, session, strategies, strategies::StrategiesCommand,
        ConfigArgs,
    },
    config::parse_date,
    context::AppContext,
};
use log::info;
use std::env;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quantdesk")]
#[command(about = "Configure, backtest and explain trading strategies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: edit the configuration or chat, results update as you go
    Session {
        #[command(flatten)]
        config: ConfigArgs,
        /// Name recorded for the session
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Run one backtest and print the projected result
    Backtest {
        #[command(flatten)]
        config: ConfigArgs,
        /// Dates whose trades should be listed, YYYY-MM-DD, comma separated
        #[arg(long, value_delimiter = ',')]
        highlight: Vec<String>,
        /// Print the full projection as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send one message to the assistant and print the resulting intent
    Chat {
        /// The message
        #[arg(required = true)]
        text: Vec<String>,
        #[command(flatten)]
        config: ConfigArgs,
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Describe a strategy's logic and parameter ranges
    Explain {
        strategy: String,
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// Write a standalone Python script for a configuration
    Export {
        #[command(flatten)]
        config: ConfigArgs,
        /// vectorbt or backtrader
        #[arg(long, default_value = "vectorbt")]
        flavor: String,
        /// Destination file (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Look up instrument symbols
    Search { query: String },
    /// Manage saved strategies
    Strategies {
        #[command(subcommand)]
        command: StrategiesCommand,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Commands::Explain { strategy, params } = &command {
        return explain::run(strategy, params);
    }

    let database_url = env::var("DATABASE_URL").ok();
    let app_context = AppContext::initialize(database_url).await?;
    info!("Backtests are simulations on historical data. Not financial advice.");

    match command {
        Commands::Session { config, user } => {
            session::run(&app_context, &config, &user).await?;
        }
        Commands::Backtest {
            config,
            highlight,
            json,
        } => {
            let highlights = highlight
                .iter()
                .map(|raw| parse_date(raw))
                .collect::<Result<Vec<_>>>()?;
            backtest::run(&app_context, &config, &highlights, json).await?;
        }
        Commands::Chat { text, config, user } => {
            chat::run(&app_context, &config, &user, &text.join(" ")).await?;
        }
        Commands::Export {
            config,
            flavor,
            output,
        } => {
            export::run(&app_context, &config, &flavor, output.as_deref())?;
        }
        Commands::Search { query } => {
            search::run(&app_context, &query).await?;
        }
        Commands::Strategies { command } => {
            strategies::run(&app_context, command).await?;
        }
        Commands::Explain { .. } => {}
    }

    Ok(())
}
