use super::{describe_configuration, ConfigArgs};
use crate::config_store::ConfigStore;
use crate::context::AppContext;
use anyhow::{anyhow, Context, Result};
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum StrategiesCommand {
    /// List saved strategies
    List,
    /// Print one saved strategy as JSON
    Show { name: String },
    /// Save a configuration under a name
    Save {
        name: String,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Delete a saved strategy
    Delete { name: String },
}

pub async fn run(app: &AppContext, command: StrategiesCommand) -> Result<()> {
    let library = app.library();
    match command {
        StrategiesCommand::List => {
            let saved = library.list().await?;
            if saved.is_empty() {
                println!("No saved strategies");
            }
            for entry in saved {
                println!(
                    "{:<20} {} (saved {})",
                    entry.name,
                    describe_configuration(&entry.config),
                    entry.saved_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        StrategiesCommand::Show { name } => {
            let entry = library
                .load(&name)
                .await?
                .ok_or_else(|| anyhow!("No saved strategy named '{}'", name))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        StrategiesCommand::Save { name, config } => {
            let store = ConfigStore::new(config.to_configuration(app)?)
                .context("strategy configuration is invalid")?;
            let saved = library.save(&name, &store.get()).await?;
            println!("Saved {}: {}", saved.name, describe_configuration(&saved.config));
        }
        StrategiesCommand::Delete { name } => {
            if library.delete(&name).await? {
                println!("Deleted {}", name);
            } else {
                println!("No saved strategy named '{}'", name);
            }
        }
    }
    Ok(())
}
