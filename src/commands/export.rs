use super::ConfigArgs;
use crate::code_generator::{export_script, ScriptFlavor};
use crate::config_store::ConfigStore;
use crate::context::AppContext;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

pub fn run(app: &AppContext, args: &ConfigArgs, flavor: &str, output: Option<&Path>) -> Result<()> {
    let flavor: ScriptFlavor = flavor.parse()?;
    let store = ConfigStore::new(args.to_configuration(app)?)
        .context("export configuration is invalid")?;
    let script = export_script(&store.get(), flavor);

    match output {
        Some(path) => {
            fs::write(path, &script)
                .with_context(|| format!("failed to write script to {}", path.display()))?;
            info!("Wrote {:?} script to {}", flavor, path.display());
        }
        None => print!("{}", script),
    }
    Ok(())
}
