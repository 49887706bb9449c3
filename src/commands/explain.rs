use super::parse_param_overrides;
use crate::code_generator::pseudocode;
use crate::models::StrategyKind;
use crate::param_utils::{default_parameters, merge_parameters, parameter_specs};
use anyhow::Result;

pub fn run(strategy: &str, overrides: &[String]) -> Result<()> {
    let kind: StrategyKind = strategy.parse()?;
    let params = merge_parameters(
        kind,
        &default_parameters(kind),
        &parse_param_overrides(overrides)?,
    );

    println!("{} ({})", kind.as_str(), kind.label());
    for spec in parameter_specs(kind) {
        println!(
            "  {:<16} {:>10} [{} .. {}]{}",
            spec.name,
            params.get(spec.name).copied().unwrap_or(spec.default),
            spec.min,
            spec.max,
            if spec.integer { " int" } else { "" }
        );
    }
    println!();
    print!("{}", pseudocode(kind, &params));
    Ok(())
}
