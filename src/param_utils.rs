use crate::error::ValidationError;
use crate::models::{StrategyKind, StrategyParameters};
use log::{debug, warn};
use serde_json::{Map, Value};

pub const INITIAL_CAPITAL_KEY: &str = "initialCapital";
pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;

/// Domain of a single strategy parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    pub integer: bool,
}

const fn int_spec(name: &'static str, default: f64, min: f64, max: f64) -> ParameterSpec {
    ParameterSpec {
        name,
        default,
        min,
        max,
        integer: true,
    }
}

const fn float_spec(name: &'static str, default: f64, min: f64, max: f64) -> ParameterSpec {
    ParameterSpec {
        name,
        default,
        min,
        max,
        integer: false,
    }
}

const CAPITAL_SPEC: ParameterSpec =
    float_spec(INITIAL_CAPITAL_KEY, DEFAULT_INITIAL_CAPITAL, 100.0, 1_000_000_000.0);

const CROSSOVER_SPECS: [ParameterSpec; 2] = [
    int_spec("shortWindow", 20.0, 2.0, 200.0),
    int_spec("longWindow", 50.0, 5.0, 400.0),
];

const RSI_SPECS: [ParameterSpec; 3] = [
    int_spec("rsiPeriod", 14.0, 2.0, 100.0),
    float_spec("rsiOversold", 30.0, 1.0, 50.0),
    float_spec("rsiOverbought", 70.0, 50.0, 99.0),
];

const BOLLINGER_SPECS: [ParameterSpec; 2] = [
    int_spec("bbPeriod", 20.0, 5.0, 200.0),
    float_spec("bbStdDev", 2.0, 0.5, 5.0),
];

const MACD_SPECS: [ParameterSpec; 3] = [
    int_spec("macdFast", 12.0, 2.0, 100.0),
    int_spec("macdSlow", 26.0, 5.0, 200.0),
    int_spec("macdSignal", 9.0, 2.0, 50.0),
];

const MOMENTUM_SPECS: [ParameterSpec; 1] = [int_spec("rocPeriod", 12.0, 1.0, 200.0)];

/// Parameter domains for a strategy, strategy-specific ones first, capital last.
pub fn parameter_specs(kind: StrategyKind) -> Vec<ParameterSpec> {
    let specific: &[ParameterSpec] = match kind {
        StrategyKind::SmaCrossover | StrategyKind::EmaCrossover => &CROSSOVER_SPECS,
        StrategyKind::RsiReversal => &RSI_SPECS,
        StrategyKind::BollingerBands => &BOLLINGER_SPECS,
        StrategyKind::Macd => &MACD_SPECS,
        StrategyKind::Momentum => &MOMENTUM_SPECS,
    };
    let mut specs = specific.to_vec();
    specs.push(CAPITAL_SPEC);
    specs
}

pub fn find_spec(kind: StrategyKind, key: &str) -> Option<ParameterSpec> {
    parameter_specs(kind).into_iter().find(|spec| spec.name == key)
}

/// Pairs of parameters where the first must stay strictly below the second.
fn ordering_constraints(kind: StrategyKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        StrategyKind::SmaCrossover | StrategyKind::EmaCrossover => {
            &[("shortWindow", "longWindow")]
        }
        StrategyKind::RsiReversal => &[("rsiOversold", "rsiOverbought")],
        StrategyKind::Macd => &[("macdFast", "macdSlow")],
        StrategyKind::BollingerBands | StrategyKind::Momentum => &[],
    }
}

pub fn default_parameters(kind: StrategyKind) -> StrategyParameters {
    parameter_specs(kind)
        .into_iter()
        .map(|spec| (spec.name.to_string(), spec.default))
        .collect()
}

/// Get a parameter value with a default fallback
pub fn get_param(params: &StrategyParameters, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Overlay `patch` on `base`, keeping only keys the strategy knows. Integer parameters are
/// rounded; range checks are left to `validate_parameters`.
pub fn merge_parameters(
    kind: StrategyKind,
    base: &StrategyParameters,
    patch: &StrategyParameters,
) -> StrategyParameters {
    let specs = parameter_specs(kind);
    let mut merged = StrategyParameters::new();

    for spec in &specs {
        let value = patch
            .get(spec.name)
            .or_else(|| base.get(spec.name))
            .copied()
            .unwrap_or(spec.default);
        let value = if spec.integer && value.is_finite() {
            value.round()
        } else {
            value
        };
        merged.insert(spec.name.to_string(), value);
    }

    for key in patch.keys() {
        if !specs.iter().any(|spec| spec.name == key) {
            debug!("Dropping parameter `{}` unknown to {}", key, kind);
        }
    }

    merged
}

pub fn validate_parameters(
    kind: StrategyKind,
    params: &StrategyParameters,
) -> Result<(), ValidationError> {
    for spec in parameter_specs(kind) {
        let value = get_param(params, spec.name, spec.default);
        if !value.is_finite() {
            return Err(ValidationError::NotFinite {
                field: spec.name.to_string(),
                value,
            });
        }
        if value < spec.min || value > spec.max {
            return Err(ValidationError::OutOfRange {
                field: spec.name.to_string(),
                value,
                min: spec.min,
                max: spec.max,
            });
        }
    }

    for (lower, upper) in ordering_constraints(kind) {
        let lower_value = get_param(params, lower, 0.0);
        let upper_value = get_param(params, upper, 0.0);
        if lower_value >= upper_value {
            return Err(ValidationError::Ordering {
                lower: lower.to_string(),
                lower_value,
                upper: upper.to_string(),
                upper_value,
            });
        }
    }

    Ok(())
}

/// Coerce loosely typed JSON parameters into numbers. Numeric strings and booleans are
/// accepted, anything else is skipped with a warning.
pub fn normalize_parameter_map(raw: &Map<String, Value>) -> StrategyParameters {
    let mut cleaned = StrategyParameters::new();

    for (key, value) in raw {
        if let Some(num) = value.as_f64() {
            if num.is_finite() {
                cleaned.insert(key.clone(), num);
            } else {
                warn!(
                    "Skipping parameter `{}` due to non-finite numeric value {}",
                    key, value
                );
            }
            continue;
        }

        if let Some(text) = value.as_str() {
            match text.trim().parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => {
                    cleaned.insert(key.clone(), parsed);
                }
                _ => warn!("Skipping parameter `{}` due to non-numeric value {}", key, value),
            }
            continue;
        }

        if let Some(boolean) = value.as_bool() {
            cleaned.insert(key.clone(), if boolean { 1.0 } else { 0.0 });
            continue;
        }

        if value.is_null() {
            warn!("Skipping parameter `{}` due to null value", key);
        } else {
            warn!(
                "Skipping parameter `{}` due to unsupported composite value {}",
                key, value
            );
        }
    }

    cleaned
}

pub fn format_parameters(params: &StrategyParameters) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ")
}
