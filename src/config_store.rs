//! Single-writer holder of the current `Configuration`.
//!
//! Readers only ever see immutable `Arc<Configuration>` snapshots. Every accepted `set` is
//! published to subscribers, and that publication is the only thing that triggers a new
//! backtest downstream.

use crate::error::ValidationError;
use crate::models::{Configuration, StrategyKind, StrategyParameters};
use crate::param_utils::{default_parameters, merge_parameters, validate_parameters};
use chrono::NaiveDate;
use log::debug;
use std::sync::Arc;
use tokio::sync::watch;

/// How a parameter patch combines with what is already configured.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterPatch {
    /// Overlay on the current parameters (manual edits of individual fields).
    Update(StrategyParameters),
    /// Overlay on the target strategy's defaults (chat suggestions).
    Replace(StrategyParameters),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigChange {
    pub symbol: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub strategy: Option<StrategyKind>,
    pub params: Option<ParameterPatch>,
    pub fee_rate: Option<f64>,
    pub slippage_rate: Option<f64>,
    pub clear_result: bool,
}

impl ConfigChange {
    pub fn symbol<S: Into<String>>(symbol: S) -> Self {
        Self {
            symbol: Some(symbol.into()),
            ..Default::default()
        }
    }

    pub fn date_range(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date: Some(start_date),
            end_date: Some(end_date),
            ..Default::default()
        }
    }

    pub fn strategy(kind: StrategyKind) -> Self {
        Self {
            strategy: Some(kind),
            ..Default::default()
        }
    }

    pub fn parameter<S: Into<String>>(key: S, value: f64) -> Self {
        let mut params = StrategyParameters::new();
        params.insert(key.into(), value);
        Self {
            params: Some(ParameterPatch::Update(params)),
            ..Default::default()
        }
    }

    /// Strategy and parameters in one atomic step, parameters filled from defaults.
    pub fn replace_strategy(kind: StrategyKind, params: StrategyParameters) -> Self {
        Self {
            strategy: Some(kind),
            params: Some(ParameterPatch::Replace(params)),
            ..Default::default()
        }
    }

    pub fn costs(fee_rate: f64, slippage_rate: f64) -> Self {
        Self {
            fee_rate: Some(fee_rate),
            slippage_rate: Some(slippage_rate),
            ..Default::default()
        }
    }

    /// Every field taken from `config`, as when restoring a saved strategy.
    pub fn from_configuration(config: &Configuration) -> Self {
        Self {
            symbol: Some(config.symbol.clone()),
            start_date: Some(config.start_date),
            end_date: Some(config.end_date),
            strategy: Some(config.strategy),
            params: Some(ParameterPatch::Replace(config.params.clone())),
            fee_rate: Some(config.fee_rate),
            slippage_rate: Some(config.slippage_rate),
            clear_result: false,
        }
    }

    pub fn clearing_result(mut self) -> Self {
        self.clear_result = true;
        self
    }
}

/// What subscribers receive on every accepted change.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub revision: u64,
    pub config: Arc<Configuration>,
    pub clears_result: bool,
    /// Revision of the most recent clearing change, 0 when none. Survives later edits so a
    /// subscriber that only sees the newest snapshot still learns about the clear.
    pub cleared_at: u64,
}

pub struct ConfigStore {
    tx: watch::Sender<ConfigSnapshot>,
}

impl ConfigStore {
    pub fn new(initial: Configuration) -> Result<Self, ValidationError> {
        let initial = normalize(initial);
        validate(&initial)?;
        let (tx, _rx) = watch::channel(ConfigSnapshot {
            revision: 0,
            config: Arc::new(initial),
            clears_result: false,
            cleared_at: 0,
        });
        Ok(Self { tx })
    }

    pub fn get(&self) -> Arc<Configuration> {
        Arc::clone(&self.tx.borrow().config)
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.tx.borrow().clone()
    }

    /// Receiver that wakes on every accepted `set` made after this call.
    pub fn subscribe(&self) -> watch::Receiver<ConfigSnapshot> {
        self.tx.subscribe()
    }

    /// Merge `change` into the current snapshot, validate, and publish. A rejected change
    /// leaves the snapshot untouched and notifies nobody.
    pub fn set(&self, change: ConfigChange) -> Result<Arc<Configuration>, ValidationError> {
        let current = self.snapshot();
        let merged = apply_change(&current.config, &change);
        validate(&merged)?;

        let config = Arc::new(merged);
        let revision = current.revision + 1;
        debug!(
            "Accepted configuration revision {} ({} {} - {}, {})",
            revision, config.symbol, config.start_date, config.end_date, config.strategy
        );
        self.tx.send_replace(ConfigSnapshot {
            revision,
            config: Arc::clone(&config),
            clears_result: change.clear_result,
            cleared_at: if change.clear_result {
                revision
            } else {
                current.cleared_at
            },
        });
        Ok(config)
    }
}

fn apply_change(current: &Configuration, change: &ConfigChange) -> Configuration {
    let mut next = current.clone();

    if let Some(symbol) = &change.symbol {
        next.symbol = symbol.clone();
    }
    if let Some(start_date) = change.start_date {
        next.start_date = start_date;
    }
    if let Some(end_date) = change.end_date {
        next.end_date = end_date;
    }
    if let Some(fee_rate) = change.fee_rate {
        next.fee_rate = fee_rate;
    }
    if let Some(slippage_rate) = change.slippage_rate {
        next.slippage_rate = slippage_rate;
    }

    let kind = change.strategy.unwrap_or(current.strategy);
    let kind_changed = kind != current.strategy;
    next.strategy = kind;
    next.params = match &change.params {
        Some(ParameterPatch::Update(patch)) if !kind_changed => {
            merge_parameters(kind, &current.params, patch)
        }
        Some(ParameterPatch::Update(patch)) | Some(ParameterPatch::Replace(patch)) => {
            merge_parameters(kind, &default_parameters(kind), patch)
        }
        None if kind_changed => default_parameters(kind),
        None => current.params.clone(),
    };

    normalize(next)
}

fn normalize(mut config: Configuration) -> Configuration {
    config.symbol = config.symbol.trim().to_uppercase();
    config
}

fn validate(config: &Configuration) -> Result<(), ValidationError> {
    if config.symbol.is_empty() {
        return Err(ValidationError::EmptySymbol);
    }
    if config.start_date > config.end_date {
        return Err(ValidationError::DateRange {
            start: config.start_date,
            end: config.end_date,
        });
    }
    validate_rate("feeRate", config.fee_rate)?;
    validate_rate("slippageRate", config.slippage_rate)?;
    validate_parameters(config.strategy, &config.params)
}

fn validate_rate(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite {
            field: field.to_string(),
            value,
        });
    }
    if !(0.0..1.0).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn store() -> ConfigStore {
        ConfigStore::new(Configuration::new(
            "aapl",
            date("2023-01-01"),
            date("2023-12-31"),
            StrategyKind::SmaCrossover,
        ))
        .unwrap()
    }

    #[test]
    fn new_normalizes_symbol() {
        assert_eq!(store().get().symbol, "AAPL");
    }

    #[test]
    fn rejected_change_leaves_snapshot_and_revision_untouched() {
        let store = store();
        let before = store.snapshot();
        let mut rx = store.subscribe();

        let error = store
            .set(ConfigChange::date_range(date("2024-02-01"), date("2024-01-01")))
            .unwrap_err();
        assert!(matches!(error, ValidationError::DateRange { .. }));
        assert!(store.set(ConfigChange::symbol("   ")).is_err());
        assert!(store.set(ConfigChange::costs(-0.1, 0.0)).is_err());

        let after = store.snapshot();
        assert_eq!(after.revision, before.revision);
        assert!(Arc::ptr_eq(&after.config, &before.config));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn accepted_change_notifies_and_bumps_revision() {
        let store = store();
        let mut rx = store.subscribe();

        store
            .set(ConfigChange::date_range(date("2022-01-01"), date("2022-06-30")))
            .unwrap();
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.revision, 1);
        assert_eq!(seen.config.start_date, date("2022-01-01"));

        // A no-op resubmission is still an accepted change.
        store.set(ConfigChange::default()).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.snapshot().revision, 2);
    }

    #[test]
    fn switching_strategy_resets_parameters_to_defaults() {
        let store = store();
        store.set(ConfigChange::parameter("shortWindow", 5.0)).unwrap();
        assert_eq!(store.get().params.get("shortWindow"), Some(&5.0));

        let config = store.set(ConfigChange::strategy(StrategyKind::Momentum)).unwrap();
        assert_eq!(config.strategy, StrategyKind::Momentum);
        assert_eq!(config.params, default_parameters(StrategyKind::Momentum));
    }

    #[test]
    fn update_patch_keeps_other_current_values() {
        let store = store();
        store.set(ConfigChange::parameter("shortWindow", 8.0)).unwrap();
        store.set(ConfigChange::parameter("longWindow", 30.0)).unwrap();

        let params = &store.get().params;
        assert_eq!(params.get("shortWindow"), Some(&8.0));
        assert_eq!(params.get("longWindow"), Some(&30.0));
    }

    #[test]
    fn replace_patch_starts_from_defaults() {
        let store = store();
        store.set(ConfigChange::parameter("shortWindow", 8.0)).unwrap();

        let mut patch = StrategyParameters::new();
        patch.insert("longWindow".to_string(), 100.0);
        let config = store
            .set(ConfigChange::replace_strategy(StrategyKind::SmaCrossover, patch).clearing_result())
            .unwrap();
        assert_eq!(config.params.get("shortWindow"), Some(&20.0));
        assert_eq!(config.params.get("longWindow"), Some(&100.0));
        assert!(store.snapshot().clears_result);
    }

    #[test]
    fn inverted_windows_are_rejected() {
        let store = store();
        let error = store.set(ConfigChange::parameter("shortWindow", 80.0)).unwrap_err();
        assert!(matches!(error, ValidationError::Ordering { .. }));
        assert_eq!(store.get().params.get("shortWindow"), Some(&20.0));
    }

    #[test]
    fn clear_revision_carries_over_later_edits() {
        let store = store();
        assert_eq!(store.snapshot().cleared_at, 0);

        store
            .set(ConfigChange::strategy(StrategyKind::Macd).clearing_result())
            .unwrap();
        store.set(ConfigChange::symbol("qqq")).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.revision, 2);
        assert!(!snapshot.clears_result);
        assert_eq!(snapshot.cleared_at, 1);

        assert!(store.set(ConfigChange::symbol("  ")).is_err());
        assert_eq!(store.snapshot().cleared_at, 1);
    }
}
