use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_FEE_RATE: f64 = 0.001;
pub const DEFAULT_SLIPPAGE_RATE: f64 = 0.001;

/// Parameter values keyed by their wire name. Ordered so prompts, cache keys and
/// serialized payloads are stable.
pub type StrategyParameters = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    SmaCrossover,
    EmaCrossover,
    RsiReversal,
    BollingerBands,
    Macd,
    Momentum,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::SmaCrossover,
        StrategyKind::EmaCrossover,
        StrategyKind::RsiReversal,
        StrategyKind::BollingerBands,
        StrategyKind::Macd,
        StrategyKind::Momentum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SmaCrossover => "SMA_CROSSOVER",
            StrategyKind::EmaCrossover => "EMA_CROSSOVER",
            StrategyKind::RsiReversal => "RSI_REVERSAL",
            StrategyKind::BollingerBands => "BOLLINGER_BANDS",
            StrategyKind::Macd => "MACD",
            StrategyKind::Momentum => "MOMENTUM",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::SmaCrossover => "SMA crossover",
            StrategyKind::EmaCrossover => "EMA crossover",
            StrategyKind::RsiReversal => "RSI reversal",
            StrategyKind::BollingerBands => "Bollinger bands",
            StrategyKind::Macd => "MACD",
            StrategyKind::Momentum => "Momentum (rate of change)",
        }
    }

    /// Comma separated wire names, used in prompts and error messages.
    pub fn catalogue() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| anyhow!("Unknown strategy kind '{}'", s.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub strategy: StrategyKind,
    pub params: StrategyParameters,
    pub fee_rate: f64,
    pub slippage_rate: f64,
}

impl Configuration {
    /// Configuration with the strategy's default parameters and default cost assumptions.
    /// Not validated; hand it to `ConfigStore::new` for that.
    pub fn new<S: Into<String>>(
        symbol: S,
        start_date: NaiveDate,
        end_date: NaiveDate,
        strategy: StrategyKind,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            start_date,
            end_date,
            strategy,
            params: crate::param_utils::default_parameters(strategy),
            fee_rate: DEFAULT_FEE_RATE,
            slippage_rate: DEFAULT_SLIPPAGE_RATE,
        }
    }

    pub fn initial_capital(&self) -> f64 {
        crate::param_utils::get_param(
            &self.params,
            crate::param_utils::INITIAL_CAPITAL_KEY,
            crate::param_utils::DEFAULT_INITIAL_CAPITAL,
        )
    }
}

/// Immutable configuration snapshot tagged with the version assigned when it was scheduled.
#[derive(Debug, Clone)]
pub struct ComputationRequest {
    pub version: u64,
    pub config: Arc<Configuration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    #[serde(alias = "buy", alias = "Buy")]
    Buy,
    #[serde(alias = "sell", alias = "Sell")]
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl FromStr for TradeSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(anyhow!("Unknown trade side '{}'", other)),
        }
    }
}

/// One bar of the series returned by the compute service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPeriodRecord")]
pub struct PeriodRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<TradeSide>,
    #[serde(flatten)]
    pub indicators: BTreeMap<String, f64>,
}

impl PeriodRecord {
    /// Every finite numeric value on the bar that belongs on the price axis.
    pub fn axis_values(&self) -> impl Iterator<Item = f64> + '_ {
        [self.open, self.high, self.low, self.close]
            .into_iter()
            .chain(self.indicators.values().copied())
            .filter(|value| value.is_finite())
    }
}

#[derive(Deserialize)]
struct RawPeriodRecord {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    signal: Option<Value>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl From<RawPeriodRecord> for PeriodRecord {
    fn from(raw: RawPeriodRecord) -> Self {
        let signal = raw
            .signal
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|text| text.parse::<TradeSide>().ok());
        // Indicator warm-up periods come through as null and are simply absent here.
        let indicators = raw
            .extra
            .into_iter()
            .filter_map(|(key, value)| {
                value
                    .as_f64()
                    .filter(|number| number.is_finite())
                    .map(|number| (key, number))
            })
            .collect();

        Self {
            date: raw.date,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
            signal,
            indicators,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub side: TradeSide,
    pub price: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BacktestMetrics {
    pub total_return: f64,
    pub final_capital: f64,
    pub initial_capital: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub trade_count: i64,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    #[serde(rename = "data", default)]
    pub records: Vec<PeriodRecord>,
    #[serde(default)]
    pub trades: Vec<TradeEvent>,
    #[serde(default)]
    pub metrics: BacktestMetrics,
}

/// Classified outcome of one chat turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "intent", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Configure {
        strategy: StrategyKind,
        params: StrategyParameters,
        explanation: String,
    },
    Explain {
        topic: String,
        content: String,
    },
    Acknowledge {
        message: String,
    },
    Error {
        message: String,
    },
}

impl Intent {
    pub fn error<S: Into<String>>(message: S) -> Self {
        Intent::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Intent::Error { .. })
    }

    /// Text shown to the user in the chat transcript.
    pub fn display_text(&self) -> &str {
        match self {
            Intent::Configure { explanation, .. } => explanation,
            Intent::Explain { content, .. } => content,
            Intent::Acknowledge { message } | Intent::Error { message } => message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedRecord {
    pub index: usize,
    #[serde(flatten)]
    pub record: PeriodRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedTrade {
    pub index: usize,
    pub date: NaiveDate,
    pub side: TradeSide,
    pub price: f64,
    pub reason: String,
}

/// Render-ready view of a `BacktestResult`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub records: Vec<ProjectedRecord>,
    pub bounds: Option<AxisBounds>,
    pub buys: Vec<ProjectedTrade>,
    pub sells: Vec<ProjectedTrade>,
    pub split_index: usize,
    pub highlighted: Vec<ProjectedTrade>,
}
