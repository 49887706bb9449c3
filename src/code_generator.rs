//! Plain-language strategy descriptions and standalone Python exports.

use crate::models::{Configuration, StrategyKind, StrategyParameters};
use crate::param_utils::{find_spec, get_param, INITIAL_CAPITAL_KEY};
use anyhow::anyhow;
use std::fmt::Write as _;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    Vectorbt,
    Backtrader,
}

impl FromStr for ScriptFlavor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vectorbt" | "vbt" => Ok(ScriptFlavor::Vectorbt),
            "backtrader" | "bt" => Ok(ScriptFlavor::Backtrader),
            other => Err(anyhow!("Unknown script flavor '{}'", other)),
        }
    }
}

/// Integral values print without a fractional part so windows read as `20`, not `20.0`.
fn num(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn param(kind: StrategyKind, params: &StrategyParameters, key: &str) -> String {
    let default = find_spec(kind, key).map(|spec| spec.default).unwrap_or(0.0);
    num(get_param(params, key, default))
}

pub fn pseudocode(kind: StrategyKind, params: &StrategyParameters) -> String {
    let p = |key: &str| param(kind, params, key);
    let steps: Vec<String> = match kind {
        StrategyKind::SmaCrossover | StrategyKind::EmaCrossover => {
            let average = if kind == StrategyKind::SmaCrossover {
                "Simple Moving Average (SMA)"
            } else {
                "Exponential Moving Average (EMA)"
            };
            vec![
                format!("Calculate the short {} over {} days.", average, p("shortWindow")),
                format!("Calculate the long {} over {} days.", average, p("longWindow")),
                "BUY SIGNAL: the short average crosses ABOVE the long average (golden cross).".to_string(),
                "SELL SIGNAL: the short average crosses BELOW the long average (death cross).".to_string(),
            ]
        }
        StrategyKind::RsiReversal => vec![
            format!("Calculate the Relative Strength Index (RSI) over {} days.", p("rsiPeriod")),
            format!("BUY SIGNAL: RSI drops below {} (oversold).", p("rsiOversold")),
            format!("SELL SIGNAL: RSI rises above {} (overbought).", p("rsiOverbought")),
        ],
        StrategyKind::BollingerBands => vec![
            format!(
                "Calculate a {}-day moving average with bands {} standard deviations above and below it.",
                p("bbPeriod"),
                p("bbStdDev")
            ),
            "BUY SIGNAL: the close falls below the lower band.".to_string(),
            "SELL SIGNAL: the close rises above the upper band.".to_string(),
        ],
        StrategyKind::Macd => vec![
            format!(
                "MACD line = EMA({}) minus EMA({}) of the close.",
                p("macdFast"),
                p("macdSlow")
            ),
            format!("Signal line = EMA({}) of the MACD line.", p("macdSignal")),
            "BUY SIGNAL: the MACD line crosses ABOVE the signal line.".to_string(),
            "SELL SIGNAL: the MACD line crosses BELOW the signal line.".to_string(),
        ],
        StrategyKind::Momentum => vec![
            format!("Calculate the {}-day rate of change (ROC) of the close.", p("rocPeriod")),
            "BUY SIGNAL: ROC crosses ABOVE zero.".to_string(),
            "SELL SIGNAL: ROC crosses BELOW zero.".to_string(),
        ],
    };

    let mut out = format!("LOGIC EXPLANATION ({}):\n", kind.as_str());
    for (i, step) in steps.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, step);
    }
    let _ = writeln!(
        out,
        "Orders fill on the next bar. Starting capital: {}.",
        p(INITIAL_CAPITAL_KEY)
    );
    out
}

pub fn export_script(config: &Configuration, flavor: ScriptFlavor) -> String {
    match flavor {
        ScriptFlavor::Vectorbt => vectorbt_script(config),
        ScriptFlavor::Backtrader => backtrader_script(config),
    }
}

fn vectorbt_signals(kind: StrategyKind, params: &StrategyParameters) -> String {
    let p = |key: &str| param(kind, params, key);
    match kind {
        StrategyKind::SmaCrossover | StrategyKind::EmaCrossover => {
            let ewm = if kind == StrategyKind::EmaCrossover { "True" } else { "False" };
            format!(
                "fast_ma = vbt.MA.run(close, {}, ewm={ewm})\n\
                 slow_ma = vbt.MA.run(close, {}, ewm={ewm})\n\
                 entries = fast_ma.ma_crossed_above(slow_ma)\n\
                 exits = fast_ma.ma_crossed_below(slow_ma)\n",
                p("shortWindow"),
                p("longWindow"),
                ewm = ewm
            )
        }
        StrategyKind::RsiReversal => format!(
            "rsi = vbt.RSI.run(close, window={})\n\
             entries = rsi.rsi_crossed_below({})\n\
             exits = rsi.rsi_crossed_above({})\n",
            p("rsiPeriod"),
            p("rsiOversold"),
            p("rsiOverbought")
        ),
        StrategyKind::BollingerBands => format!(
            "bb = vbt.BBANDS.run(close, window={}, alpha={})\n\
             entries = close < bb.lower\n\
             exits = close > bb.upper\n",
            p("bbPeriod"),
            p("bbStdDev")
        ),
        StrategyKind::Macd => format!(
            "macd = vbt.MACD.run(close, fast_window={}, slow_window={}, signal_window={})\n\
             entries = macd.macd_crossed_above(macd.signal)\n\
             exits = macd.macd_crossed_below(macd.signal)\n",
            p("macdFast"),
            p("macdSlow"),
            p("macdSignal")
        ),
        StrategyKind::Momentum => format!(
            "roc = close.pct_change({})\n\
             entries = (roc > 0) & (roc.shift(1) <= 0)\n\
             exits = (roc < 0) & (roc.shift(1) >= 0)\n",
            p("rocPeriod")
        ),
    }
}

fn vectorbt_script(config: &Configuration) -> String {
    let kind = config.strategy;
    format!(
        r#"import vectorbt as vbt
import yfinance as yf

# Configuration
SYMBOL = "{symbol}"
START = "{start}"
END = "{end}"
FEES = {fees}
SLIPPAGE = {slippage}
CAPITAL = {capital}

data = yf.Ticker(SYMBOL).history(start=START, end=END, auto_adjust=True)
close = data["Close"]
open_price = data["Open"]

# Strategy: {kind}
{signals}
# Signals fire on the close; execute on the next open
real_entries = entries.vbt.signals.fshift(1)
real_exits = exits.vbt.signals.fshift(1)

pf = vbt.Portfolio.from_signals(
    close=close,
    entries=real_entries,
    exits=real_exits,
    price=open_price,
    fees=FEES,
    slippage=SLIPPAGE,
    init_cash=CAPITAL,
    freq="1D",
    size=1.0,
    size_type="percent",
)

print(pf.stats())
pf.plot().show()
"#,
        symbol = config.symbol,
        start = config.start_date,
        end = config.end_date,
        fees = num(config.fee_rate),
        slippage = num(config.slippage_rate),
        capital = num(config.initial_capital()),
        kind = kind.as_str(),
        signals = vectorbt_signals(kind, &config.params),
    )
}

/// (indicator setup in `__init__`, entry condition, exit condition)
fn backtrader_logic(kind: StrategyKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        StrategyKind::SmaCrossover => (
            "        fast = bt.ind.SMA(self.data.close, period=self.p.shortWindow)\n        slow = bt.ind.SMA(self.data.close, period=self.p.longWindow)\n        self.cross = bt.ind.CrossOver(fast, slow)\n",
            "self.cross > 0",
            "self.cross < 0",
        ),
        StrategyKind::EmaCrossover => (
            "        fast = bt.ind.EMA(self.data.close, period=self.p.shortWindow)\n        slow = bt.ind.EMA(self.data.close, period=self.p.longWindow)\n        self.cross = bt.ind.CrossOver(fast, slow)\n",
            "self.cross > 0",
            "self.cross < 0",
        ),
        StrategyKind::RsiReversal => (
            "        self.rsi = bt.ind.RSI(self.data.close, period=self.p.rsiPeriod)\n",
            "self.rsi < self.p.rsiOversold",
            "self.rsi > self.p.rsiOverbought",
        ),
        StrategyKind::BollingerBands => (
            "        self.bb = bt.ind.BollingerBands(self.data.close, period=self.p.bbPeriod, devfactor=self.p.bbStdDev)\n",
            "self.data.close[0] < self.bb.lines.bot[0]",
            "self.data.close[0] > self.bb.lines.top[0]",
        ),
        StrategyKind::Macd => (
            "        macd = bt.ind.MACD(self.data.close, period_me1=self.p.macdFast, period_me2=self.p.macdSlow, period_signal=self.p.macdSignal)\n        self.cross = bt.ind.CrossOver(macd.macd, macd.signal)\n",
            "self.cross > 0",
            "self.cross < 0",
        ),
        StrategyKind::Momentum => (
            "        self.roc = bt.ind.RateOfChange(self.data.close, period=self.p.rocPeriod)\n        self.cross = bt.ind.CrossOver(self.roc, 0.0)\n",
            "self.cross > 0",
            "self.cross < 0",
        ),
    }
}

fn backtrader_script(config: &Configuration) -> String {
    let kind = config.strategy;
    let mut params = String::new();
    for (key, value) in &config.params {
        let _ = writeln!(params, "        (\"{}\", {}),", key, num(*value));
    }
    let (setup, entry, exit) = backtrader_logic(kind);

    format!(
        r#"import backtrader as bt
import yfinance as yf


class GeneratedStrategy(bt.Strategy):
    # {kind}
    params = (
{params}    )

    def __init__(self):
        self.order = None
{setup}
    def notify_order(self, order):
        if order.status in [order.Completed, order.Canceled, order.Margin, order.Rejected]:
            self.order = None

    def next(self):
        if self.order:
            return
        if not self.position:
            if {entry}:
                self.order = self.buy()
        elif {exit}:
            self.order = self.close()


if __name__ == "__main__":
    cerebro = bt.Cerebro()
    cerebro.addstrategy(GeneratedStrategy)
    frame = yf.download("{symbol}", start="{start}", end="{end}", auto_adjust=True)
    cerebro.adddata(bt.feeds.PandasData(dataname=frame))
    cerebro.broker.setcash({capital})
    cerebro.broker.setcommission(commission={fees})
    cerebro.broker.set_slippage_perc({slippage})
    cerebro.addsizer(bt.sizers.PercentSizer, percents=95)

    print("Starting Portfolio Value: %.2f" % cerebro.broker.getvalue())
    cerebro.run()
    print("Final Portfolio Value: %.2f" % cerebro.broker.getvalue())
    cerebro.plot()
"#,
        kind = kind.as_str(),
        params = params,
        setup = setup,
        entry = entry,
        exit = exit,
        symbol = config.symbol,
        start = config.start_date,
        end = config.end_date,
        capital = num(config.initial_capital()),
        fees = num(config.fee_rate),
        slippage = num(config.slippage_rate),
    )
}
