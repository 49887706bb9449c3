use super::{describe_configuration, print_result_summary, ConfigArgs};
use crate::config::parse_date;
use crate::config_store::ConfigChange;
use crate::context::{AppContext, SessionContext};
use crate::llm_client::Credentials;
use crate::models::{Intent, StrategyKind};
use crate::orchestrator::{OrchestratorPhase, OrchestratorView};
use anyhow::{anyhow, Result};
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands:
  symbol <SYMBOL>            change instrument
  range <START> <END>        change date range (YYYY-MM-DD)
  strategy <KIND>            switch strategy, parameters reset to defaults
  set <param> <value>        change one strategy parameter
  costs <fee> <slippage>     change cost assumptions
  highlight [DATE ...]       emphasise trades on these dates (none clears)
  run                        recompute the current configuration
  show                       print configuration and latest result
  save <name> | load <name>  saved strategies
  key [API_KEY]              set the assistant key for this session (none clears)
  notes                      print and clear pending alerts
  quit
Anything else is sent to the assistant.";

enum Step {
    Continue,
    Quit,
}

/// Interactive loop: edits and chat on stdin, results printed as the orchestrator applies
/// them.
pub async fn run(app: &AppContext, args: &ConfigArgs, user: &str) -> Result<()> {
    let mut session = app.login_with(user, args.to_configuration(app)?).await?;
    println!("Session {} for {}", session.id(), session.user());
    println!("{}", describe_configuration(&session.config()));
    println!("{}", HELP);

    let mut view_rx = session.subscribe_view();
    let mut last_shown: Option<(Option<u64>, bool)> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // Compute the starting configuration once.
    if let Err(err) = session.resubmit() {
        println!("Starting configuration rejected: {}", err);
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match handle_line(&mut session, line.trim()).await {
                    Ok(Step::Continue) => {}
                    Ok(Step::Quit) => break,
                    Err(err) => println!("! {}", err),
                }
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                report_view(&session, &view, &mut last_shown);
            }
        }
    }

    session.logout().await
}

fn report_view(
    session: &SessionContext,
    view: &OrchestratorView,
    last_shown: &mut Option<(Option<u64>, bool)>,
) {
    debug!("Orchestrator is {}", view.phase.as_str());
    if view.phase != OrchestratorPhase::Idle {
        return;
    }
    let key = (view.applied_version, view.error.is_some());
    if *last_shown == Some(key) {
        return;
    }
    *last_shown = Some(key);

    if let Some(err) = &view.error {
        println!("! Backtest failed: {}", err);
        return;
    }
    if let (Some(result), Some(projection)) = (view.result.as_ref(), session.projection()) {
        println!("= {}", describe_configuration(&session.config()));
        print_result_summary(result, &projection);
    }
}

async fn handle_line(session: &mut SessionContext, line: &str) -> Result<Step> {
    if line.is_empty() {
        return Ok(Step::Continue);
    }
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default().to_lowercase();
    let rest: Vec<&str> = words.collect();

    match (command.as_str(), rest.as_slice()) {
        ("quit" | "exit", _) => return Ok(Step::Quit),
        ("help", _) => println!("{}", HELP),
        ("symbol", [symbol]) => {
            session.set(ConfigChange::symbol(*symbol))?;
        }
        ("range", [start, end]) => {
            session.set(ConfigChange::date_range(parse_date(start)?, parse_date(end)?))?;
        }
        ("strategy", [kind]) => {
            let kind: StrategyKind = kind.parse()?;
            session.set(ConfigChange::strategy(kind))?;
        }
        ("set", [key, value]) => {
            let value: f64 = value
                .parse()
                .map_err(|_| anyhow!("'{}' is not a number", value))?;
            session.set(ConfigChange::parameter(*key, value))?;
        }
        ("costs", [fee, slippage]) => {
            let fee: f64 = fee.parse().map_err(|_| anyhow!("'{}' is not a number", fee))?;
            let slippage: f64 = slippage
                .parse()
                .map_err(|_| anyhow!("'{}' is not a number", slippage))?;
            session.set(ConfigChange::costs(fee, slippage))?;
        }
        ("highlight", dates) => {
            let dates = dates
                .iter()
                .map(|raw| parse_date(raw))
                .collect::<Result<Vec<_>>>()?;
            session.set_highlights(dates);
            if let (Some(result), Some(projection)) = (session.view().result, session.projection()) {
                print_result_summary(&result, &projection);
            }
        }
        ("run", []) => {
            session.resubmit()?;
        }
        ("show", []) => {
            let view = session.view();
            println!(
                "{} [{}{}]",
                describe_configuration(&session.config()),
                view.phase.as_str(),
                view.applied_version
                    .map(|version| format!(", showing v{}", version))
                    .unwrap_or_default()
            );
            if let (Some(result), Some(projection)) = (view.result, session.projection()) {
                print_result_summary(&result, &projection);
            }
        }
        ("save", [name]) => {
            let saved = session.save_strategy(name).await?;
            println!("Saved {}", saved.name);
        }
        ("load", [name]) => {
            let config = session.load_strategy(name).await?;
            println!("Loaded {}", describe_configuration(&config));
        }
        ("key", []) => {
            session.set_credentials(None);
            println!("Assistant key cleared");
        }
        ("key", [api_key]) => {
            let credentials =
                Credentials::new(*api_key).ok_or_else(|| anyhow!("The key must not be blank"))?;
            session.set_credentials(Some(credentials));
            println!("Assistant key set for this session");
        }
        ("notes", []) => {
            for note in session.notifier().drain() {
                println!("[{:?}] {}", note.level, note.message);
            }
        }
        _ => print_intent(&session.chat(line).await),
    }
    Ok(Step::Continue)
}

fn print_intent(intent: &Intent) {
    match intent {
        Intent::Configure { strategy, .. } => {
            println!("> Configured {}\n{}", strategy, intent.display_text())
        }
        Intent::Explain { topic, content } => println!("> {}\n{}", topic, content),
        Intent::Acknowledge { message } => println!("> {}", message),
        Intent::Error { message } => println!("! {}", message),
    }
}
