use crate::backtest_api_client::{build_async_client, ComputeService, HttpComputeService, SymbolMatch};
use crate::chat_router::ChatIntentRouter;
use crate::config::{settings_from_env, RuntimeSettings};
use crate::config_store::{ConfigChange, ConfigStore};
use crate::database::Database;
use crate::error::ValidationError;
use crate::llm_client::{ChatCompletionsClient, Credentials, LanguageModel};
use crate::models::{Configuration, Intent, Projection, StrategyKind};
use crate::notifier::Notifier;
use crate::orchestrator::{DebouncedOrchestrator, OrchestratorView};
use crate::projector::project;
use crate::storage::{KeyValueStore, MemoryStore, SavedStrategy, StrategyLibrary, SESSION_KEY};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_LOOKBACK_DAYS: i64 = 365;

/// Process-wide collaborators. Holds no user identity; that lives in `SessionContext`.
#[derive(Clone)]
pub struct AppContext {
    settings: RuntimeSettings,
    http: reqwest::Client,
    compute: Arc<dyn ComputeService>,
    model: Arc<dyn LanguageModel>,
    kv: Arc<dyn KeyValueStore>,
}

impl AppContext {
    /// Read settings from the environment and, when `database_url` is given, from the
    /// settings table (database values win). Without a database, persistence is in memory.
    pub async fn initialize(database_url: Option<String>) -> Result<Self> {
        let mut settings_map = settings_from_env();
        let kv: Arc<dyn KeyValueStore> = match database_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                let db = Database::new(url).await?;
                settings_map.extend(db.get_all_settings().await?);
                Arc::new(db)
            }
            _ => {
                warn!("DATABASE_URL not provided. Saved strategies will not outlive this process.");
                Arc::new(MemoryStore::new())
            }
        };
        let settings = RuntimeSettings::from_settings_map(&settings_map)?;

        let http = build_async_client(Some(HTTP_TIMEOUT))?;
        let compute: Arc<dyn ComputeService> = Arc::new(HttpComputeService::new(
            http.clone(),
            &settings.compute_api_url,
            settings.compute_api_secret.clone(),
        ));
        let model: Arc<dyn LanguageModel> = Arc::new(ChatCompletionsClient::new(
            http.clone(),
            &settings.llm_api_url,
            &settings.llm_model,
        ));

        Ok(Self {
            settings,
            http,
            compute,
            model,
            kv,
        })
    }

    pub fn from_components(
        settings: RuntimeSettings,
        compute: Arc<dyn ComputeService>,
        model: Arc<dyn LanguageModel>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            compute,
            model,
            kv,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn compute(&self) -> Arc<dyn ComputeService> {
        Arc::clone(&self.compute)
    }

    pub fn library(&self) -> StrategyLibrary {
        StrategyLibrary::new(Arc::clone(&self.kv))
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.settings
            .llm_api_key
            .as_deref()
            .and_then(Credentials::new)
    }

    pub async fn search_symbols(&self, query: &str) -> Vec<SymbolMatch> {
        HttpComputeService::new(
            self.http.clone(),
            &self.settings.compute_api_url,
            self.settings.compute_api_secret.clone(),
        )
        .search_symbols(query)
        .await
    }

    /// Default configuration: the configured symbol over the trailing year, SMA crossover.
    pub fn default_configuration(&self) -> Configuration {
        let end = Utc::now().date_naive();
        let start = end - ChronoDuration::days(DEFAULT_LOOKBACK_DAYS);
        let mut config = Configuration::new(
            self.settings.default_symbol.clone(),
            start,
            end,
            StrategyKind::SmaCrossover,
        );
        config.fee_rate = self.settings.default_fee_rate;
        config.slippage_rate = self.settings.default_slippage_rate;
        config
    }

    pub async fn login(&self, user: &str) -> Result<SessionContext> {
        self.login_with(user, self.default_configuration()).await
    }

    pub async fn login_with(&self, user: &str, initial: Configuration) -> Result<SessionContext> {
        let user = user.trim();
        if user.is_empty() {
            return Err(anyhow!("A user name is required to start a session"));
        }

        let record = SessionRecord {
            session_id: Uuid::new_v4(),
            user: user.to_string(),
            started_at: Utc::now(),
        };
        let store = ConfigStore::new(initial).context("initial configuration is invalid")?;
        self.kv
            .put(SESSION_KEY, &serde_json::to_string(&record)?)
            .await
            .context("failed to record session")?;

        let notifier = Notifier::new();
        let orchestrator = DebouncedOrchestrator::spawn(
            &store,
            Arc::clone(&self.compute),
            self.settings.debounce,
            notifier.clone(),
        );
        info!("Session {} started for {}", record.session_id, record.user);

        Ok(SessionContext {
            record,
            store,
            orchestrator,
            router: ChatIntentRouter::new(Arc::clone(&self.model)),
            notifier,
            library: self.library(),
            kv: Arc::clone(&self.kv),
            credentials: self.credentials(),
            highlights: BTreeSet::new(),
        })
    }

    /// The session marker left by the most recent login, if it was not logged out.
    pub async fn current_session(&self) -> Result<Option<SessionRecord>> {
        let Some(payload) = self.kv.get(SESSION_KEY).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&payload).context("session marker is malformed")?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub user: String,
    pub started_at: DateTime<Utc>,
}

/// Everything one user works with: a single configuration store, the orchestrator watching
/// it, the chat router and the highlight set.
pub struct SessionContext {
    record: SessionRecord,
    store: ConfigStore,
    orchestrator: DebouncedOrchestrator,
    router: ChatIntentRouter,
    notifier: Notifier,
    library: StrategyLibrary,
    kv: Arc<dyn KeyValueStore>,
    credentials: Option<Credentials>,
    highlights: BTreeSet<NaiveDate>,
}

impl SessionContext {
    pub fn id(&self) -> Uuid {
        self.record.session_id
    }

    pub fn user(&self) -> &str {
        &self.record.user
    }

    pub fn config(&self) -> Arc<Configuration> {
        self.store.get()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    /// Apply a manual edit. A rejected edit is reported to the notifier and changes nothing.
    pub fn set(&self, change: ConfigChange) -> Result<Arc<Configuration>, ValidationError> {
        self.store.set(change).map_err(|err| {
            self.notifier.warn(format!("Change rejected: {}", err));
            err
        })
    }

    /// Recompute the current configuration unchanged.
    pub fn resubmit(&self) -> Result<Arc<Configuration>, ValidationError> {
        self.set(ConfigChange::default())
    }

    pub async fn chat(&self, text: &str) -> Intent {
        let intent = self
            .router
            .route(text, &self.store, self.credentials.as_ref())
            .await;
        match &intent {
            Intent::Configure { strategy, .. } => {
                self.notifier.info(format!("Switched to {}", strategy))
            }
            Intent::Error { message } => self.notifier.warn(message.clone()),
            Intent::Explain { .. } | Intent::Acknowledge { .. } => {}
        }
        intent
    }

    pub fn highlights(&self) -> &BTreeSet<NaiveDate> {
        &self.highlights
    }

    /// Dates to emphasise in the next projection. Never touches configuration or results.
    pub fn set_highlights<I: IntoIterator<Item = NaiveDate>>(&mut self, dates: I) {
        self.highlights = dates.into_iter().collect();
    }

    pub fn view(&self) -> OrchestratorView {
        self.orchestrator.view()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<OrchestratorView> {
        self.orchestrator.subscribe()
    }

    /// Projection of the currently displayed result, `None` while nothing is shown.
    pub fn projection(&self) -> Option<Projection> {
        self.view()
            .result
            .map(|result| project(&result, &self.highlights))
    }

    pub async fn save_strategy(&self, name: &str) -> Result<SavedStrategy> {
        Ok(self.library.save(name, &self.config()).await?)
    }

    /// Restore a saved configuration through the normal change path.
    pub async fn load_strategy(&self, name: &str) -> Result<Arc<Configuration>> {
        let saved = self
            .library
            .load(name)
            .await?
            .ok_or_else(|| anyhow!("No saved strategy named '{}'", name.trim()))?;
        Ok(self.set(ConfigChange::from_configuration(&saved.config))?)
    }

    pub async fn logout(self) -> Result<()> {
        let id = self.record.session_id;
        let removed = self.kv.delete(SESSION_KEY).await;
        self.orchestrator.shutdown().await;
        removed.context("failed to clear session marker")?;
        info!("Session {} ended", id);
        Ok(())
    }
}
