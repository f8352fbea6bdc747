//! Auto-reply service facade.
//!
//! Owns the live rule store and settings as one immutable snapshot behind an
//! [`ArcSwap`]. Readers (`handle_message`, `list_keywords`) load the current
//! snapshot without locking and therefore only ever observe a complete
//! state. Writers (`add_keyword`, `delete_keyword`, `reload`) are serialized
//! by a mutex that is held across the repository save.

use arc_swap::ArcSwap;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::commands::COMMAND_PREFIX;
use crate::config::{Settings, SettingsSource};
use crate::matcher::{KeywordMatch, MatchEngine};
use crate::repository::RuleRepository;
use crate::store::{AddOutcome, KeywordStore};

/// One consistent view of rules + settings, with regexes already compiled.
#[derive(Debug)]
pub struct ReplyState {
    pub store: KeywordStore,
    pub settings: Settings,
    engine: MatchEngine,
}

impl ReplyState {
    pub fn new(store: KeywordStore, settings: Settings) -> Self {
        let engine = MatchEngine::build(&store, &settings);
        Self {
            store,
            settings,
            engine,
        }
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }
}

/// Outcome of a mutating call plus whether it reached durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation<T> {
    pub outcome: T,
    /// `false` when the repository save failed. The in-memory change stands.
    pub persisted: bool,
}

pub struct AutoReplyService {
    repository: Arc<dyn RuleRepository>,
    settings_source: SettingsSource,
    state: ArcSwap<ReplyState>,
    write_lock: Mutex<()>,
}

impl AutoReplyService {
    /// Load rules and settings. Never fails; see [`RuleRepository::load`].
    pub async fn new(repository: Arc<dyn RuleRepository>, settings_source: SettingsSource) -> Self {
        let state = Self::load_state(repository.as_ref(), &settings_source).await;
        tracing::info!("关键词回复已加载，共 {} 个关键词规则", state.store.len());
        Self {
            repository,
            settings_source,
            state: ArcSwap::from_pointee(state),
            write_lock: Mutex::new(()),
        }
    }

    async fn load_state(repository: &dyn RuleRepository, source: &SettingsSource) -> ReplyState {
        let store = repository.load().await;
        let settings = source.resolve();
        ReplyState::new(store, settings)
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ReplyState> {
        self.state.load_full()
    }

    pub fn settings(&self) -> Settings {
        self.state.load().settings.clone()
    }

    // ------------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------------

    pub fn handle_message(&self, message: &str) -> Option<KeywordMatch> {
        self.handle_message_with(message, &mut rand::thread_rng())
    }

    /// Produce at most one reply for an inbound chat message.
    ///
    /// Returns `None` for empty text, command text, an empty store, a
    /// probability-gate miss, or when no keyword matches.
    pub fn handle_message_with<R: Rng + ?Sized>(&self, message: &str, rng: &mut R) -> Option<KeywordMatch> {
        let message = message.trim();
        if message.is_empty() || message.starts_with(COMMAND_PREFIX) {
            return None;
        }

        let state = self.state.load();
        if state.store.is_empty() {
            return None;
        }

        let draw: f64 = rng.gen();
        if draw >= state.settings.reply_probability {
            tracing::debug!(
                "概率门限未通过 ({:.3} >= {:.3})",
                draw,
                state.settings.reply_probability
            );
            return None;
        }

        let hit = state.engine.find_with(message, rng)?;
        if hit.reply.is_empty() {
            return None;
        }
        tracing::info!("检测到关键词 '{}'，回复：{}", hit.keyword, hit.reply);
        Some(hit)
    }

    /// `(keyword, replies)` in match priority order.
    pub fn list_keywords(&self) -> Vec<(String, Vec<String>)> {
        self.state
            .load()
            .store
            .iter()
            .map(|(k, replies)| (k.to_string(), replies.to_vec()))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------------

    pub async fn add_keyword(&self, keyword: &str, reply: &str) -> Mutation<AddOutcome> {
        let _guard = self.write_lock.lock().await;
        let current = self.state.load_full();

        let mut store = current.store.clone();
        let outcome = store.add(keyword, reply);
        let state = if outcome == AddOutcome::Duplicate {
            current
        } else {
            self.publish(ReplyState::new(store, current.settings.clone()))
        };

        let persisted = self.persist(&state.store).await;
        Mutation { outcome, persisted }
    }

    /// Returns whether the keyword existed.
    pub async fn delete_keyword(&self, keyword: &str) -> Mutation<bool> {
        let _guard = self.write_lock.lock().await;
        let current = self.state.load_full();

        let mut store = current.store.clone();
        if !store.remove(keyword) {
            return Mutation {
                outcome: false,
                persisted: true,
            };
        }

        let state = self.publish(ReplyState::new(store, current.settings.clone()));
        let persisted = self.persist(&state.store).await;
        Mutation {
            outcome: true,
            persisted,
        }
    }

    /// Re-read rules and settings from their sources, replacing both.
    /// Returns the number of rules now loaded.
    pub async fn reload(&self) -> usize {
        let _guard = self.write_lock.lock().await;
        let current = self.state.load_full();

        let mut store = current.store.clone();
        let previous = store.len();
        store.replace_all(self.repository.load().await);
        let count = store.len();

        let state = self.publish(ReplyState::new(store, self.settings_source.resolve()));
        tracing::info!("关键词回复配置已重新加载，共 {} 个关键词规则（之前 {} 个）", count, previous);
        let skipped = state.engine().skipped();
        if !skipped.is_empty() {
            tracing::warn!("{} 个关键词在当前设置下不会被匹配：{}", skipped.len(), skipped.join(", "));
        }
        count
    }

    /// Best-effort teardown hook.
    pub fn terminate(&self) {
        tracing::info!("关键词回复已卸载");
    }

    fn publish(&self, state: ReplyState) -> Arc<ReplyState> {
        let state = Arc::new(state);
        self.state.store(Arc::clone(&state));
        state
    }

    async fn persist(&self, store: &KeywordStore) -> bool {
        match self.repository.save(store).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("保存关键词配置失败：{}", e);
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
