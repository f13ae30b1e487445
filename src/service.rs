//! Trust Service - the operations exposed to callers
//!
//! Wires the ledger, score engine, history recorder, badge engine and
//! leaderboards around one store handle and one configuration provider.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::badges::{BadgeEngine, BadgeStatus};
use crate::cache::ReadCaches;
use crate::config::{ConfigProvider, EngineConfig, InactivityConfig};
use crate::database::Store;
use crate::error::{TrustError, TrustResult};
use crate::leaderboard::{Leaderboard, LeaderboardQuery, LeaderboardService};
use crate::score::{
    inactivity, DecayPolicy, HistoryRecorder, NoDecay, ScoreBreakdown, ScoreCause, ScoreComponent,
    ScoreEngine, ScoreUpdate, Suggestion, SweepReport, TrustScoreDetail, TrustScoreHistory,
};
use crate::vouch::{
    Vouch, VouchAction, VouchLedger, VouchLimits, VouchOutcome, VouchRequest, VouchStatus, VouchSummary,
    VouchType,
};

pub const MAX_HISTORY_LIMIT: usize = 100;

pub struct TrustService {
    store: Store,
    config: Arc<ConfigProvider>,
    recorder: HistoryRecorder,
    engine: Arc<ScoreEngine>,
    ledger: VouchLedger,
    badges: BadgeEngine,
    leaderboards: LeaderboardService,
    inactivity: InactivityConfig,
    decay: Arc<dyn DecayPolicy>,
}

impl TrustService {
    /// Build every component around `store`. Must run inside a tokio runtime.
    pub fn new(store: Store, config: &EngineConfig) -> TrustResult<Self> {
        let provider = Arc::new(ConfigProvider::from_config(config)?);
        let caches = Arc::new(ReadCaches::new(std::time::Duration::from_secs(config.cache.ttl_secs)));
        let recorder = HistoryRecorder::spawn(store.history.clone());
        let read_timeout = config.timeouts.read_timeout();

        let engine = Arc::new(ScoreEngine::new(
            store.clone(),
            provider.clone(),
            recorder.clone(),
            caches.clone(),
        ));
        let ledger = VouchLedger::new(store.clone(), provider.clone(), engine.clone(), caches.clone());
        let badges = BadgeEngine::new(store.clone(), provider.clone(), caches.clone(), read_timeout);
        let leaderboards = LeaderboardService::new(store.clone(), caches, read_timeout);

        info!(
            config_version = provider.version(),
            badges = config.badges.len(),
            postgres = store.is_postgres(),
            "Trust service initialized"
        );

        Ok(Self {
            store,
            config: provider,
            recorder,
            engine,
            ledger,
            badges,
            leaderboards,
            inactivity: config.inactivity.clone(),
            decay: Arc::new(NoDecay),
        })
    }

    pub fn with_decay_policy(mut self, policy: Arc<dyn DecayPolicy>) -> Self {
        self.decay = policy;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config_provider(&self) -> Arc<ConfigProvider> {
        self.config.clone()
    }

    pub fn history_recorder(&self) -> &HistoryRecorder {
        &self.recorder
    }

    // Vouch ledger

    pub async fn request_vouch(&self, request: VouchRequest) -> TrustResult<VouchOutcome> {
        self.ledger.request_vouch(request).await
    }

    pub async fn respond_to_vouch_request(
        &self,
        vouch_id: &str,
        actor_id: &str,
        action: VouchAction,
        downgrade_to: Option<VouchType>,
    ) -> TrustResult<VouchOutcome> {
        self.ledger
            .respond_to_vouch_request(vouch_id, actor_id, action, downgrade_to)
            .await
    }

    pub async fn revoke_vouch(&self, vouch_id: &str, actor_id: &str, reason: Option<&str>) -> TrustResult<VouchOutcome> {
        self.ledger.revoke_vouch(vouch_id, actor_id, reason).await
    }

    pub async fn create_community_vouch(
        &self,
        user_id: &str,
        community_id: &str,
        admin_id: &str,
        message: Option<&str>,
    ) -> TrustResult<VouchOutcome> {
        self.ledger
            .create_community_vouch(user_id, community_id, admin_id, message)
            .await
    }

    pub async fn get_vouches_received(&self, user_id: &str, status: Option<VouchStatus>) -> TrustResult<Vec<Vouch>> {
        self.ledger.get_vouches_received(user_id, status).await
    }

    pub async fn get_vouches_given(&self, user_id: &str, status: Option<VouchStatus>) -> TrustResult<Vec<Vouch>> {
        self.ledger.get_vouches_given(user_id, status).await
    }

    pub async fn get_vouch_limits(&self, user_id: &str) -> TrustResult<VouchLimits> {
        self.ledger.get_vouch_limits(user_id).await
    }

    pub async fn get_vouch_summary(&self, user_id: &str) -> TrustResult<VouchSummary> {
        self.ledger.get_vouch_summary(user_id).await
    }

    // Scores

    pub async fn compute_score(&self, user_id: &str) -> TrustResult<ScoreBreakdown> {
        self.engine.compute_score(user_id).await
    }

    pub async fn get_trust_score_detail(&self, user_id: &str) -> TrustResult<TrustScoreDetail> {
        self.engine.detail(user_id, &self.inactivity).await
    }

    pub async fn get_suggestions(&self, user_id: &str) -> TrustResult<Vec<Suggestion>> {
        self.engine.suggestions(user_id).await
    }

    /// Newest first
    pub async fn get_trust_score_history(&self, user_id: &str, limit: usize) -> TrustResult<Vec<TrustScoreHistory>> {
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(TrustError::Validation(format!(
                "limit must be within 1-{}, got {}",
                MAX_HISTORY_LIMIT, limit
            )));
        }
        if self.store.users.get_user(user_id).await?.is_none() {
            return Err(TrustError::not_found("user", user_id));
        }
        self.store.history.history_for_user(user_id, limit).await
    }

    /// Collaborators report activity or trust-moment changes through here
    pub async fn recompute_for_activity(
        &self,
        user_id: &str,
        reason: &str,
        component: Option<ScoreComponent>,
    ) -> TrustResult<ScoreUpdate> {
        if reason.trim().is_empty() {
            return Err(TrustError::Validation("reason cannot be empty".to_string()));
        }
        self.engine
            .recompute(user_id, ScoreCause::new(reason, component))
            .await
    }

    pub async fn run_inactivity_sweep(&self) -> TrustResult<SweepReport> {
        let users = self.store.users.active_users().await?;
        Ok(inactivity::sweep(&users, Utc::now(), &self.inactivity, self.decay.as_ref(), &self.engine).await)
    }

    // Read views

    pub async fn get_badges(&self, user_id: &str) -> TrustResult<Vec<BadgeStatus>> {
        self.badges.get_badges(user_id).await
    }

    pub async fn get_leaderboard(&self, query: &LeaderboardQuery) -> TrustResult<Leaderboard> {
        self.leaderboards.get_leaderboard(query).await
    }
}
