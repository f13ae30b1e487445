//! In-memory store
//!
//! Implements every repository over tokio `RwLock` maps. Conditional vouch
//! commits run under a single write lock, which makes check-and-write atomic.
//! The `seed_*` helpers stand in for the collaborator modules that own users,
//! activity counters, memberships and connections.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{
    AccountabilityRepository, ActivityRepository, CommunityRepository, ConnectionRepository,
    HistoryRepository, UserRepository, VouchRepository,
};
use crate::error::{TrustError, TrustResult};
use crate::models::{
    AccountabilityLog, CommunityMembership, CommunityRole, Connection, TrustMoment, User, UserStat,
};
use crate::score::{TrustLevel, TrustScoreHistory};
use crate::vouch::{has_open_vouch, CommitOutcome, Vouch, VouchTransition, VouchType};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    vouches: RwLock<HashMap<String, Vouch>>,
    history: RwLock<Vec<TrustScoreHistory>>,
    stats: RwLock<HashMap<String, UserStat>>,
    moments: RwLock<Vec<TrustMoment>>,
    memberships: RwLock<Vec<CommunityMembership>>,
    connections: RwLock<Vec<Connection>>,
    accountability: RwLock<Vec<AccountabilityLog>>,
    fail_history: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn seed_user_stat(&self, user_id: &str, stat: UserStat) {
        self.stats.write().await.insert(user_id.to_string(), stat);
    }

    pub async fn seed_trust_moment(&self, moment: TrustMoment) {
        self.moments.write().await.push(moment);
    }

    pub async fn seed_membership(&self, community_id: &str, user_id: &str, role: CommunityRole) {
        self.memberships.write().await.push(CommunityMembership {
            community_id: community_id.to_string(),
            user_id: user_id.to_string(),
            role,
            joined_at: Utc::now(),
        });
    }

    /// Record an accepted connection in both directions
    pub async fn seed_connection(&self, a: &str, b: &str) {
        let now = Utc::now();
        let mut connections = self.connections.write().await;
        connections.push(Connection {
            user_id: a.to_string(),
            peer_id: b.to_string(),
            accepted_at: now,
        });
        connections.push(Connection {
            user_id: b.to_string(),
            peer_id: a.to_string(),
            accepted_at: now,
        });
    }

    pub async fn seed_vouch(&self, vouch: Vouch) {
        self.vouches.write().await.insert(vouch.id.clone(), vouch);
    }

    /// Make every history append fail, for exercising the best-effort path
    pub fn fail_history_writes(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub async fn all_vouches(&self) -> Vec<Vouch> {
        self.vouches.read().await.values().cloned().collect()
    }

    /// Another open vouch from the same voucher to the same vouchee with `vouch_type`
    fn open_vouch_exists(vouches: &HashMap<String, Vouch>, vouch: &Vouch, vouch_type: VouchType) -> bool {
        let pair: Vec<Vouch> = vouches
            .values()
            .filter(|v| v.vouchee_id == vouch.vouchee_id)
            .cloned()
            .collect();
        has_open_vouch(&pair, &vouch.voucher_id, vouch_type, Some(&vouch.id))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_user(&self, user_id: &str) -> TrustResult<Option<User>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn update_score(&self, user_id: &str, score: f64, level: TrustLevel) -> TrustResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| TrustError::not_found("user", user_id))?;
        user.trust_score = score;
        user.trust_level = level;
        Ok(())
    }

    async fn ranked_users(&self, among: Option<&[String]>) -> TrustResult<Vec<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .filter(|u| u.is_rankable())
            .filter(|u| among.map_or(true, |ids| ids.contains(&u.id)))
            .cloned()
            .collect())
    }

    async fn active_users(&self) -> TrustResult<Vec<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .filter(|u| u.is_active && u.deleted_at.is_none())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VouchRepository for MemoryStore {
    async fn get_vouch(&self, vouch_id: &str) -> TrustResult<Option<Vouch>> {
        Ok(self.vouches.read().await.get(vouch_id).cloned())
    }

    async fn vouches_for_vouchee(&self, vouchee_id: &str) -> TrustResult<Vec<Vouch>> {
        let vouches = self.vouches.read().await;
        let mut found: Vec<Vouch> = vouches
            .values()
            .filter(|v| v.vouchee_id == vouchee_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn vouches_by_voucher(&self, voucher_id: &str) -> TrustResult<Vec<Vouch>> {
        let vouches = self.vouches.read().await;
        let mut found: Vec<Vouch> = vouches
            .values()
            .filter(|v| v.voucher_id == voucher_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn insert_vouch(&self, vouch: &Vouch) -> TrustResult<CommitOutcome> {
        let mut vouches = self.vouches.write().await;

        if vouch.status.is_open() && Self::open_vouch_exists(&vouches, vouch, vouch.vouch_type) {
            return Ok(CommitOutcome::Duplicate);
        }

        if vouch.status.occupies_slot() {
            let used = vouches
                .values()
                .filter(|v| {
                    v.vouchee_id == vouch.vouchee_id
                        && v.vouch_type == vouch.vouch_type
                        && v.status.occupies_slot()
                })
                .count();
            if used >= vouch.vouch_type.max_slots() {
                return Ok(CommitOutcome::SlotsFull);
            }
        }

        vouches.insert(vouch.id.clone(), vouch.clone());
        Ok(CommitOutcome::Committed)
    }

    async fn commit_transition(&self, transition: &VouchTransition) -> TrustResult<CommitOutcome> {
        let mut vouches = self.vouches.write().await;

        let current = vouches
            .get(&transition.vouch_id)
            .cloned()
            .ok_or_else(|| TrustError::not_found("vouch", transition.vouch_id.as_str()))?;

        if !transition.expected.contains(&current.status) {
            return Ok(CommitOutcome::StaleStatus(current.status));
        }

        if transition.changes_type(&current) && Self::open_vouch_exists(&vouches, &current, transition.vouch_type) {
            return Ok(CommitOutcome::Duplicate);
        }

        if transition.claims_slot(&current) {
            let used = vouches
                .values()
                .filter(|v| {
                    v.id != current.id
                        && v.vouchee_id == current.vouchee_id
                        && v.vouch_type == transition.vouch_type
                        && v.status.occupies_slot()
                })
                .count();
            if used >= transition.vouch_type.max_slots() {
                return Ok(CommitOutcome::SlotsFull);
            }
        }

        if let Some(vouch) = vouches.get_mut(&transition.vouch_id) {
            transition.apply(vouch);
        }
        Ok(CommitOutcome::Committed)
    }
}

#[async_trait]
impl HistoryRepository for MemoryStore {
    async fn append(&self, entry: &TrustScoreHistory) -> TrustResult<()> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(TrustError::Storage("history store unavailable".to_string()));
        }
        self.history.write().await.push(entry.clone());
        Ok(())
    }

    async fn history_for_user(&self, user_id: &str, limit: usize) -> TrustResult<Vec<TrustScoreHistory>> {
        let history = self.history.read().await;
        // rows are pushed in commit order
        Ok(history
            .iter()
            .rev()
            .filter(|h| h.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ActivityRepository for MemoryStore {
    async fn user_stat(&self, user_id: &str) -> TrustResult<UserStat> {
        Ok(self
            .stats
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn trust_moments_received(&self, user_id: &str) -> TrustResult<Vec<TrustMoment>> {
        Ok(self
            .moments
            .read()
            .await
            .iter()
            .filter(|m| m.receiver_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CommunityRepository for MemoryStore {
    async fn membership(&self, community_id: &str, user_id: &str) -> TrustResult<Option<CommunityMembership>> {
        Ok(self
            .memberships
            .read()
            .await
            .iter()
            .find(|m| m.community_id == community_id && m.user_id == user_id)
            .cloned())
    }

    async fn memberships_for_user(&self, user_id: &str) -> TrustResult<Vec<CommunityMembership>> {
        Ok(self
            .memberships
            .read()
            .await
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn member_ids(&self, community_id: &str) -> TrustResult<Vec<String>> {
        Ok(self
            .memberships
            .read()
            .await
            .iter()
            .filter(|m| m.community_id == community_id)
            .map(|m| m.user_id.clone())
            .collect())
    }
}

#[async_trait]
impl ConnectionRepository for MemoryStore {
    async fn connections(&self, user_id: &str) -> TrustResult<Vec<Connection>> {
        Ok(self
            .connections
            .read()
            .await
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountabilityRepository for MemoryStore {
    async fn append_log(&self, log: &AccountabilityLog) -> TrustResult<()> {
        self.accountability.write().await.push(log.clone());
        Ok(())
    }

    async fn logs_for_voucher(&self, voucher_id: &str) -> TrustResult<Vec<AccountabilityLog>> {
        Ok(self
            .accountability
            .read()
            .await
            .iter()
            .filter(|l| l.voucher_id == voucher_id)
            .cloned()
            .collect())
    }
}
