//! Leaderboard Service - ranked, percentile-annotated views of trust scores
//!
//! Candidates are active, non-deleted users with a positive score inside the
//! requested scope. Ordering is score descending, then user id ascending.
//! Equal scores share a rank: rank = users with a strictly higher score + 1.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::ReadCaches;
use crate::database::Store;
use crate::error::{TrustError, TrustResult};
use crate::models::User;
use crate::score::{level::round2, TrustLevel};

pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardScope {
    Global,
    Community,
    Friends,
}

/// Identifies one cached candidate list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Global,
    Community(String),
    Friends(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    pub requester_id: Option<String>,
    pub scope: LeaderboardScope,
    pub community_id: Option<String>,
    pub limit: usize,
}

impl LeaderboardQuery {
    pub fn global(limit: usize) -> Self {
        Self {
            requester_id: None,
            scope: LeaderboardScope::Global,
            community_id: None,
            limit,
        }
    }

    pub fn community(community_id: &str, limit: usize) -> Self {
        Self {
            community_id: Some(community_id.to_string()),
            scope: LeaderboardScope::Community,
            ..Self::global(limit)
        }
    }

    pub fn friends(requester_id: &str, limit: usize) -> Self {
        Self {
            requester_id: Some(requester_id.to_string()),
            scope: LeaderboardScope::Friends,
            ..Self::global(limit)
        }
    }

    pub fn requested_by(mut self, requester_id: &str) -> Self {
        self.requester_id = Some(requester_id.to_string());
        self
    }

    /// Validate and resolve the cache key for this query
    pub fn scope_key(&self) -> TrustResult<ScopeKey> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(TrustError::Validation(format!(
                "limit must be within 1-{}, got {}",
                MAX_LIMIT, self.limit
            )));
        }

        match self.scope {
            LeaderboardScope::Global => Ok(ScopeKey::Global),
            LeaderboardScope::Community => match self.community_id.as_deref() {
                Some(id) if !id.trim().is_empty() => Ok(ScopeKey::Community(id.to_string())),
                _ => Err(TrustError::Validation(
                    "communityId is required for the community leaderboard".to_string(),
                )),
            },
            LeaderboardScope::Friends => match self.requester_id.as_deref() {
                Some(id) if !id.trim().is_empty() => Ok(ScopeKey::Friends(id.to_string())),
                _ => Err(TrustError::Validation(
                    "requesterId is required for the friends leaderboard".to_string(),
                )),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub display_name: String,
    pub score: u32,
    pub level: TrustLevel,
    pub percentile: f64,
    pub is_requester: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub scope: LeaderboardScope,
    /// Candidates in scope before truncation
    pub total: usize,
    pub entries: Vec<LeaderboardEntry>,
    /// Requester's own position when it falls outside `entries`
    pub user_rank: Option<LeaderboardEntry>,
}

/// Username, or a stable pseudonym derived from the id
pub fn display_name(user: &User) -> String {
    match user.username.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            let digest = Sha256::digest(user.id.as_bytes());
            format!("Member {}", &hex::encode(digest)[..6])
        }
    }
}

/// Score descending, id ascending
pub fn sort_candidates(users: &mut [User]) {
    users.sort_by(|a, b| {
        b.trust_score
            .total_cmp(&a.trust_score)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Rank every user of an already sorted list
pub fn rank_all(sorted: &[User], requester_id: Option<&str>) -> Vec<LeaderboardEntry> {
    let total = sorted.len();
    let mut entries = Vec::with_capacity(total);
    let mut higher = 0;

    for (index, user) in sorted.iter().enumerate() {
        if index > 0 && sorted[index - 1].trust_score != user.trust_score {
            higher = index;
        }
        entries.push(LeaderboardEntry {
            rank: higher + 1,
            display_name: display_name(user),
            score: user.trust_score.round() as u32,
            level: user.trust_level,
            percentile: round2((total - higher) as f64 / total as f64 * 100.0),
            is_requester: requester_id == Some(user.id.as_str()),
        });
    }

    entries
}

pub struct LeaderboardService {
    store: Store,
    caches: Arc<ReadCaches>,
    read_timeout: Duration,
}

impl LeaderboardService {
    pub fn new(store: Store, caches: Arc<ReadCaches>, read_timeout: Duration) -> Self {
        Self {
            store,
            caches,
            read_timeout,
        }
    }

    pub async fn get_leaderboard(&self, query: &LeaderboardQuery) -> TrustResult<Leaderboard> {
        let key = query.scope_key()?;
        let candidates = self
            .caches
            .leaderboards
            .read_through(key.clone(), self.read_timeout, "leaderboard", self.load_candidates(&key))
            .await?;

        let requester = query.requester_id.as_deref();
        let mut ranked = rank_all(&candidates, requester);
        let requester_index = ranked.iter().position(|e| e.is_requester);

        let user_rank = match requester_index {
            Some(index) if index >= query.limit => Some(ranked[index].clone()),
            _ => None,
        };
        ranked.truncate(query.limit);

        debug!(
            scope = ?query.scope,
            total = candidates.len(),
            returned = ranked.len(),
            "Built leaderboard"
        );

        Ok(Leaderboard {
            scope: query.scope,
            total: candidates.len(),
            entries: ranked,
            user_rank,
        })
    }

    async fn load_candidates(&self, key: &ScopeKey) -> TrustResult<Arc<Vec<User>>> {
        let mut users = match key {
            ScopeKey::Global => self.store.users.ranked_users(None).await?,
            ScopeKey::Community(community_id) => {
                let members = self.store.communities.member_ids(community_id).await?;
                self.store.users.ranked_users(Some(&members)).await?
            }
            ScopeKey::Friends(requester_id) => {
                let mut ids: Vec<String> = self
                    .store
                    .connections
                    .connections(requester_id)
                    .await?
                    .into_iter()
                    .map(|c| c.peer_id)
                    .collect();
                ids.push(requester_id.clone());
                self.store.users.ranked_users(Some(&ids)).await?
            }
        };

        sort_candidates(&mut users);
        Ok(Arc::new(users))
    }
}
