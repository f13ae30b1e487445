//! Vouch Ledger - request, response and revocation of vouches
//!
//! Every check-then-commit on a vouchee's slots runs under an in-process lock
//! for `(vouchee, type)`, and the store re-checks the limit inside its own
//! atomic commit, so concurrent approvals can never over-fill a slot set. The
//! store also refuses a second open vouch of one type from the same voucher.
//! Score-affecting transitions trigger a recompute of the vouchee once the
//! vouch itself has been committed.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::types::{
    has_open_vouch, slots_used, validate_text, CommitOutcome, Vouch, VouchAction, VouchLimits,
    VouchRequest, VouchStatus, VouchSummary, VouchTransition, VouchType, PENDING_ONLY, SLOT_STATUSES,
};
use crate::cache::ReadCaches;
use crate::config::ConfigProvider;
use crate::database::Store;
use crate::error::{TrustError, TrustResult};
use crate::locks::KeyedLocks;
use crate::models::{AccountabilityEvent, AccountabilityLog, User};
use crate::score::{vouches_component, ScoreCause, ScoreComponent, ScoreEngine, ScoreUpdate, VouchCounts};

/// A committed vouch and, when it moved the score, the vouchee's new score.
///
/// `score` is None when the transition has no score effect or when the
/// recompute failed after the vouch was committed (the failure is logged).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VouchOutcome {
    pub vouch: Vouch,
    #[serde(skip)]
    pub score: Option<ScoreUpdate>,
}

pub struct VouchLedger {
    store: Store,
    config: Arc<ConfigProvider>,
    engine: Arc<ScoreEngine>,
    caches: Arc<ReadCaches>,
    slot_locks: KeyedLocks<(String, VouchType)>,
}

impl VouchLedger {
    pub fn new(
        store: Store,
        config: Arc<ConfigProvider>,
        engine: Arc<ScoreEngine>,
        caches: Arc<ReadCaches>,
    ) -> Self {
        Self {
            store,
            config,
            engine,
            caches,
            slot_locks: KeyedLocks::new(),
        }
    }

    async fn lock_slots(&self, vouchee_id: &str, vouch_type: VouchType) -> OwnedMutexGuard<()> {
        self.slot_locks.lock((vouchee_id.to_string(), vouch_type)).await
    }

    async fn require_user(&self, user_id: &str) -> TrustResult<User> {
        self.store
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| TrustError::not_found("user", user_id))
    }

    async fn require_vouch(&self, vouch_id: &str) -> TrustResult<Vouch> {
        self.store
            .vouches
            .get_vouch(vouch_id)
            .await?
            .ok_or_else(|| TrustError::not_found("vouch", vouch_id))
    }

    /// Reject when the vouchee is full for the type or the pair already has an open vouch
    async fn check_open_slot(&self, request: &VouchRequest) -> TrustResult<()> {
        let received = self.store.vouches.vouches_for_vouchee(&request.vouchee_id).await?;

        let max = request.vouch_type.max_slots();
        if slots_used(&received, request.vouch_type) >= max {
            return Err(TrustError::LimitExceeded {
                vouch_type: request.vouch_type,
                max,
            });
        }

        if has_open_vouch(&received, &request.voucher_id, request.vouch_type, None) {
            return Err(TrustError::DuplicateRequest {
                voucher_id: request.voucher_id.clone(),
                vouchee_id: request.vouchee_id.clone(),
                vouch_type: request.vouch_type,
            });
        }

        Ok(())
    }

    async fn require_community_admin(&self, community_id: &str, admin_id: &str) -> TrustResult<()> {
        match self.store.communities.membership(community_id, admin_id).await? {
            Some(membership) if membership.role.can_vouch() => Ok(()),
            _ => Err(TrustError::Authorization(format!(
                "{} is not an admin or moderator of community {}",
                admin_id, community_id
            ))),
        }
    }

    async fn require_community_member(&self, community_id: &str, user_id: &str) -> TrustResult<()> {
        match self.store.communities.membership(community_id, user_id).await? {
            Some(_) => Ok(()),
            None => Err(TrustError::Authorization(format!(
                "{} is not a member of community {}",
                user_id, community_id
            ))),
        }
    }

    /// Ask `request.voucher_id` to vouch for `request.vouchee_id`; the vouch starts PENDING
    pub async fn request_vouch(&self, request: VouchRequest) -> TrustResult<VouchOutcome> {
        request.validate()?;
        if request.voucher_id == request.vouchee_id {
            return Err(TrustError::SelfVouch);
        }
        self.require_user(&request.voucher_id).await?;
        self.require_user(&request.vouchee_id).await?;

        match request.vouch_type {
            VouchType::Primary | VouchType::Secondary => {
                let connected = self
                    .store
                    .connections
                    .are_connected(&request.vouchee_id, &request.voucher_id)
                    .await?;
                if !connected {
                    return Err(TrustError::Authorization(format!(
                        "{} and {} are not connected",
                        request.vouchee_id, request.voucher_id
                    )));
                }
            }
            VouchType::Community => {
                let community_id = request.community_id.as_deref().unwrap_or_default();
                self.require_community_admin(community_id, &request.voucher_id).await?;
                self.require_community_member(community_id, &request.vouchee_id).await?;
            }
        }

        let _guard = self.lock_slots(&request.vouchee_id, request.vouch_type).await;
        self.check_open_slot(&request).await?;

        let weight = self.config.current().weights.per_slot(request.vouch_type);
        let vouch = Vouch::pending(&request, weight);
        let outcome = self.store.vouches.insert_vouch(&vouch).await?;
        refused(outcome, &vouch, vouch.vouch_type, "request")?;

        info!(
            vouch_id = %vouch.id,
            voucher_id = %vouch.voucher_id,
            vouchee_id = %vouch.vouchee_id,
            vouch_type = %vouch.vouch_type,
            "Vouch requested"
        );

        Ok(VouchOutcome { vouch, score: None })
    }

    /// The named voucher answers a pending request
    pub async fn respond_to_vouch_request(
        &self,
        vouch_id: &str,
        actor_id: &str,
        action: VouchAction,
        downgrade_to: Option<VouchType>,
    ) -> TrustResult<VouchOutcome> {
        let vouch = self.require_vouch(vouch_id).await?;
        if vouch.voucher_id != actor_id {
            return Err(TrustError::Authorization(format!(
                "only the voucher may respond to vouch {}",
                vouch_id
            )));
        }
        if vouch.status != VouchStatus::Pending {
            return Err(TrustError::invalid_transition(vouch.status, action.as_str()));
        }

        match action {
            VouchAction::Decline => self.decline(vouch).await,
            VouchAction::Approve => self.approve(vouch).await,
            VouchAction::Downgrade => match (vouch.vouch_type, downgrade_to) {
                (VouchType::Primary, Some(VouchType::Secondary)) => self.downgrade(vouch).await,
                (from, Some(to)) => Err(TrustError::Validation(format!(
                    "cannot downgrade a {} vouch to {}, only PRIMARY -> SECONDARY is allowed",
                    from, to
                ))),
                (_, None) => Err(TrustError::Validation(
                    "downgradeTo is required for a downgrade".to_string(),
                )),
            },
        }
    }

    async fn decline(&self, mut vouch: Vouch) -> TrustResult<VouchOutcome> {
        let transition = VouchTransition::from_vouch(&vouch, PENDING_ONLY, VouchStatus::Declined);
        self.commit(&vouch, &transition, "decline").await?;
        transition.apply(&mut vouch);

        // Declines carry no score effect; the row stays for analytics
        info!(vouch_id = %vouch.id, vouchee_id = %vouch.vouchee_id, "Vouch declined");
        Ok(VouchOutcome { vouch, score: None })
    }

    async fn approve(&self, mut vouch: Vouch) -> TrustResult<VouchOutcome> {
        let mut transition = VouchTransition::from_vouch(&vouch, PENDING_ONLY, VouchStatus::Approved);
        transition.approved_at = Some(Utc::now());

        {
            let _guard = self.lock_slots(&vouch.vouchee_id, vouch.vouch_type).await;
            self.commit(&vouch, &transition, "approve").await?;
        }
        transition.apply(&mut vouch);

        info!(
            vouch_id = %vouch.id,
            vouchee_id = %vouch.vouchee_id,
            vouch_type = %vouch.vouch_type,
            "Vouch approved"
        );

        let cause = ScoreCause::new("Vouch approved", Some(ScoreComponent::Vouches)).related("vouch", &vouch.id);
        let score = self.rescore(&vouch, cause).await;
        Ok(VouchOutcome { vouch, score })
    }

    /// Approve a pending PRIMARY request as SECONDARY
    async fn downgrade(&self, mut vouch: Vouch) -> TrustResult<VouchOutcome> {
        let mut transition = VouchTransition::from_vouch(&vouch, PENDING_ONLY, VouchStatus::Approved);
        transition.vouch_type = VouchType::Secondary;
        transition.weight_percentage = self.config.current().weights.per_slot(VouchType::Secondary);
        transition.approved_at = Some(Utc::now());

        {
            // Both slot sets change; lock in type order
            let _primary = self.lock_slots(&vouch.vouchee_id, VouchType::Primary).await;
            let _secondary = self.lock_slots(&vouch.vouchee_id, VouchType::Secondary).await;
            let received = self.store.vouches.vouches_for_vouchee(&vouch.vouchee_id).await?;
            if has_open_vouch(&received, &vouch.voucher_id, VouchType::Secondary, Some(&vouch.id)) {
                return Err(TrustError::DuplicateRequest {
                    voucher_id: vouch.voucher_id.clone(),
                    vouchee_id: vouch.vouchee_id.clone(),
                    vouch_type: VouchType::Secondary,
                });
            }
            self.commit(&vouch, &transition, "downgrade").await?;
        }
        transition.apply(&mut vouch);

        info!(
            vouch_id = %vouch.id,
            vouchee_id = %vouch.vouchee_id,
            "Vouch downgraded PRIMARY->SECONDARY"
        );

        let cause = ScoreCause::new("Vouch downgraded PRIMARY->SECONDARY", Some(ScoreComponent::Vouches))
            .related("vouch", &vouch.id);
        let score = self.rescore(&vouch, cause).await;
        Ok(VouchOutcome { vouch, score })
    }

    /// Only the original voucher may revoke an approved or active vouch
    pub async fn revoke_vouch(&self, vouch_id: &str, actor_id: &str, reason: Option<&str>) -> TrustResult<VouchOutcome> {
        validate_text("reason", reason)?;

        let mut vouch = self.require_vouch(vouch_id).await?;
        if vouch.voucher_id != actor_id {
            return Err(TrustError::Authorization(format!(
                "only the voucher may revoke vouch {}",
                vouch_id
            )));
        }
        if !vouch.status.occupies_slot() {
            return Err(TrustError::invalid_transition(vouch.status, "revoke"));
        }

        let mut transition = VouchTransition::from_vouch(&vouch, SLOT_STATUSES, VouchStatus::Revoked);
        transition.revoked_at = Some(Utc::now());
        transition.revoke_reason = reason.map(str::to_string);

        {
            let _guard = self.lock_slots(&vouch.vouchee_id, vouch.vouch_type).await;
            self.commit(&vouch, &transition, "revoke").await?;
        }
        transition.apply(&mut vouch);

        info!(
            vouch_id = %vouch.id,
            voucher_id = %vouch.voucher_id,
            vouchee_id = %vouch.vouchee_id,
            "Vouch revoked"
        );

        let cause = ScoreCause::new("Vouch revoked", Some(ScoreComponent::Vouches)).related("vouch", &vouch.id);
        let score = self.rescore(&vouch, cause).await;

        let impact = score
            .as_ref()
            .map(|update| update.new_score - update.previous_score)
            .unwrap_or(0.0);
        let log = AccountabilityLog::new(
            &vouch.voucher_id,
            &vouch.vouchee_id,
            Some(&vouch.id),
            AccountabilityEvent::VouchRevoked,
            impact,
            reason,
        );
        if let Err(e) = self.store.accountability.append_log(&log).await {
            warn!(vouch_id = %vouch.id, error = %e, "Failed to write accountability log");
        }

        Ok(VouchOutcome { vouch, score })
    }

    /// Admin-issued COMMUNITY vouch, approved immediately
    pub async fn create_community_vouch(
        &self,
        user_id: &str,
        community_id: &str,
        admin_id: &str,
        message: Option<&str>,
    ) -> TrustResult<VouchOutcome> {
        let mut request = VouchRequest::new(admin_id, user_id, VouchType::Community).with_community(community_id);
        request.message = message.map(str::to_string);
        request.validate()?;
        if admin_id == user_id {
            return Err(TrustError::SelfVouch);
        }
        self.require_user(admin_id).await?;
        self.require_user(user_id).await?;
        self.require_community_admin(community_id, admin_id).await?;
        self.require_community_member(community_id, user_id).await?;

        let weight = self.config.current().weights.per_slot(VouchType::Community);
        let vouch = Vouch::approved(&request, weight);
        {
            let _guard = self.lock_slots(user_id, VouchType::Community).await;
            self.check_open_slot(&request).await?;
            let outcome = self.store.vouches.insert_vouch(&vouch).await?;
            refused(outcome, &vouch, VouchType::Community, "create")?;
        }

        info!(
            vouch_id = %vouch.id,
            community_id = %community_id,
            admin_id = %admin_id,
            vouchee_id = %user_id,
            "Community vouch created"
        );

        let cause = ScoreCause::new("Community vouch created", Some(ScoreComponent::Vouches))
            .related("vouch", &vouch.id);
        let score = self.rescore(&vouch, cause).await;
        Ok(VouchOutcome { vouch, score })
    }

    async fn commit(&self, vouch: &Vouch, transition: &VouchTransition, action: &str) -> TrustResult<()> {
        let outcome = self.store.vouches.commit_transition(transition).await?;
        refused(outcome, vouch, transition.vouch_type, action)
    }

    /// Recompute the vouchee after a committed transition; failures are logged
    async fn rescore(&self, vouch: &Vouch, cause: ScoreCause) -> Option<ScoreUpdate> {
        // Voucher's given-vouch badges move with the vouch set
        self.caches.badges.invalidate(&vouch.voucher_id);

        match self.engine.recompute(&vouch.vouchee_id, cause).await {
            Ok(update) => Some(update),
            Err(e) => {
                warn!(
                    vouch_id = %vouch.id,
                    vouchee_id = %vouch.vouchee_id,
                    error = %e,
                    "Vouch committed but score recompute failed"
                );
                None
            }
        }
    }

    pub async fn get_vouches_received(&self, user_id: &str, status: Option<VouchStatus>) -> TrustResult<Vec<Vouch>> {
        self.require_user(user_id).await?;
        let mut vouches = self.store.vouches.vouches_for_vouchee(user_id).await?;
        if let Some(status) = status {
            vouches.retain(|v| v.status == status);
        }
        debug!(user_id = %user_id, count = vouches.len(), "Loaded received vouches");
        Ok(vouches)
    }

    pub async fn get_vouches_given(&self, user_id: &str, status: Option<VouchStatus>) -> TrustResult<Vec<Vouch>> {
        self.require_user(user_id).await?;
        let mut vouches = self.store.vouches.vouches_by_voucher(user_id).await?;
        if let Some(status) = status {
            vouches.retain(|v| v.status == status);
        }
        debug!(user_id = %user_id, count = vouches.len(), "Loaded given vouches");
        Ok(vouches)
    }

    pub async fn get_vouch_limits(&self, user_id: &str) -> TrustResult<VouchLimits> {
        self.require_user(user_id).await?;
        let received = self.store.vouches.vouches_for_vouchee(user_id).await?;
        Ok(VouchLimits::from_received(user_id, &received))
    }

    pub async fn get_vouch_summary(&self, user_id: &str) -> TrustResult<VouchSummary> {
        self.require_user(user_id).await?;
        let received = self.store.vouches.vouches_for_vouchee(user_id).await?;
        let given = self.store.vouches.vouches_by_voucher(user_id).await?;

        let given_with = |pred: fn(&VouchStatus) -> bool| given.iter().filter(|v| pred(&v.status)).count();
        let weights = self.config.current().weights;

        Ok(VouchSummary {
            user_id: user_id.to_string(),
            limits: VouchLimits::from_received(user_id, &received),
            pending_received: received
                .iter()
                .filter(|v| v.status == VouchStatus::Pending)
                .count(),
            active_given: given_with(VouchStatus::occupies_slot),
            pending_given: given_with(|s| *s == VouchStatus::Pending),
            declined_given: given_with(|s| *s == VouchStatus::Declined),
            revoked_given: given_with(|s| *s == VouchStatus::Revoked),
            vouches_points: vouches_component(VouchCounts::from_received(&received), &weights).points,
        })
    }
}

/// Caller-visible error for a commit the store refused
fn refused(outcome: CommitOutcome, vouch: &Vouch, vouch_type: VouchType, action: &str) -> TrustResult<()> {
    match outcome {
        CommitOutcome::Committed => Ok(()),
        CommitOutcome::SlotsFull => Err(TrustError::LimitExceeded {
            vouch_type,
            max: vouch_type.max_slots(),
        }),
        CommitOutcome::Duplicate => Err(TrustError::DuplicateRequest {
            voucher_id: vouch.voucher_id.clone(),
            vouchee_id: vouch.vouchee_id.clone(),
            vouch_type,
        }),
        CommitOutcome::StaleStatus(status) => Err(TrustError::invalid_transition(status, action)),
    }
}
