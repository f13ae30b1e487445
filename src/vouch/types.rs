//! Vouch records, status lifecycle and slot accounting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{TrustError, TrustResult};

/// Maximum length of a vouch message or revoke reason
pub const MAX_MESSAGE_LEN: usize = 500;

/// Kind of endorsement. Declaration order doubles as lock acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VouchType {
    Primary,
    Secondary,
    Community,
}

impl VouchType {
    pub const ALL: [VouchType; 3] = [VouchType::Primary, VouchType::Secondary, VouchType::Community];

    /// Simultaneous APPROVED/ACTIVE vouches of this type a vouchee may hold
    pub fn max_slots(&self) -> usize {
        match self {
            VouchType::Primary => 1,
            VouchType::Secondary => 3,
            VouchType::Community => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VouchType::Primary => "PRIMARY",
            VouchType::Secondary => "SECONDARY",
            VouchType::Community => "COMMUNITY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRIMARY" => Some(VouchType::Primary),
            "SECONDARY" => Some(VouchType::Secondary),
            "COMMUNITY" => Some(VouchType::Community),
            _ => None,
        }
    }
}

impl fmt::Display for VouchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VouchStatus {
    Pending,
    Approved,
    Active,
    Declined,
    Revoked,
}

impl VouchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VouchStatus::Pending => "PENDING",
            VouchStatus::Approved => "APPROVED",
            VouchStatus::Active => "ACTIVE",
            VouchStatus::Declined => "DECLINED",
            VouchStatus::Revoked => "REVOKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(VouchStatus::Pending),
            "APPROVED" => Some(VouchStatus::Approved),
            "ACTIVE" => Some(VouchStatus::Active),
            "DECLINED" => Some(VouchStatus::Declined),
            "REVOKED" => Some(VouchStatus::Revoked),
            _ => None,
        }
    }

    /// Counts against the vouchee's slot limit
    pub fn occupies_slot(&self) -> bool {
        matches!(self, VouchStatus::Approved | VouchStatus::Active)
    }

    /// Blocks a second request of the same type between the same users
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            VouchStatus::Pending | VouchStatus::Approved | VouchStatus::Active
        )
    }
}

impl fmt::Display for VouchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Voucher's answer to a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VouchAction {
    Approve,
    Decline,
    /// Approve at a lower tier (PRIMARY -> SECONDARY only)
    Downgrade,
}

impl VouchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VouchAction::Approve => "approve",
            VouchAction::Decline => "decline",
            VouchAction::Downgrade => "downgrade",
        }
    }
}

/// A directed endorsement from voucher to vouchee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vouch {
    pub id: String,
    pub voucher_id: String,
    pub vouchee_id: String,
    pub vouch_type: VouchType,
    pub status: VouchStatus,
    pub weight_percentage: f64,
    /// Required iff `vouch_type` is COMMUNITY
    pub community_id: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
}

impl Vouch {
    pub fn pending(request: &VouchRequest, weight_percentage: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            voucher_id: request.voucher_id.clone(),
            vouchee_id: request.vouchee_id.clone(),
            vouch_type: request.vouch_type,
            status: VouchStatus::Pending,
            weight_percentage,
            community_id: request.community_id.clone(),
            message: request.message.clone(),
            created_at: Utc::now(),
            approved_at: None,
            revoked_at: None,
            revoke_reason: None,
        }
    }

    /// Created already approved, bypassing the request step
    pub fn approved(request: &VouchRequest, weight_percentage: f64) -> Self {
        let mut vouch = Self::pending(request, weight_percentage);
        vouch.status = VouchStatus::Approved;
        vouch.approved_at = Some(vouch.created_at);
        vouch
    }
}

/// Input for a new vouch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VouchRequest {
    pub voucher_id: String,
    pub vouchee_id: String,
    pub vouch_type: VouchType,
    pub community_id: Option<String>,
    pub message: Option<String>,
}

impl VouchRequest {
    pub fn new(voucher_id: &str, vouchee_id: &str, vouch_type: VouchType) -> Self {
        Self {
            voucher_id: voucher_id.to_string(),
            vouchee_id: vouchee_id.to_string(),
            vouch_type,
            community_id: None,
            message: None,
        }
    }

    pub fn with_community(mut self, community_id: &str) -> Self {
        self.community_id = Some(community_id.to_string());
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Shape checks only; identity and authorization are checked by the ledger
    pub fn validate(&self) -> TrustResult<()> {
        if self.voucher_id.trim().is_empty() || self.vouchee_id.trim().is_empty() {
            return Err(TrustError::Validation(
                "voucher and vouchee ids are required".to_string(),
            ));
        }

        match (self.vouch_type, &self.community_id) {
            (VouchType::Community, None) => {
                return Err(TrustError::Validation(
                    "communityId is required for COMMUNITY vouches".to_string(),
                ));
            }
            (VouchType::Community, Some(id)) if id.trim().is_empty() => {
                return Err(TrustError::Validation(
                    "communityId is required for COMMUNITY vouches".to_string(),
                ));
            }
            (VouchType::Primary | VouchType::Secondary, Some(_)) => {
                return Err(TrustError::Validation(format!(
                    "communityId is only allowed for COMMUNITY vouches, got {}",
                    self.vouch_type
                )));
            }
            _ => {}
        }

        validate_text("message", self.message.as_deref())
    }
}

pub(crate) fn validate_text(field: &str, text: Option<&str>) -> TrustResult<()> {
    match text {
        Some(t) if t.chars().count() > MAX_MESSAGE_LEN => Err(TrustError::Validation(format!(
            "{} exceeds {} characters",
            field, MAX_MESSAGE_LEN
        ))),
        _ => Ok(()),
    }
}

/// A status change committed atomically by the vouch repository
#[derive(Debug, Clone)]
pub struct VouchTransition {
    pub vouch_id: String,
    /// Statuses the vouch must currently be in for the commit to apply
    pub expected: &'static [VouchStatus],
    pub status: VouchStatus,
    pub vouch_type: VouchType,
    pub weight_percentage: f64,
    pub approved_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
}

impl VouchTransition {
    /// Keep everything of `vouch` except the status
    pub fn from_vouch(vouch: &Vouch, expected: &'static [VouchStatus], status: VouchStatus) -> Self {
        Self {
            vouch_id: vouch.id.clone(),
            expected,
            status,
            vouch_type: vouch.vouch_type,
            weight_percentage: vouch.weight_percentage,
            approved_at: vouch.approved_at,
            revoked_at: vouch.revoked_at,
            revoke_reason: vouch.revoke_reason.clone(),
        }
    }

    /// Apply the transition to an in-memory copy
    pub fn apply(&self, vouch: &mut Vouch) {
        vouch.status = self.status;
        vouch.vouch_type = self.vouch_type;
        vouch.weight_percentage = self.weight_percentage;
        vouch.approved_at = self.approved_at;
        vouch.revoked_at = self.revoked_at;
        vouch.revoke_reason = self.revoke_reason.clone();
    }

    /// Whether committing moves an open vouch into another type
    pub fn changes_type(&self, current: &Vouch) -> bool {
        self.status.is_open() && current.vouch_type != self.vouch_type
    }

    /// Whether committing needs a free slot of `vouch_type`
    pub fn claims_slot(&self, current: &Vouch) -> bool {
        self.status.occupies_slot()
            && !(current.status.occupies_slot() && current.vouch_type == self.vouch_type)
    }
}

/// Result of a conditional commit against the vouch store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Slot limit for the target type was already reached
    SlotsFull,
    /// Voucher already holds another open vouch of the target type for the vouchee
    Duplicate,
    /// Vouch was not in any of the expected statuses
    StaleStatus(VouchStatus),
}

pub const SLOT_STATUSES: &[VouchStatus] = &[VouchStatus::Approved, VouchStatus::Active];
pub const PENDING_ONLY: &[VouchStatus] = &[VouchStatus::Pending];

/// Count of slot-occupying vouches of `vouch_type` held by a vouchee
pub fn slots_used(vouches: &[Vouch], vouch_type: VouchType) -> usize {
    vouches
        .iter()
        .filter(|v| v.vouch_type == vouch_type && v.status.occupies_slot())
        .count()
}

/// Whether `voucher_id` already holds an open vouch of `vouch_type` among `vouches`
pub fn has_open_vouch(vouches: &[Vouch], voucher_id: &str, vouch_type: VouchType, excluding: Option<&str>) -> bool {
    vouches.iter().any(|v| {
        v.voucher_id == voucher_id
            && v.vouch_type == vouch_type
            && v.status.is_open()
            && excluding != Some(v.id.as_str())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotUsage {
    pub vouch_type: VouchType,
    pub max: usize,
    pub used: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VouchLimits {
    pub user_id: String,
    pub slots: Vec<SlotUsage>,
}

impl VouchLimits {
    pub fn from_received(user_id: &str, received: &[Vouch]) -> Self {
        let slots = VouchType::ALL
            .iter()
            .map(|t| {
                let used = slots_used(received, *t);
                SlotUsage {
                    vouch_type: *t,
                    max: t.max_slots(),
                    used,
                    available: t.max_slots().saturating_sub(used),
                }
            })
            .collect();

        Self {
            user_id: user_id.to_string(),
            slots,
        }
    }

    pub fn slot(&self, vouch_type: VouchType) -> Option<&SlotUsage> {
        self.slots.iter().find(|s| s.vouch_type == vouch_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VouchSummary {
    pub user_id: String,
    pub limits: VouchLimits,
    pub pending_received: usize,
    pub active_given: usize,
    pub pending_given: usize,
    pub declined_given: usize,
    pub revoked_given: usize,
    /// Current vouches component of the trust score
    pub vouches_points: f64,
}
