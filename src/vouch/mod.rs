//! Vouches: typed, weighted endorsements between users

pub mod ledger;
pub mod types;

pub use ledger::{VouchLedger, VouchOutcome};
pub use types::{
    has_open_vouch, slots_used, CommitOutcome, SlotUsage, Vouch, VouchAction, VouchLimits, VouchRequest,
    VouchStatus, VouchSummary, VouchTransition, VouchType, MAX_MESSAGE_LEN, PENDING_ONLY, SLOT_STATUSES,
};
