//! Score change audit trail
//!
//! History rows are append-only. Writes go through a single background
//! worker so rows for a user land in the order their recomputes committed.
//! A failed append is logged and reported on the receipt; it never rolls back
//! the mutation that caused it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::HistoryRepository;
use crate::error::{TrustError, TrustResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScoreComponent {
    Vouches,
    Activity,
    TrustMoments,
}

impl ScoreComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreComponent::Vouches => "vouches",
            ScoreComponent::Activity => "activity",
            ScoreComponent::TrustMoments => "trustMoments",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vouches" => Some(ScoreComponent::Vouches),
            "activity" => Some(ScoreComponent::Activity),
            "trustMoments" => Some(ScoreComponent::TrustMoments),
            _ => None,
        }
    }
}

/// Why a score was recomputed
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCause {
    pub reason: String,
    pub component: Option<ScoreComponent>,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<String>,
}

impl ScoreCause {
    pub fn new(reason: impl Into<String>, component: Option<ScoreComponent>) -> Self {
        Self {
            reason: reason.into(),
            component,
            related_entity_type: None,
            related_entity_id: None,
        }
    }

    pub fn related(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.related_entity_type = Some(entity_type.to_string());
        self.related_entity_id = Some(entity_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScoreHistory {
    pub id: String,
    pub user_id: String,
    pub score: f64,
    pub previous_score: f64,
    pub change: f64,
    pub reason: String,
    pub component: Option<ScoreComponent>,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TrustScoreHistory {
    pub fn new(user_id: &str, score: f64, previous_score: f64, cause: &ScoreCause) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            score,
            previous_score,
            change: super::level::round2(score - previous_score),
            reason: cause.reason.clone(),
            component: cause.component,
            related_entity_type: cause.related_entity_type.clone(),
            related_entity_id: cause.related_entity_id.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of a single history append; dropping it is fine
#[must_use = "await the receipt or drop it explicitly"]
#[derive(Debug)]
pub struct RecordReceipt {
    rx: oneshot::Receiver<TrustResult<()>>,
}

impl RecordReceipt {
    pub async fn wait(self) -> TrustResult<()> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(TrustError::Storage("history recorder stopped".to_string())))
    }

    fn failed(error: TrustError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { rx }
    }
}

enum RecorderMsg {
    Append(TrustScoreHistory, oneshot::Sender<TrustResult<()>>),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget writer for score history
#[derive(Clone)]
pub struct HistoryRecorder {
    tx: mpsc::UnboundedSender<RecorderMsg>,
}

impl HistoryRecorder {
    /// Start the writer task on the current tokio runtime
    pub fn spawn(repo: Arc<dyn HistoryRepository>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RecorderMsg>();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    RecorderMsg::Append(entry, done) => {
                        let result = repo.append(&entry).await;
                        match &result {
                            Ok(()) => debug!(
                                user_id = %entry.user_id,
                                score = entry.score,
                                previous = entry.previous_score,
                                "Recorded score change"
                            ),
                            Err(e) => warn!(
                                user_id = %entry.user_id,
                                score = entry.score,
                                error = %e,
                                "Failed to record score history, audit trail has a gap"
                            ),
                        }
                        let _ = done.send(result);
                    }
                    RecorderMsg::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("History recorder stopped");
        });

        Self { tx }
    }

    /// Queue an entry without waiting for it to be written
    pub fn record(&self, entry: TrustScoreHistory) -> RecordReceipt {
        let (done, rx) = oneshot::channel();
        if self.tx.send(RecorderMsg::Append(entry, done)).is_err() {
            warn!("History recorder is not running, dropping entry");
            return RecordReceipt::failed(TrustError::Storage(
                "history recorder stopped".to_string(),
            ));
        }
        RecordReceipt { rx }
    }

    /// Resolve once every entry queued before this call has been processed
    pub async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(RecorderMsg::Flush(done)).is_ok() {
            let _ = rx.await;
        }
    }
}
