//! Integration tests for the trust engine
//!
//! These tests drive the public service end to end against the in-memory
//! store: vouch lifecycle and slot limits, score composition, history
//! ordering, badges, leaderboards and the inactivity sweep.

use chrono::{Duration, Utc};
use std::sync::Arc;
use trust_engine::database::{AccountabilityRepository, HistoryRepository, UserRepository};
use trust_engine::{
    AccountabilityEvent, AccountabilityLog, BadgeDefinition, BadgeMetric, BadgeTier, CommunityRole,
    DecayPolicy, EngineConfig, LeaderboardQuery, MemoryStore, ScoreComponent, Store, TierThresholds,
    TrustError, TrustLevel, TrustMoment, TrustService, User, UserStat, Vouch, VouchAction,
    VouchRequest, VouchStatus, VouchType, VouchWeights,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Service over a fresh in-memory store with default configuration
async fn create_test_service() -> (Arc<MemoryStore>, TrustService) {
    create_test_service_with(EngineConfig::default()).await
}

async fn create_test_service_with(config: EngineConfig) -> (Arc<MemoryStore>, TrustService) {
    let memory = Arc::new(MemoryStore::new());
    let service = TrustService::new(Store::in_memory(memory.clone()), &config).unwrap();
    (memory, service)
}

async fn seed_users(memory: &MemoryStore, ids: &[&str]) {
    for id in ids {
        memory.seed_user(User::new(id, Some(id))).await;
    }
}

/// User with a stored score, for read-path tests
fn scored_user(id: &str, score: f64) -> User {
    let mut user = User::new(id, Some(id));
    user.trust_score = score;
    user.trust_level = TrustLevel::from_score(score);
    user
}

/// Connect, request and approve a vouch from `voucher` to `vouchee`
async fn approved_vouch(
    memory: &MemoryStore,
    service: &TrustService,
    voucher: &str,
    vouchee: &str,
    vouch_type: VouchType,
) -> Vouch {
    memory.seed_connection(voucher, vouchee).await;
    let pending = service
        .request_vouch(VouchRequest::new(voucher, vouchee, vouch_type))
        .await
        .unwrap()
        .vouch;
    service
        .respond_to_vouch_request(&pending.id, voucher, VouchAction::Approve, None)
        .await
        .unwrap()
        .vouch
}

/// Slot-occupying vouch written straight into the store
fn seeded_vouch(voucher: &str, vouchee: &str, vouch_type: VouchType, status: VouchStatus) -> Vouch {
    let mut request = VouchRequest::new(voucher, vouchee, vouch_type);
    if vouch_type == VouchType::Community {
        request = request.with_community("c1");
    }
    let mut vouch = Vouch::approved(&request, VouchWeights::default().per_slot(vouch_type));
    vouch.status = status;
    vouch
}

async fn stored_score(memory: &MemoryStore, user_id: &str) -> f64 {
    memory.get_user(user_id).await.unwrap().unwrap().trust_score
}

// ============================================================================
// Vouch Lifecycle & Slot Limits
// ============================================================================

mod slot_limits {
    use super::*;

    #[tokio::test]
    async fn test_primary_slot_holds_one_vouch() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo", "cy", "dee"]).await;
        memory.seed_connection("ana", "bo").await;
        memory.seed_connection("ana", "cy").await;
        memory.seed_connection("ana", "dee").await;

        // Two pending requests may coexist while the slot is free
        let first = service
            .request_vouch(VouchRequest::new("bo", "ana", VouchType::Primary))
            .await
            .unwrap()
            .vouch;
        let second = service
            .request_vouch(VouchRequest::new("cy", "ana", VouchType::Primary))
            .await
            .unwrap()
            .vouch;

        service
            .respond_to_vouch_request(&first.id, "bo", VouchAction::Approve, None)
            .await
            .unwrap();

        let overflow = service
            .respond_to_vouch_request(&second.id, "cy", VouchAction::Approve, None)
            .await;
        assert!(matches!(
            overflow,
            Err(TrustError::LimitExceeded {
                vouch_type: VouchType::Primary,
                max: 1
            })
        ));

        let late = service
            .request_vouch(VouchRequest::new("dee", "ana", VouchType::Primary))
            .await;
        assert!(matches!(late, Err(TrustError::LimitExceeded { .. })));

        let limits = service.get_vouch_limits("ana").await.unwrap();
        assert_eq!(limits.slot(VouchType::Primary).unwrap().used, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_approvals_never_exceed_limit() {
        let (memory, service) = create_test_service().await;
        let service = Arc::new(service);
        memory.seed_user(User::new("target", None)).await;

        let mut pending = Vec::new();
        for i in 0..10 {
            let voucher = format!("voucher-{}", i);
            memory.seed_user(User::new(&voucher, None)).await;
            memory.seed_connection(&voucher, "target").await;
            let vouch = service
                .request_vouch(VouchRequest::new(&voucher, "target", VouchType::Secondary))
                .await
                .unwrap()
                .vouch;
            pending.push((vouch.id, voucher));
        }

        let mut handles = Vec::new();
        for (vouch_id, voucher) in pending {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .respond_to_vouch_request(&vouch_id, &voucher, VouchAction::Approve, None)
                    .await
            }));
        }

        let mut approved = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => approved += 1,
                Err(TrustError::LimitExceeded { .. }) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(approved, 3);
        assert_eq!(rejected, 7);

        let occupying = memory
            .all_vouches()
            .await
            .into_iter()
            .filter(|v| v.vouchee_id == "target" && v.status.occupies_slot())
            .count();
        assert_eq!(occupying, 3);
        assert_eq!(stored_score(&memory, "target").await, 12.0);
    }

    #[tokio::test]
    async fn test_revoked_vouch_frees_its_slot() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo", "cy"]).await;

        let vouch = approved_vouch(&memory, &service, "bo", "ana", VouchType::Primary).await;
        service.revoke_vouch(&vouch.id, "bo", None).await.unwrap();

        let replacement = approved_vouch(&memory, &service, "cy", "ana", VouchType::Primary).await;
        assert_eq!(replacement.status, VouchStatus::Approved);
    }

    #[tokio::test]
    async fn test_downgrade_rechecks_secondary_slots() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "p", "s1", "s2", "s3"]).await;
        for voucher in ["s1", "s2", "s3"] {
            approved_vouch(&memory, &service, voucher, "ana", VouchType::Secondary).await;
        }

        memory.seed_connection("p", "ana").await;
        let primary = service
            .request_vouch(VouchRequest::new("p", "ana", VouchType::Primary))
            .await
            .unwrap()
            .vouch;
        let result = service
            .respond_to_vouch_request(&primary.id, "p", VouchAction::Downgrade, Some(VouchType::Secondary))
            .await;
        assert!(matches!(
            result,
            Err(TrustError::LimitExceeded {
                vouch_type: VouchType::Secondary,
                ..
            })
        ));

        // Still pending and still approvable as PRIMARY
        let outcome = service
            .respond_to_vouch_request(&primary.id, "p", VouchAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(outcome.vouch.vouch_type, VouchType::Primary);
    }

    #[tokio::test]
    async fn test_downgrade_refuses_second_secondary_from_same_voucher() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo"]).await;
        memory.seed_connection("bo", "ana").await;

        let primary = service
            .request_vouch(VouchRequest::new("bo", "ana", VouchType::Primary))
            .await
            .unwrap()
            .vouch;
        let secondary = service
            .request_vouch(VouchRequest::new("bo", "ana", VouchType::Secondary))
            .await
            .unwrap()
            .vouch;
        service
            .respond_to_vouch_request(&secondary.id, "bo", VouchAction::Approve, None)
            .await
            .unwrap();

        let result = service
            .respond_to_vouch_request(&primary.id, "bo", VouchAction::Downgrade, Some(VouchType::Secondary))
            .await;
        assert!(matches!(
            result,
            Err(TrustError::DuplicateRequest {
                vouch_type: VouchType::Secondary,
                ..
            })
        ));

        let open_secondaries = memory
            .all_vouches()
            .await
            .into_iter()
            .filter(|v| v.voucher_id == "bo" && v.vouch_type == VouchType::Secondary && v.status.is_open())
            .count();
        assert_eq!(open_secondaries, 1);
        assert_eq!(stored_score(&memory, "ana").await, 4.0);

        let untouched = service
            .get_vouches_received("ana", Some(VouchStatus::Pending))
            .await
            .unwrap();
        assert_eq!(untouched.len(), 1);
        assert_eq!(untouched[0].vouch_type, VouchType::Primary);
    }
}

mod vouch_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_decline_is_neutral() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo"]).await;
        memory
            .seed_user_stat(
                "ana",
                UserStat {
                    events_attended: 3,
                    ..Default::default()
                },
            )
            .await;
        service
            .recompute_for_activity("ana", "Attended events", Some(ScoreComponent::Activity))
            .await
            .unwrap();
        let before = service.compute_score("ana").await.unwrap();

        memory.seed_connection("bo", "ana").await;
        let pending = service
            .request_vouch(VouchRequest::new("bo", "ana", VouchType::Primary))
            .await
            .unwrap()
            .vouch;
        let declined = service
            .respond_to_vouch_request(&pending.id, "bo", VouchAction::Decline, None)
            .await
            .unwrap();

        assert_eq!(declined.vouch.status, VouchStatus::Declined);
        assert!(declined.score.is_none());
        assert_eq!(service.compute_score("ana").await.unwrap(), before);
        assert_eq!(stored_score(&memory, "ana").await, before.total);

        // The declined row is kept
        let received = service
            .get_vouches_received("ana", Some(VouchStatus::Declined))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_reverses_approve() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo"]).await;
        memory
            .seed_user_stat(
                "ana",
                UserStat {
                    events_hosted: 2,
                    ..Default::default()
                },
            )
            .await;
        service
            .recompute_for_activity("ana", "Hosted events", Some(ScoreComponent::Activity))
            .await
            .unwrap();
        let before = stored_score(&memory, "ana").await;
        assert_eq!(before, 6.0);

        let vouch = approved_vouch(&memory, &service, "bo", "ana", VouchType::Primary).await;
        assert_eq!(stored_score(&memory, "ana").await, 18.0);

        let revoked = service
            .revoke_vouch(&vouch.id, "bo", Some("no longer in touch"))
            .await
            .unwrap();
        assert_eq!(revoked.vouch.status, VouchStatus::Revoked);
        assert!(revoked.vouch.revoked_at.is_some());
        assert_eq!(stored_score(&memory, "ana").await, before);
    }

    #[tokio::test]
    async fn test_only_open_states_transition() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo"]).await;
        memory.seed_connection("bo", "ana").await;

        let pending = service
            .request_vouch(VouchRequest::new("bo", "ana", VouchType::Secondary))
            .await
            .unwrap()
            .vouch;

        let early_revoke = service.revoke_vouch(&pending.id, "bo", None).await;
        assert!(matches!(
            early_revoke,
            Err(TrustError::InvalidStateTransition {
                from: VouchStatus::Pending,
                ..
            })
        ));

        service
            .respond_to_vouch_request(&pending.id, "bo", VouchAction::Decline, None)
            .await
            .unwrap();
        let second_answer = service
            .respond_to_vouch_request(&pending.id, "bo", VouchAction::Approve, None)
            .await;
        assert!(matches!(
            second_answer,
            Err(TrustError::InvalidStateTransition {
                from: VouchStatus::Declined,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_downgrade_replaces_primary_with_secondary() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo"]).await;
        memory.seed_connection("bo", "ana").await;

        let pending = service
            .request_vouch(VouchRequest::new("bo", "ana", VouchType::Primary).with_message("old friend"))
            .await
            .unwrap()
            .vouch;
        let outcome = service
            .respond_to_vouch_request(&pending.id, "bo", VouchAction::Downgrade, Some(VouchType::Secondary))
            .await
            .unwrap();

        assert_eq!(outcome.vouch.vouch_type, VouchType::Secondary);
        assert_eq!(outcome.vouch.message.as_deref(), Some("old friend"));
        let update = outcome.score.unwrap();
        assert_eq!(update.new_score, 4.0);
        update.receipt.unwrap().wait().await.unwrap();

        let history = service.get_trust_score_history("ana", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, "Vouch downgraded PRIMARY->SECONDARY");
        assert_eq!(history[0].component, Some(ScoreComponent::Vouches));

        let limits = service.get_vouch_limits("ana").await.unwrap();
        assert_eq!(limits.slot(VouchType::Primary).unwrap().available, 1);
        assert_eq!(limits.slot(VouchType::Secondary).unwrap().used, 1);
    }

    #[tokio::test]
    async fn test_community_request_path() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "mod", "outsider"]).await;
        memory.seed_membership("c1", "mod", CommunityRole::Moderator).await;

        // Vouchee must belong to the community
        let not_member = service
            .request_vouch(VouchRequest::new("mod", "ana", VouchType::Community).with_community("c1"))
            .await;
        assert!(matches!(not_member, Err(TrustError::Authorization(_))));

        memory.seed_membership("c1", "ana", CommunityRole::Member).await;
        let pending = service
            .request_vouch(VouchRequest::new("mod", "ana", VouchType::Community).with_community("c1"))
            .await
            .unwrap()
            .vouch;
        assert_eq!(pending.status, VouchStatus::Pending);
        assert_eq!(pending.community_id.as_deref(), Some("c1"));

        let approved = service
            .respond_to_vouch_request(&pending.id, "mod", VouchAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(approved.score.unwrap().new_score, 8.0);

        let outsider = service.create_community_vouch("ana", "c1", "outsider", None).await;
        assert!(matches!(outsider, Err(TrustError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_community_vouch_is_immediately_approved() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "admin1", "admin2", "admin3"]).await;
        memory.seed_membership("c1", "ana", CommunityRole::Member).await;
        for admin in ["admin1", "admin2", "admin3"] {
            memory.seed_membership("c1", admin, CommunityRole::Admin).await;
        }

        let first = service
            .create_community_vouch("ana", "c1", "admin1", Some("runs our meetups"))
            .await
            .unwrap();
        assert_eq!(first.vouch.status, VouchStatus::Approved);
        assert!(first.vouch.approved_at.is_some());

        service.create_community_vouch("ana", "c1", "admin2", None).await.unwrap();
        assert_eq!(stored_score(&memory, "ana").await, 16.0);

        let third = service.create_community_vouch("ana", "c1", "admin3", None).await;
        assert!(matches!(
            third,
            Err(TrustError::LimitExceeded {
                vouch_type: VouchType::Community,
                max: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_revoke_writes_accountability_entry() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo"]).await;
        let vouch = approved_vouch(&memory, &service, "bo", "ana", VouchType::Secondary).await;

        service.revoke_vouch(&vouch.id, "bo", Some("no-show twice")).await.unwrap();

        let logs = memory.logs_for_voucher("bo").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].vouchee_id, "ana");
        assert_eq!(logs[0].vouch_id.as_deref(), Some(vouch.id.as_str()));
        assert_eq!(logs[0].event, AccountabilityEvent::VouchRevoked);
        assert_eq!(logs[0].impact, -4.0);
    }

    #[tokio::test]
    async fn test_summary_and_listing() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo", "cy"]).await;
        approved_vouch(&memory, &service, "bo", "ana", VouchType::Primary).await;
        approved_vouch(&memory, &service, "bo", "cy", VouchType::Secondary).await;
        memory.seed_connection("cy", "ana").await;
        service
            .request_vouch(VouchRequest::new("cy", "ana", VouchType::Secondary))
            .await
            .unwrap();

        let given = service.get_vouches_given("bo", None).await.unwrap();
        assert_eq!(given.len(), 2);
        assert!(given[0].created_at >= given[1].created_at);

        let summary = service.get_vouch_summary("ana").await.unwrap();
        assert_eq!(summary.pending_received, 1);
        assert_eq!(summary.vouches_points, 12.0);

        let voucher = service.get_vouch_summary("bo").await.unwrap();
        assert_eq!(voucher.active_given, 2);
        assert_eq!(voucher.pending_given, 0);
    }
}

// ============================================================================
// Errors & Authorization
// ============================================================================

mod errors {
    use super::*;

    #[tokio::test]
    async fn test_self_vouch_rejected() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana"]).await;

        let result = service
            .request_vouch(VouchRequest::new("ana", "ana", VouchType::Primary))
            .await;
        assert_eq!(result.unwrap_err(), TrustError::SelfVouch);
    }

    #[tokio::test]
    async fn test_validation_precedes_state_change() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo"]).await;
        memory.seed_connection("ana", "bo").await;

        let long = "x".repeat(501);
        let too_long = service
            .request_vouch(VouchRequest::new("bo", "ana", VouchType::Primary).with_message(&long))
            .await;
        assert!(matches!(too_long, Err(TrustError::Validation(_))));

        let missing_community = service
            .request_vouch(VouchRequest::new("bo", "ana", VouchType::Community))
            .await;
        assert!(matches!(missing_community, Err(TrustError::Validation(_))));

        assert!(memory.all_vouches().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entities() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana"]).await;

        let vouch = service
            .respond_to_vouch_request("missing", "ana", VouchAction::Approve, None)
            .await;
        assert!(matches!(vouch, Err(TrustError::NotFound { entity: "vouch", .. })));

        let user = service
            .request_vouch(VouchRequest::new("ghost", "ana", VouchType::Primary))
            .await;
        assert!(matches!(user, Err(TrustError::NotFound { entity: "user", .. })));

        assert!(matches!(
            service.get_badges("ghost").await,
            Err(TrustError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_voucher_may_revoke() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo", "cy"]).await;
        let vouch = approved_vouch(&memory, &service, "bo", "ana", VouchType::Primary).await;

        let by_vouchee = service.revoke_vouch(&vouch.id, "ana", None).await;
        assert!(matches!(by_vouchee, Err(TrustError::Authorization(_))));
        let by_stranger = service.revoke_vouch(&vouch.id, "cy", None).await;
        assert!(matches!(by_stranger, Err(TrustError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_history_limit_validated() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana"]).await;
        assert!(matches!(
            service.get_trust_score_history("ana", 0).await,
            Err(TrustError::Validation(_))
        ));
        assert!(service.get_trust_score_history("ana", 10).await.unwrap().is_empty());
    }
}

// ============================================================================
// Score Composition
// ============================================================================

mod scoring {
    use super::*;

    async fn seed_full_vouches(memory: &MemoryStore, user_id: &str) {
        memory
            .seed_vouch(seeded_vouch("p1", user_id, VouchType::Primary, VouchStatus::Approved))
            .await;
        for voucher in ["s1", "s2", "s3"] {
            memory
                .seed_vouch(seeded_vouch(voucher, user_id, VouchType::Secondary, VouchStatus::Approved))
                .await;
        }
        memory
            .seed_vouch(seeded_vouch("c1", user_id, VouchType::Community, VouchStatus::Approved))
            .await;
        memory
            .seed_vouch(seeded_vouch("c2", user_id, VouchType::Community, VouchStatus::Active))
            .await;
    }

    async fn seed_full_activity(memory: &MemoryStore, user_id: &str) {
        memory
            .seed_user_stat(
                user_id,
                UserStat {
                    events_attended: 5,
                    events_hosted: 3,
                    communities_joined: 3,
                    services_provided: 5,
                    ..Default::default()
                },
            )
            .await;
    }

    async fn seed_perfect_moments(memory: &MemoryStore, user_id: &str) {
        for i in 0..10 {
            memory
                .seed_trust_moment(TrustMoment::new(&format!("giver-{}", i), user_id, 5, "event"))
                .await;
        }
    }

    #[tokio::test]
    async fn test_full_vouches_component() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana"]).await;
        seed_full_vouches(&memory, "ana").await;

        let breakdown = service.compute_score("ana").await.unwrap();
        assert_eq!(breakdown.vouches.primary_points, 12.0);
        assert_eq!(breakdown.vouches.secondary_points, 12.0);
        assert_eq!(breakdown.vouches.community_points, 16.0);
        assert_eq!(breakdown.vouches.points, 40.0);
    }

    #[tokio::test]
    async fn test_capped_activity_component() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana"]).await;
        seed_full_activity(&memory, "ana").await;

        let breakdown = service.compute_score("ana").await.unwrap();
        assert_eq!(breakdown.activity.points, 30.0);
        assert_eq!(breakdown.total, 30.0);
        assert_eq!(breakdown.level, TrustLevel::Starter);
    }

    #[tokio::test]
    async fn test_trust_moments_component() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana"]).await;
        seed_perfect_moments(&memory, "ana").await;

        let breakdown = service.compute_score("ana").await.unwrap();
        assert_eq!(breakdown.trust_moments.count, 10);
        assert_eq!(breakdown.trust_moments.points, 30.0);
    }

    #[tokio::test]
    async fn test_composite_reaches_leader() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana"]).await;
        seed_full_vouches(&memory, "ana").await;
        seed_full_activity(&memory, "ana").await;
        seed_perfect_moments(&memory, "ana").await;

        let update = service
            .recompute_for_activity("ana", "Backfill", None)
            .await
            .unwrap();
        assert_eq!(update.new_score, 100.0);
        assert_eq!(update.level, TrustLevel::Leader);

        let user = memory.get_user("ana").await.unwrap().unwrap();
        assert_eq!(user.trust_score, 100.0);
        assert_eq!(user.trust_level, TrustLevel::Leader);
    }

    #[tokio::test]
    async fn test_score_always_bounded() {
        let (memory, service) = create_test_service().await;
        for events in [0u32, 1, 4, 50] {
            for moments in [0usize, 1, 7, 40] {
                let id = format!("u-{}-{}", events, moments);
                memory.seed_user(User::new(&id, None)).await;
                memory
                    .seed_user_stat(
                        &id,
                        UserStat {
                            events_attended: events,
                            events_hosted: events,
                            communities_joined: events,
                            services_provided: events,
                            ..Default::default()
                        },
                    )
                    .await;
                for i in 0..moments {
                    let rating = (i % 5 + 1) as u8;
                    memory
                        .seed_trust_moment(TrustMoment::new("g", &id, rating, "service"))
                        .await;
                }

                let breakdown = service.compute_score(&id).await.unwrap();
                assert!((0.0..=100.0).contains(&breakdown.total));
                assert_eq!(breakdown.level, TrustLevel::from_score(breakdown.total));
            }
        }
    }

    #[tokio::test]
    async fn test_reweighting_applies_to_next_recompute() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana"]).await;
        memory
            .seed_vouch(seeded_vouch("p1", "ana", VouchType::Primary, VouchStatus::Approved))
            .await;

        assert_eq!(service.compute_score("ana").await.unwrap().vouches.points, 12.0);

        let provider = service.config_provider();
        let version = provider
            .replace(
                VouchWeights {
                    primary: 50.0,
                    secondary: 25.0,
                    community: 25.0,
                },
                provider.current().badges.clone(),
            )
            .unwrap();

        let breakdown = service.compute_score("ana").await.unwrap();
        assert_eq!(breakdown.vouches.points, 20.0);
        assert_eq!(breakdown.config_version, version);

        // Invalid weights keep the current snapshot
        let invalid = VouchWeights {
            primary: 90.0,
            secondary: 90.0,
            community: 90.0,
        };
        assert!(provider.replace(invalid, vec![]).is_err());
        assert_eq!(provider.version(), version);
    }

    #[tokio::test]
    async fn test_detail_and_suggestions() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana"]).await;
        memory
            .seed_user_stat(
                "ana",
                UserStat {
                    events_attended: 5,
                    ..Default::default()
                },
            )
            .await;
        service
            .recompute_for_activity("ana", "Attended events", Some(ScoreComponent::Activity))
            .await
            .unwrap();

        let detail = service.get_trust_score_detail("ana").await.unwrap();
        assert_eq!(detail.score, 10.0);
        assert_eq!(detail.level, TrustLevel::Starter);
        assert_eq!(detail.next_level.points_remaining, 21.0);
        assert_eq!(detail.breakdown.activity.events_attended_points, 10.0);

        let suggestions = service.get_suggestions("ana").await.unwrap();
        assert!(!suggestions.is_empty());
        assert!(suggestions.iter().all(|s| s.action != "Attend more events"));
        for pair in suggestions.windows(2) {
            assert!(pair[0].potential_points >= pair[1].potential_points);
        }
    }
}

// ============================================================================
// Score History
// ============================================================================

mod history {
    use super::*;

    #[tokio::test]
    async fn test_rows_chain_previous_scores() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo", "cy", "dee"]).await;

        let primary = approved_vouch(&memory, &service, "bo", "ana", VouchType::Primary).await;
        approved_vouch(&memory, &service, "cy", "ana", VouchType::Secondary).await;
        memory
            .seed_user_stat(
                "ana",
                UserStat {
                    events_hosted: 1,
                    ..Default::default()
                },
            )
            .await;
        service
            .recompute_for_activity("ana", "Hosted an event", Some(ScoreComponent::Activity))
            .await
            .unwrap();
        service.revoke_vouch(&primary.id, "bo", None).await.unwrap();
        approved_vouch(&memory, &service, "dee", "ana", VouchType::Secondary).await;

        service.history_recorder().flush().await;
        let rows = service.get_trust_score_history("ana", 50).await.unwrap();
        assert_eq!(rows.len(), 5);

        // newest first: each row's previous score is the score of the row after it
        for pair in rows.windows(2) {
            assert_eq!(pair[0].previous_score, pair[1].score);
        }
        assert_eq!(rows.last().unwrap().previous_score, 0.0);
        assert_eq!(rows[0].score, stored_score(&memory, "ana").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recomputes_keep_chain() {
        let (memory, service) = create_test_service().await;
        let service = Arc::new(service);
        memory.seed_user(User::new("ana", None)).await;

        let mut handles = Vec::new();
        for i in 1..=8u32 {
            let memory = memory.clone();
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                memory
                    .seed_user_stat(
                        "ana",
                        UserStat {
                            services_provided: i,
                            ..Default::default()
                        },
                    )
                    .await;
                service
                    .recompute_for_activity("ana", "Service provided", Some(ScoreComponent::Activity))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        service.history_recorder().flush().await;
        let rows = memory.history_for_user("ana", 100).await.unwrap();
        assert!(!rows.is_empty());
        for pair in rows.windows(2) {
            assert_eq!(pair[0].previous_score, pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_history_failure_does_not_block_vouch() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo"]).await;
        memory.fail_history_writes(true);

        memory.seed_connection("bo", "ana").await;
        let pending = service
            .request_vouch(VouchRequest::new("bo", "ana", VouchType::Primary))
            .await
            .unwrap()
            .vouch;
        let outcome = service
            .respond_to_vouch_request(&pending.id, "bo", VouchAction::Approve, None)
            .await
            .unwrap();

        assert_eq!(outcome.vouch.status, VouchStatus::Approved);
        let update = outcome.score.unwrap();
        assert_eq!(update.new_score, 12.0);
        assert!(matches!(
            update.receipt.unwrap().wait().await,
            Err(TrustError::Storage(_))
        ));
        assert_eq!(stored_score(&memory, "ana").await, 12.0);
        assert!(service.get_trust_score_history("ana", 10).await.unwrap().is_empty());
    }
}

// ============================================================================
// Badges
// ============================================================================

mod badges {
    use super::*;

    fn badge<'a>(badges: &'a [trust_engine::BadgeStatus], badge_type: &str) -> &'a trust_engine::BadgeStatus {
        badges.iter().find(|b| b.badge_type == badge_type).unwrap()
    }

    #[tokio::test]
    async fn test_default_badges_evaluated() {
        let (memory, service) = create_test_service().await;
        let mut ana = scored_user("ana", 52.4);
        ana.created_at = Utc::now() - Duration::days(100);
        memory.seed_user(ana).await;
        for i in 0..6 {
            memory.seed_connection("ana", &format!("friend-{}", i)).await;
        }
        memory
            .seed_user_stat(
                "ana",
                UserStat {
                    events_attended: 12,
                    events_no_show: 1,
                    ..Default::default()
                },
            )
            .await;

        let badges = service.get_badges("ana").await.unwrap();
        assert_eq!(badges.len(), 8);

        let connector = badge(&badges, "CONNECTOR");
        assert_eq!(connector.value, 6);
        assert_eq!(connector.tier, Some(BadgeTier::Bronze));
        assert!(connector.earned_at.is_some());
        assert_eq!(connector.next_tier.unwrap().remaining, 9);

        let champion = badge(&badges, "TRUST_CHAMPION");
        assert_eq!(champion.value, 52);
        assert_eq!(champion.tier, Some(BadgeTier::Silver));

        let reliable = badge(&badges, "RELIABLE");
        assert_eq!(reliable.value, 12);
        assert_eq!(reliable.tier, Some(BadgeTier::Silver));

        let veteran = badge(&badges, "VETERAN");
        assert_eq!(veteran.tier, Some(BadgeTier::Silver));
        assert!(veteran.earned_at.is_some());

        let voucher = badge(&badges, "TRUSTED_VOUCHER");
        assert_eq!(voucher.tier, None);
        assert_eq!(voucher.next_tier.unwrap().remaining, 1);
    }

    #[tokio::test]
    async fn test_giving_a_vouch_refreshes_voucher_badges() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["ana", "bo"]).await;

        let before = service.get_badges("bo").await.unwrap();
        assert_eq!(badge(&before, "TRUSTED_VOUCHER").tier, None);

        approved_vouch(&memory, &service, "bo", "ana", VouchType::Secondary).await;

        let after = service.get_badges("bo").await.unwrap();
        assert_eq!(badge(&after, "TRUSTED_VOUCHER").tier, Some(BadgeTier::Bronze));
    }

    #[tokio::test]
    async fn test_impact_counts_positive_entries() {
        let (memory, service) = create_test_service().await;
        seed_users(&memory, &["bo"]).await;
        for impact in [2.0, 0.5, -3.0] {
            memory
                .append_log(&AccountabilityLog::new(
                    "bo",
                    "ana",
                    None,
                    AccountabilityEvent::PositiveOutcome,
                    impact,
                    None,
                ))
                .await
                .unwrap();
        }

        let badges = service.get_badges("bo").await.unwrap();
        let impact = badge(&badges, "IMPACT_MAKER");
        assert_eq!(impact.value, 2);
        assert_eq!(impact.tier, Some(BadgeTier::Bronze));
    }

    #[tokio::test]
    async fn test_badges_defined_purely_in_config() {
        let mut config = EngineConfig::default();
        config.badges = vec![BadgeDefinition::new(
            "REGULAR",
            "Regular",
            BadgeMetric::EventsAttended,
            TierThresholds::new(2, 4, 8, 16),
        )];
        let (memory, service) = create_test_service_with(config).await;
        seed_users(&memory, &["ana"]).await;
        memory
            .seed_user_stat(
                "ana",
                UserStat {
                    events_attended: 9,
                    ..Default::default()
                },
            )
            .await;

        let badges = service.get_badges("ana").await.unwrap();
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].tier, Some(BadgeTier::Gold));
        assert_eq!(badges[0].next_tier.unwrap().remaining, 7);
        assert_eq!(badges[0].earned_at, None);
    }

    #[tokio::test]
    async fn test_tier_monotonic_in_value() {
        let (memory, service) = create_test_service().await;
        let mut previous = None;
        for attended in 0..60u32 {
            let id = format!("u{}", attended);
            memory.seed_user(User::new(&id, None)).await;
            memory
                .seed_user_stat(
                    &id,
                    UserStat {
                        events_attended: attended,
                        ..Default::default()
                    },
                )
                .await;

            let badges = service.get_badges(&id).await.unwrap();
            let enthusiast = badge(&badges, "EVENT_ENTHUSIAST");
            assert!(enthusiast.tier >= previous);
            previous = enthusiast.tier;
        }
        assert_eq!(previous, Some(BadgeTier::Platinum));
    }
}

// ============================================================================
// Leaderboards
// ============================================================================

mod leaderboards {
    use super::*;

    async fn seed_board(memory: &MemoryStore) {
        memory.seed_user(scored_user("a", 80.0)).await;
        memory.seed_user(scored_user("b", 65.5)).await;
        memory.seed_user(scored_user("c", 65.5)).await;
        memory.seed_user(scored_user("d", 40.0)).await;
        memory.seed_user(scored_user("e", 12.0)).await;
        memory.seed_user(scored_user("zero", 0.0)).await;

        let mut deleted = scored_user("gone", 99.0);
        deleted.deleted_at = Some(Utc::now());
        memory.seed_user(deleted).await;

        let mut inactive = scored_user("idle", 90.0);
        inactive.is_active = false;
        memory.seed_user(inactive).await;
    }

    #[tokio::test]
    async fn test_global_ranking() {
        let (memory, service) = create_test_service().await;
        seed_board(&memory).await;

        let board = service
            .get_leaderboard(&LeaderboardQuery::global(10))
            .await
            .unwrap();
        assert_eq!(board.total, 5);

        let names: Vec<_> = board.entries.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        let ranks: Vec<_> = board.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4, 5]);

        assert_eq!(board.entries[0].percentile, 100.0);
        assert_eq!(board.entries[2].percentile, 80.0);
        assert_eq!(board.entries[4].percentile, 20.0);
        assert_eq!(board.entries[1].score, 66);
        assert!(board.user_rank.is_none());
    }

    #[tokio::test]
    async fn test_requester_outside_window_gets_user_rank() {
        let (memory, service) = create_test_service().await;
        seed_board(&memory).await;

        let board = service
            .get_leaderboard(&LeaderboardQuery::global(2).requested_by("d"))
            .await
            .unwrap();
        assert_eq!(board.entries.len(), 2);
        let own = board.user_rank.unwrap();
        assert_eq!(own.rank, 4);
        assert!(own.is_requester);

        let inside = service
            .get_leaderboard(&LeaderboardQuery::global(3).requested_by("b"))
            .await
            .unwrap();
        assert!(inside.user_rank.is_none());
        assert!(inside.entries[1].is_requester);

        let unranked = service
            .get_leaderboard(&LeaderboardQuery::global(3).requested_by("zero"))
            .await
            .unwrap();
        assert!(unranked.user_rank.is_none());
    }

    #[tokio::test]
    async fn test_community_and_friends_scopes() {
        let (memory, service) = create_test_service().await;
        seed_board(&memory).await;
        memory.seed_membership("c1", "b", CommunityRole::Member).await;
        memory.seed_membership("c1", "e", CommunityRole::Admin).await;
        memory.seed_connection("d", "a").await;

        let community = service
            .get_leaderboard(&LeaderboardQuery::community("c1", 10))
            .await
            .unwrap();
        let names: Vec<_> = community.entries.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["b", "e"]);
        assert_eq!(community.entries[1].rank, 2);

        let friends = service
            .get_leaderboard(&LeaderboardQuery::friends("d", 10))
            .await
            .unwrap();
        let names: Vec<_> = friends.entries.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["a", "d"]);
        assert!(friends.entries[1].is_requester);
    }

    #[tokio::test]
    async fn test_anonymous_users_get_placeholder() {
        let (memory, service) = create_test_service().await;
        let mut anonymous = User::new("anon-1", None);
        anonymous.trust_score = 20.0;
        memory.seed_user(anonymous).await;

        let board = service
            .get_leaderboard(&LeaderboardQuery::global(5))
            .await
            .unwrap();
        assert!(board.entries[0].display_name.starts_with("Member "));
    }

    #[tokio::test]
    async fn test_score_change_invalidates_cached_board() {
        let (memory, service) = create_test_service().await;
        seed_board(&memory).await;
        service
            .get_leaderboard(&LeaderboardQuery::global(10))
            .await
            .unwrap();

        memory.seed_user(User::new("new", Some("new"))).await;
        memory
            .seed_user_stat(
                "new",
                UserStat {
                    events_attended: 1,
                    ..Default::default()
                },
            )
            .await;
        service
            .recompute_for_activity("new", "Attended an event", Some(ScoreComponent::Activity))
            .await
            .unwrap();

        let board = service
            .get_leaderboard(&LeaderboardQuery::global(10))
            .await
            .unwrap();
        assert_eq!(board.total, 6);
        assert_eq!(board.entries.last().unwrap().display_name, "new");
    }

    #[tokio::test]
    async fn test_invalid_queries() {
        let (_, service) = create_test_service().await;
        let mut query = LeaderboardQuery::global(10);
        query.scope = trust_engine::LeaderboardScope::Community;
        assert!(matches!(
            service.get_leaderboard(&query).await,
            Err(TrustError::Validation(_))
        ));
        assert!(service
            .get_leaderboard(&LeaderboardQuery::global(0))
            .await
            .is_err());
    }
}

// ============================================================================
// Inactivity
// ============================================================================

mod inactivity {
    use super::*;

    struct HalveScore;

    impl DecayPolicy for HalveScore {
        fn decayed_score(&self, score: f64, _days_inactive: i64) -> Option<f64> {
            Some(score / 2.0)
        }
    }

    async fn seed_idle_users(memory: &MemoryStore) {
        let mut fresh = scored_user("fresh", 40.0);
        fresh.last_active_at = Utc::now() - Duration::days(2);
        memory.seed_user(fresh).await;

        let mut warned = scored_user("warned", 40.0);
        warned.last_active_at = Utc::now() - Duration::days(25);
        memory.seed_user(warned).await;

        let mut idle = scored_user("idle", 40.0);
        idle.last_active_at = Utc::now() - Duration::days(45);
        memory.seed_user(idle).await;
    }

    #[tokio::test]
    async fn test_sweep_warns_without_decaying_by_default() {
        let (memory, service) = create_test_service().await;
        seed_idle_users(&memory).await;

        let report = service.run_inactivity_sweep().await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].user_id, "warned");
        assert_eq!(report.warnings[0].days_until_decay, 5);
        assert_eq!(report.decay_eligible, 1);
        assert_eq!(report.decayed, 0);
        assert_eq!(stored_score(&memory, "idle").await, 40.0);
    }

    #[tokio::test]
    async fn test_pluggable_policy_applies_and_records() {
        let (memory, service) = create_test_service().await;
        let service = service.with_decay_policy(Arc::new(HalveScore));
        seed_idle_users(&memory).await;

        let report = service.run_inactivity_sweep().await.unwrap();
        assert_eq!(report.decayed, 1);
        assert_eq!(stored_score(&memory, "idle").await, 20.0);
        assert_eq!(memory.get_user("idle").await.unwrap().unwrap().trust_level, TrustLevel::Starter);

        service.history_recorder().flush().await;
        let rows = service.get_trust_score_history("idle", 5).await.unwrap();
        assert_eq!(rows[0].reason, "inactivity decay");
        assert_eq!(rows[0].change, -20.0);
    }

    #[tokio::test]
    async fn test_detail_reports_inactivity() {
        let (memory, service) = create_test_service().await;
        seed_idle_users(&memory).await;

        let detail = service.get_trust_score_detail("warned").await.unwrap();
        assert_eq!(
            detail.inactivity,
            trust_engine::InactivityStatus::Warning {
                days_inactive: 25,
                days_until_decay: 5
            }
        );
    }
}
