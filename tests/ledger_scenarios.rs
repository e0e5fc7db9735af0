//! End-to-end ledger scenarios against a file-backed database

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use diesel::connection::SimpleConnection;
use diesel::{Connection, SqliteConnection};
use reward_ledger::db::catalog::{self, CatalogSeed};
use reward_ledger::{
    AwardContext, AwardOutcome, ClaimOutcome, Config, FixedClock, LedgerError, LedgerService, LedgerStore,
    ServiceCalendar, Services,
};
use tempfile::TempDir;

struct TestLedger {
    dir: TempDir,
    clock: Arc<FixedClock>,
    services: Services,
}

impl TestLedger {
    fn ledger(&self) -> &LedgerService {
        &self.services.ledger
    }

    fn next_day(&self) {
        self.clock.advance(chrono::Duration::days(1));
    }
}

async fn setup() -> TestLedger {
    setup_with(8, Duration::from_secs(10)).await
}

async fn setup_with(pool_size: u32, timeout: Duration) -> TestLedger {
    let dir = TempDir::new().unwrap();
    let store = LedgerStore::open(&dir.path().join("ledger.db"), pool_size, timeout).unwrap();
    store
        .run(|conn| catalog::seed_if_empty(conn, &CatalogSeed::builtin()))
        .await
        .unwrap();

    // 09:00 UTC is 10:00 at the default +60 offset
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 5, 10, 9, 0, 0).unwrap()));
    let calendar = ServiceCalendar::new(clock.clone(), 60).unwrap();
    let config = Config {
        leaderboard_max_staleness_secs: 0,
        ..Config::default()
    };
    let services = Services::new(store, calendar, &config);

    TestLedger { dir, clock, services }
}

async fn balance_of(t: &TestLedger, user: &str) -> i64 {
    t.ledger().get_balance(user).await.unwrap().balance
}

#[tokio::test]
async fn test_signup_streak_and_redeem_scenario() {
    let t = setup().await;

    let outcome = t.ledger().award("u1", "signup_bonus", AwardContext::default()).await.unwrap();
    assert!(matches!(outcome, AwardOutcome::Awarded { .. }));
    assert_eq!(balance_of(&t, "u1").await, 50);

    match t.ledger().claim_daily("u1").await.unwrap() {
        ClaimOutcome::Claimed { amount, streak_days, balance, .. } => {
            assert_eq!(amount, 10);
            assert_eq!(streak_days, 1);
            assert_eq!(balance.balance, 60);
        }
        other => panic!("unexpected {:?}", other),
    }

    t.next_day();
    match t.ledger().claim_daily("u1").await.unwrap() {
        ClaimOutcome::Claimed { amount, streak_days, balance, .. } => {
            assert_eq!(amount, 15);
            assert_eq!(streak_days, 2);
            assert_eq!(balance.balance, 75);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(
        t.ledger().claim_daily("u1").await.unwrap(),
        ClaimOutcome::AlreadyClaimedToday { streak_days: 2 }
    );
    assert_eq!(balance_of(&t, "u1").await, 75);

    t.clock.advance(chrono::Duration::minutes(5));
    let err = t.ledger().redeem("u1", 80, "T-shirt").await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { balance: 75, requested: 80 }));
    assert_eq!(balance_of(&t, "u1").await, 75);

    let redemption = t.ledger().redeem("u1", 75, "T-shirt").await.unwrap();
    assert_eq!(redemption.balance.balance, 0);
    assert_eq!(redemption.balance.total_spent, 75);
    assert_eq!(redemption.entry.amount, -75);
    assert_eq!(redemption.entry.description.as_deref(), Some("T-shirt"));

    let history = t.ledger().get_history("u1", None).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].action_type, "redeem");

    let audit = t.ledger().audit("u1").await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.recomputed.earned, 75);
}

#[tokio::test]
async fn test_unique_rule_pays_once() {
    let t = setup().await;

    t.ledger().award("u1", "signup_bonus", AwardContext::default()).await.unwrap();
    let second = t.ledger().award("u1", "signup_bonus", AwardContext::default()).await.unwrap();

    assert_eq!(second, AwardOutcome::AlreadyAwarded { rule_id: "rule-signup_bonus".into() });
    assert_eq!(balance_of(&t, "u1").await, 50);
    assert_eq!(t.ledger().get_history("u1", None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_daily_cap_holds_over_many_awards() {
    let t = setup().await;

    for _ in 0..100 {
        t.ledger().award("u1", "post_created", AwardContext::default()).await.unwrap();
    }

    assert_eq!(balance_of(&t, "u1").await, 25);
    assert!(t.ledger().audit("u1").await.unwrap().consistent);
}

#[tokio::test]
async fn test_streak_resets_after_gap() {
    let t = setup().await;

    t.ledger().claim_daily("u1").await.unwrap();
    t.next_day();
    t.ledger().claim_daily("u1").await.unwrap();
    t.next_day();
    t.next_day();

    match t.ledger().claim_daily("u1").await.unwrap() {
        ClaimOutcome::Claimed { amount, streak_days, .. } => {
            assert_eq!(streak_days, 1);
            assert_eq!(amount, 10);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(balance_of(&t, "u1").await, 10 + 15 + 10);
}

#[tokio::test]
async fn test_day_boundary_follows_service_offset() {
    let t = setup().await;

    // 22:30 UTC on the 10th is 23:30 local
    t.clock.set(Utc.with_ymd_and_hms(2026, 5, 10, 22, 30, 0).unwrap());
    t.ledger().claim_daily("u1").await.unwrap();

    // 23:30 UTC is already the 11th locally
    t.clock.set(Utc.with_ymd_and_hms(2026, 5, 10, 23, 30, 0).unwrap());
    match t.ledger().claim_daily("u1").await.unwrap() {
        ClaimOutcome::Claimed { streak_days, .. } => assert_eq!(streak_days, 2),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_recurrent_rule_pays_once_per_context() {
    let t = setup().await;
    let stage = |id: &str| AwardContext {
        context_type: Some("stage".into()),
        context_id: Some(id.into()),
        context_name: Some("Stage d'été".into()),
    };

    t.ledger().award("u1", "event_participation", stage("s1")).await.unwrap();
    let repeat = t.ledger().award("u1", "event_participation", stage("s1")).await.unwrap();
    assert!(matches!(repeat, AwardOutcome::AlreadyAwarded { .. }));
    t.ledger().award("u1", "event_participation", stage("s2")).await.unwrap();

    assert_eq!(balance_of(&t, "u1").await, 40);

    let missing = t
        .ledger()
        .award("u1", "event_participation", AwardContext::default())
        .await
        .unwrap_err();
    assert!(matches!(missing, LedgerError::Validation(_)));

    let history = t.ledger().get_history("u1", None).await.unwrap();
    assert!(history.iter().all(|e| e.context_type.as_deref() == Some("stage")));
}

#[tokio::test]
async fn test_unknown_action_rejected() {
    let t = setup().await;

    let err = t.ledger().award("u1", "moon_landing", AwardContext::default()).await.unwrap_err();
    assert!(matches!(err, LedgerError::UnknownAction(ref a) if a == "moon_landing"));
    assert_eq!(balance_of(&t, "u1").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_awards_keep_balance_equal_to_log() {
    let t = Arc::new(setup().await);

    let mut handles = Vec::new();
    for i in 0..40 {
        let t = t.clone();
        handles.push(tokio::spawn(async move {
            let user = if i % 2 == 0 { "u1" } else { "u2" };
            let action = match i % 4 {
                0 | 1 => "comment_added",
                _ => "grade_passed",
            };
            t.ledger().award(user, action, AwardContext::default()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for user in ["u1", "u2"] {
        let audit = t.ledger().audit(user).await.unwrap();
        assert!(audit.consistent, "{} drifted: {:?}", user, audit);
        assert_eq!(audit.recomputed.entries, 20);
    }

    // Each user got 10 comment awards capped at 20 and 10 grade awards of 100
    assert_eq!(balance_of(&t, "u1").await, 20 + 1_000);
    assert_eq!(balance_of(&t, "u2").await, 20 + 1_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_credit_once() {
    let t = Arc::new(setup().await);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let t = t.clone();
        handles.push(tokio::spawn(async move { t.ledger().claim_daily("u1").await }));
    }

    let mut claimed = 0;
    for handle in handles {
        if let ClaimOutcome::Claimed { .. } = handle.await.unwrap().unwrap() {
            claimed += 1;
        }
    }

    assert_eq!(claimed, 1);
    assert_eq!(balance_of(&t, "u1").await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redeems_never_overdraw() {
    let t = Arc::new(setup().await);
    t.ledger().award("u1", "signup_bonus", AwardContext::default()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let t = t.clone();
        handles.push(tokio::spawn(async move { t.ledger().redeem("u1", 10, "tee").await }));
    }

    let (mut redeemed, mut refused) = (0, 0);
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => redeemed += 1,
            Err(LedgerError::InsufficientBalance { .. }) => refused += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!((redeemed, refused), (5, 5));
    assert_eq!(balance_of(&t, "u1").await, 0);
    let audit = t.ledger().audit("u1").await.unwrap();
    assert!(audit.consistent, "drifted: {:?}", audit);
    assert_eq!(audit.recomputed.entries, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timed_out_redeem_leaves_no_trace() {
    let t = setup_with(1, Duration::from_millis(500)).await;
    t.ledger().award("u1", "signup_bonus", AwardContext::default()).await.unwrap();

    // Another process holds the write lock from 250ms to 650ms
    let db_path = t.dir.path().join("ledger.db");
    let outside_writer = std::thread::spawn(move || {
        let mut conn = SqliteConnection::establish(&db_path.to_string_lossy()).unwrap();
        std::thread::sleep(Duration::from_millis(250));
        conn.batch_execute("BEGIN IMMEDIATE").unwrap();
        std::thread::sleep(Duration::from_millis(400));
        conn.batch_execute("COMMIT").unwrap();
    });

    // The only pooled connection is busy for the first 300ms
    let store = t.ledger().store().clone();
    let busy_reader = tokio::spawn(async move {
        store
            .run(|_conn| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = t.ledger().redeem("u1", 10, "tee").await.unwrap_err();
    assert!(matches!(err, LedgerError::StorageTimeout(_)), "got {}", err);
    assert!(err.is_retryable());

    busy_reader.await.unwrap().unwrap();
    outside_writer.join().unwrap();

    // The failed call left nothing behind, so the retry debits once
    assert_eq!(balance_of(&t, "u1").await, 50);
    assert_eq!(t.ledger().audit("u1").await.unwrap().recomputed.entries, 1);

    let retried = t.ledger().redeem("u1", 10, "tee").await.unwrap();
    assert_eq!(retried.balance.balance, 40);
    let audit = t.ledger().audit("u1").await.unwrap();
    assert!(audit.consistent, "drifted: {:?}", audit);
    assert_eq!(audit.recomputed.entries, 2);
}

#[tokio::test]
async fn test_leaderboard_order_and_tie_break() {
    let t = setup().await;

    t.ledger().award("alice", "signup_bonus", AwardContext::default()).await.unwrap();
    t.clock.advance(chrono::Duration::seconds(1));
    t.ledger().award("bob", "grade_passed", AwardContext::default()).await.unwrap();
    t.clock.advance(chrono::Duration::seconds(1));
    t.ledger().award("carol", "signup_bonus", AwardContext::default()).await.unwrap();

    let board = t.ledger().get_leaderboard(Some(10)).await.unwrap();
    let order: Vec<(&str, i64, i64)> = board
        .iter()
        .map(|e| (e.user_id.as_str(), e.balance, e.rank))
        .collect();
    assert_eq!(order, vec![("bob", 100, 1), ("alice", 50, 2), ("carol", 50, 3)]);

    let top = t.ledger().get_leaderboard(Some(1)).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].user_id, "bob");
}

#[tokio::test]
async fn test_badges_unlock_once() {
    let t = setup().await;

    let outcome = t.ledger().award("u1", "signup_bonus", AwardContext::default()).await.unwrap();
    match outcome {
        AwardOutcome::Awarded { new_badges, .. } => {
            let names: Vec<&str> = new_badges.iter().map(|b| b.badge_type.as_str()).collect();
            assert_eq!(names, vec!["first_steps"]);
        }
        other => panic!("unexpected {:?}", other),
    }

    let outcome = t.ledger().award("u1", "profile_completed", AwardContext::default()).await.unwrap();
    match outcome {
        AwardOutcome::Awarded { new_badges, .. } => assert!(new_badges.is_empty()),
        other => panic!("unexpected {:?}", other),
    }

    for day in 0..2 {
        if day > 0 {
            t.next_day();
        }
        for _ in 0..5 {
            t.ledger().award("u1", "post_created", AwardContext::default()).await.unwrap();
        }
    }

    let owned: Vec<String> = t
        .ledger()
        .get_user_badges("u1")
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.badge_type)
        .collect();
    assert_eq!(owned, vec!["first_steps".to_string(), "storyteller".to_string()]);
    assert_eq!(t.ledger().get_badges().await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_catalog_file_seeds_rules() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.toml");
    std::fs::write(
        &path,
        r#"
[[rules]]
action_type = "dojo_cleanup"
category = "progression"
amount = 30
name = "Nettoyage du dojo"
icon = "🧹"
"#,
    )
    .unwrap();

    let store = LedgerStore::open(&dir.path().join("ledger.db"), 2, Duration::from_secs(5)).unwrap();
    let seed = CatalogSeed::load(&path).unwrap();
    store.run(move |conn| catalog::seed_if_empty(conn, &seed)).await.unwrap();

    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 5, 10, 9, 0, 0).unwrap()));
    let calendar = ServiceCalendar::new(clock, 60).unwrap();
    let services = Services::new(store, calendar, &Config::default());

    services.ledger.award("u1", "dojo_cleanup", AwardContext::default()).await.unwrap();
    assert_eq!(services.ledger.get_balance("u1").await.unwrap().balance, 30);

    let err = services
        .ledger
        .award("u1", "signup_bonus", AwardContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownAction(_)));
}
