//! Runs against the database in `DATABASE_URL`; every test returns early when it is unset.

use adpace_server::ads::{
    AdRepository, AdType, ClientMeta, FeatureAdConfig, ImpressionStatus, NewImpression, Platform,
};
use adpace_server::db::DbOperations;
use adpace_server::error::DatabaseError;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

async fn setup_test_db() -> Option<DbOperations> {
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let db = DbOperations::new_with_options(&database_url, 5, std::time::Duration::from_secs(30))
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!().run(db.pool().as_ref()).await.unwrap();
    Some(db)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn impression(user_id: Uuid, feature: &str, status: ImpressionStatus) -> NewImpression {
    NewImpression {
        user_id,
        feature: feature.to_string(),
        ad_type: AdType::Interstitial,
        platform: Platform::Android,
        status,
        placement_id: Some(format!("android-{}", feature)),
        client: ClientMeta {
            ip_address: Some("203.0.113.7".to_string()),
            user_agent: "QuizApp/2.3".to_string(),
        },
        created_at: Utc::now(),
    }
}

async fn stored_log_count(db: &DbOperations, user_id: Uuid) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ad_impression_logs WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db.pool().as_ref())
        .await
        .unwrap();
    count
}

#[tokio::test]
async fn test_new_day_reset_is_persisted() {
    let Some(db) = setup_test_db().await else { return };
    let user_id = Uuid::new_v4();
    let yesterday = today().pred_opt().unwrap();

    sqlx::query(
        r#"
        INSERT INTO ad_limit_trackers (user_id, ads_shown_today, feature_use_counts, last_ad_shown, last_reset_date)
        VALUES ($1, 10, '{"daily_quiz": 7}'::jsonb, NOW() - INTERVAL '1 day', $2)
        "#,
    )
    .bind(user_id)
    .bind(yesterday)
    .execute(db.pool().as_ref())
    .await
    .unwrap();

    let tracker = db.load_tracker(user_id, today()).await.unwrap();
    assert_eq!(tracker.ads_shown_today, 0);
    assert!(tracker.feature_use_counts.is_empty());
    assert_eq!(tracker.last_reset_date, today());

    let (shown, counts, reset): (i32, serde_json::Value, NaiveDate) = sqlx::query_as(
        "SELECT ads_shown_today, feature_use_counts, last_reset_date FROM ad_limit_trackers WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(db.pool().as_ref())
    .await
    .unwrap();
    assert_eq!(shown, 0);
    assert_eq!(counts, serde_json::json!({}));
    assert_eq!(reset, today());
}

#[tokio::test]
async fn test_tracker_created_on_first_load() {
    let Some(db) = setup_test_db().await else { return };
    let user_id = Uuid::new_v4();

    let tracker = db.load_tracker(user_id, today()).await.unwrap();
    assert_eq!(tracker.user_id, user_id);
    assert_eq!(tracker.ads_shown_today, 0);

    // loading again keeps the same row
    let again = db.load_tracker(user_id, today()).await.unwrap();
    assert_eq!(again, tracker);
}

#[tokio::test]
async fn test_shown_and_skipped_counters() {
    let Some(db) = setup_test_db().await else { return };
    let user_id = Uuid::new_v4();

    let skipped = db
        .append_log(impression(user_id, "mock_test", ImpressionStatus::Skipped), today())
        .await
        .unwrap();
    assert_eq!(skipped.status, ImpressionStatus::Skipped);
    assert_eq!(skipped.placement_id.as_deref(), Some("android-mock_test"));

    let tracker = db.load_tracker(user_id, today()).await.unwrap();
    assert_eq!(tracker.ads_shown_today, 0);
    assert_eq!(tracker.feature_uses("mock_test"), 1);
    assert!(tracker.last_ad_shown.is_none());

    db.append_log(impression(user_id, "mock_test", ImpressionStatus::Shown), today())
        .await
        .unwrap();

    let tracker = db.load_tracker(user_id, today()).await.unwrap();
    assert_eq!(tracker.ads_shown_today, 1);
    assert_eq!(tracker.feature_uses("mock_test"), 2);
    assert!(tracker.last_ad_shown.is_some());

    let start = Utc::now() - Duration::hours(1);
    let end = Utc::now() + Duration::hours(1);
    assert!(db.has_impression_between(user_id, "mock_test", start, end).await.unwrap());
    assert!(!db.has_impression_between(user_id, "pair_quiz", start, end).await.unwrap());

    let logs = db
        .impressions_between(Some(user_id), Some("mock_test".to_string()), start, end)
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].id, skipped.id);
    assert_eq!(logs[1].status, ImpressionStatus::Shown);
    assert_eq!(logs[1].ip_address.as_deref(), Some("203.0.113.7"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_keep_every_increment() {
    let Some(db) = setup_test_db().await else { return };
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let db = db.clone();
            tokio::spawn(async move {
                db.append_log(impression(user_id, "daily_quiz", ImpressionStatus::Shown), today())
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let tracker = db.load_tracker(user_id, today()).await.unwrap();
    assert_eq!(tracker.ads_shown_today, 20);
    assert_eq!(tracker.feature_uses("daily_quiz"), 20);
    assert_eq!(stored_log_count(&db, user_id).await, 20);
}

#[tokio::test]
async fn test_failed_append_stores_nothing() {
    let Some(db) = setup_test_db().await else { return };
    let user_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO ad_limit_trackers (user_id, ads_shown_today, feature_use_counts, last_reset_date)
        VALUES ($1, 0, '{"daily_quiz": -1}'::jsonb, $2)
        "#,
    )
    .bind(user_id)
    .bind(today())
    .execute(db.pool().as_ref())
    .await
    .unwrap();

    let result = db
        .append_log(impression(user_id, "daily_quiz", ImpressionStatus::Shown), today())
        .await;
    match result {
        Err(DatabaseError::QueryError(message)) => assert!(message.contains("feature use count")),
        other => panic!("expected the conversion error, got {:?}", other),
    }
    assert_eq!(stored_log_count(&db, user_id).await, 0);
}

#[tokio::test]
async fn test_config_active_filter_and_upsert() {
    let Some(db) = setup_test_db().await else { return };
    let name = format!("feature_{}", Uuid::new_v4().simple());

    let mut config = FeatureAdConfig::new(name.clone(), Utc::now());
    config.is_active = false;
    config.ad_type = AdType::Rewarded;
    config.max_ads_per_day = 4;
    config.ios_placement_id = Some(format!("ios-{}", name));

    assert!(db.insert_config_if_absent(config.clone()).await.unwrap());
    assert!(!db.insert_config_if_absent(config.clone()).await.unwrap());

    assert!(db.get_config(&name).await.unwrap().is_none());
    let found = db.find_config(&name).await.unwrap().unwrap();
    assert_eq!(found.ad_type, AdType::Rewarded);
    assert_eq!(found.max_ads_per_day, 4);
    assert_eq!(found.ios_placement_id, config.ios_placement_id);
    assert_eq!(found.android_placement_id, None);

    config.is_active = true;
    config.max_ads_per_day = 6;
    let saved = db.save_config(config).await.unwrap();
    assert_eq!(saved.max_ads_per_day, 6);

    let active = db.get_config(&name).await.unwrap().unwrap();
    assert!(active.is_active);
    assert!(db.list_configs().await.unwrap().iter().any(|c| c.feature_name == name));
}

#[tokio::test]
async fn test_active_plan_lookup() {
    let Some(db) = setup_test_db().await else { return };
    let user_id = Uuid::new_v4();

    assert_eq!(db.active_plan_name(user_id).await.unwrap(), None);

    sqlx::query("INSERT INTO user_subscriptions (user_id, plan_name, is_active) VALUES ($1, 'premium', FALSE)")
        .bind(user_id)
        .execute(db.pool().as_ref())
        .await
        .unwrap();
    assert_eq!(db.active_plan_name(user_id).await.unwrap(), None);

    sqlx::query("INSERT INTO user_subscriptions (user_id, plan_name, is_active) VALUES ($1, 'basic', TRUE)")
        .bind(user_id)
        .execute(db.pool().as_ref())
        .await
        .unwrap();
    assert_eq!(db.active_plan_name(user_id).await.unwrap().as_deref(), Some("basic"));
}
