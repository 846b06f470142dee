//! Redis Store Integration Tests
//!
//! Run against a local server with:
//! `cargo test -p latchkey-store -- --ignored`
//! Connection settings come from `LATCHKEY_REDIS__*` environment variables.

use std::time::Duration;

use latchkey_common::{
    CacheStore, KeyTtl, KeyValueStore, RELEASE_IF_OWNER, RENEW_IF_OWNER, SetOptions,
};
use latchkey_store::{RedisConfig, RedisStore};

/// Connect with a unique key prefix so concurrent runs never collide
async fn test_store() -> RedisStore {
    let mut config = RedisConfig::load(None).expect("Failed to load redis config");
    config.key_prefix = format!("latchkey-test:{}:", uuid::Uuid::new_v4());
    RedisStore::connect(&config)
        .await
        .expect("Failed to connect to redis")
}

#[tokio::test]
#[ignore = "requires running redis"]
async fn test_ping() {
    let store = test_store().await;
    assert!(store.ping().await.unwrap());
}

#[tokio::test]
#[ignore = "requires running redis"]
async fn test_set_if_absent_and_ttl() {
    let store = test_store().await;
    let opts = SetOptions::if_absent(Duration::from_secs(5));

    assert!(store.set("lock:a", "t1", opts).await.unwrap());
    assert!(!store.set("lock:a", "t2", opts).await.unwrap());
    assert_eq!(store.get("lock:a").await.unwrap().as_deref(), Some("t1"));

    match store.ttl("lock:a").await.unwrap() {
        KeyTtl::Expires(remaining) => assert!(remaining <= Duration::from_secs(5)),
        other => panic!("Unexpected ttl: {:?}", other),
    }

    assert_eq!(store.delete(&["lock:a"]).await.unwrap(), 1);
    assert_eq!(store.ttl("lock:a").await.unwrap(), KeyTtl::Missing);
}

#[tokio::test]
#[ignore = "requires running redis"]
async fn test_lock_scripts() {
    let store = test_store().await;
    store
        .set("lock:s", "mine", SetOptions::if_absent(Duration::from_secs(2)))
        .await
        .unwrap();

    let renewed = store
        .run_script(&RENEW_IF_OWNER, &["lock:s"], &["mine", "10000"])
        .await
        .unwrap();
    assert_eq!(renewed, 1);
    let remaining = store.ttl("lock:s").await.unwrap().remaining().unwrap();
    assert!(remaining > Duration::from_secs(2));

    let foreign = store
        .run_script(&RELEASE_IF_OWNER, &["lock:s"], &["theirs"])
        .await
        .unwrap();
    assert_eq!(foreign, 0);

    let released = store
        .run_script(&RELEASE_IF_OWNER, &["lock:s"], &["mine"])
        .await
        .unwrap();
    assert_eq!(released, 1);
    assert_eq!(store.exists(&["lock:s"]).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires running redis"]
async fn test_scan_strips_prefix() {
    let store = test_store().await;
    for key in ["user:1", "user:2", "other:1"] {
        store.set(key, "x", SetOptions::default()).await.unwrap();
    }

    let mut keys = store.scan("user:*", 10).await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["user:1".to_string(), "user:2".to_string()]);

    store.delete(&["user:1", "user:2", "other:1"]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires running redis"]
async fn test_incr_by() {
    let store = test_store().await;
    assert_eq!(store.incr_by("counter", 3).await.unwrap(), 3);
    assert_eq!(store.incr_by("counter", -1).await.unwrap(), 2);
    store.delete(&["counter"]).await.unwrap();
}
