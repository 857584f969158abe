//! Integration tests for `RedisLockStore` using testcontainers.
//!
//! Docker must be running; run with `cargo test -p raffle-redis -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use raffle_core::lock::{Acquisition, LockKey, LockManager, LockStore};
use raffle_core::types::{NumberId, RaffleId};
use raffle_redis::RedisLockStore;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;

async fn setup_store() -> (ContainerAsync<Redis>, RedisLockStore) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");
    let store = RedisLockStore::new(&format!("redis://127.0.0.1:{port}"))
        .await
        .expect("Failed to connect to redis");
    (container, store)
}

fn key(name: &str) -> String {
    format!("raffle:lock:test:{name}:{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_set_if_absent_is_exclusive() {
    let (_container, store) = setup_store().await;
    let k = key("exclusive");

    assert!(store.set_if_absent(&k, "a", Duration::from_secs(5)).await.unwrap());
    assert!(!store.set_if_absent(&k, "b", Duration::from_secs(5)).await.unwrap());
    assert!(store.exists(&k).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_only_the_holder_releases() {
    let (_container, store) = setup_store().await;
    let k = key("release");

    store.set_if_absent(&k, "holder", Duration::from_secs(5)).await.unwrap();
    assert!(!store.compare_and_delete(&k, "intruder").await.unwrap());
    assert!(!store.compare_and_expire(&k, "intruder", Duration::from_secs(60)).await.unwrap());
    assert!(store.compare_and_expire(&k, "holder", Duration::from_secs(60)).await.unwrap());
    assert!(store.compare_and_delete(&k, "holder").await.unwrap());
    assert!(!store.exists(&k).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_locks_expire() {
    let (_container, store) = setup_store().await;
    let k = key("ttl");

    store.set_if_absent(&k, "t", Duration::from_millis(200)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!store.exists(&k).await.unwrap());
    assert!(store.set_if_absent(&k, "t2", Duration::from_secs(5)).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_manager_over_redis() {
    let (_container, store) = setup_store().await;
    let manager = LockManager::new(Arc::new(store));
    let raffle = RaffleId::new();
    let keys = [LockKey::new(raffle, NumberId::new(1)), LockKey::new(raffle, NumberId::new(2))];

    let Acquisition::Acquired(locks) = manager.acquire_all(&keys, Duration::from_secs(5)).await.unwrap() else {
        panic!("first acquisition should succeed");
    };
    assert!(matches!(
        manager.acquire(keys[1], Duration::from_secs(5)).await.unwrap(),
        Acquisition::AlreadyHeld(_)
    ));

    manager.release_all(&locks).await;
    assert!(!manager.is_locked(keys[0]).await.unwrap());
}
