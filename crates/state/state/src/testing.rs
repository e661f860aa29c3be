use std::time::Duration;

use crate::cache::Cache;
use crate::error::StateError;
use crate::lock::Lock;

const TRACE_ID: &str = "conformance";

fn test_key(prefix: &str, id: &str) -> String {
    format!("{prefix}:{id}")
}

/// Run the full cache conformance test suite.
///
/// Call this from your backend's test module with an opened cache. Every key
/// used by the suite starts with `prefix`, so runs against a shared store do
/// not collide.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_cache_conformance_tests(cache: &dyn Cache, prefix: &str) -> Result<(), StateError> {
    test_retrieve_missing(cache, prefix).await?;
    test_store_and_retrieve(cache, prefix).await?;
    test_store_overwrites(cache, prefix).await?;
    test_remove(cache, prefix).await?;
    test_remove_missing(cache, prefix).await?;
    test_expiry(cache, prefix).await?;
    test_zero_ttl(cache, prefix).await?;
    Ok(())
}

async fn test_retrieve_missing(cache: &dyn Cache, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "missing");
    let val = cache.retrieve(TRACE_ID, &key).await?;
    assert!(val.is_none(), "retrieve on missing key should return None");
    Ok(())
}

async fn test_store_and_retrieve(cache: &dyn Cache, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "round-trip");
    cache
        .store(TRACE_ID, &key, "hello", Duration::from_secs(60))
        .await?;
    let val = cache.retrieve(TRACE_ID, &key).await?;
    assert_eq!(val.as_deref(), Some("hello"));
    Ok(())
}

async fn test_store_overwrites(cache: &dyn Cache, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "overwrite");
    cache
        .store(TRACE_ID, &key, "v1", Duration::from_millis(100))
        .await?;
    cache
        .store(TRACE_ID, &key, "v2", Duration::from_secs(60))
        .await?;
    let val = cache.retrieve(TRACE_ID, &key).await?;
    assert_eq!(val.as_deref(), Some("v2"), "second store should win");

    // The TTL is replaced too: the entry outlives the first, shorter TTL.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let val = cache.retrieve(TRACE_ID, &key).await?;
    assert_eq!(val.as_deref(), Some("v2"), "ttl should be replaced on overwrite");
    Ok(())
}

async fn test_remove(cache: &dyn Cache, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "to-remove");
    cache
        .store(TRACE_ID, &key, "bye", Duration::from_secs(60))
        .await?;
    cache.remove(TRACE_ID, &key).await?;
    let val = cache.retrieve(TRACE_ID, &key).await?;
    assert!(val.is_none(), "retrieve after remove should return None");
    Ok(())
}

async fn test_remove_missing(cache: &dyn Cache, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "never-stored");
    for _ in 0..3 {
        cache.remove(TRACE_ID, &key).await?;
    }
    Ok(())
}

async fn test_expiry(cache: &dyn Cache, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "ephemeral");
    cache
        .store(TRACE_ID, &key, "soon gone", Duration::from_millis(50))
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let val = cache.retrieve(TRACE_ID, &key).await?;
    assert!(val.is_none(), "entry should be gone after its ttl");
    Ok(())
}

async fn test_zero_ttl(cache: &dyn Cache, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "zero-ttl");
    let result = cache.store(TRACE_ID, &key, "x", Duration::ZERO).await;
    assert!(
        matches!(result, Err(StateError::InvalidArgument(_))),
        "zero ttl should be rejected"
    );
    Ok(())
}

/// Run the full distributed lock conformance test suite.
///
/// `first` and `second` must be two distinct lock instances backed by the
/// same store, standing in for two competing processes.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_lock_conformance_tests(
    first: &dyn Lock,
    second: &dyn Lock,
    prefix: &str,
) -> Result<(), StateError> {
    test_acquire_and_release(first, prefix).await?;
    test_contention(first, second, prefix).await?;
    test_owner_only_release(first, second, prefix).await?;
    test_release_missing(first, prefix).await?;
    test_lock_expires(first, second, prefix).await?;
    test_handover(first, second, prefix).await?;
    Ok(())
}

async fn test_acquire_and_release(lock: &dyn Lock, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "lock-1");
    let granted = lock
        .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(10))
        .await?;
    assert!(granted, "should acquire uncontested lock");
    lock.release_lock(TRACE_ID, &key).await?;

    let granted = lock
        .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(10))
        .await?;
    assert!(granted, "should reacquire after release");
    lock.release_lock(TRACE_ID, &key).await?;
    Ok(())
}

async fn test_contention(first: &dyn Lock, second: &dyn Lock, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "lock-2");
    assert!(
        first
            .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(10))
            .await?
    );

    let granted = second
        .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(10))
        .await?;
    assert!(!granted, "second owner should not acquire a held lock");

    // Not reentrant: the holder itself cannot take the lock again either.
    let granted = first
        .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(10))
        .await?;
    assert!(!granted, "holder should not reacquire its own lock");

    first.release_lock(TRACE_ID, &key).await?;
    Ok(())
}

async fn test_owner_only_release(
    first: &dyn Lock,
    second: &dyn Lock,
    prefix: &str,
) -> Result<(), StateError> {
    let key = test_key(prefix, "lock-3");
    assert!(
        first
            .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(10))
            .await?
    );

    // A release by a non-owner succeeds but leaves the lock in place.
    second.release_lock(TRACE_ID, &key).await?;
    let granted = second
        .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(10))
        .await?;
    assert!(!granted, "non-owner release must not free the lock");

    first.release_lock(TRACE_ID, &key).await?;
    Ok(())
}

async fn test_release_missing(lock: &dyn Lock, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "lock-never-taken");
    lock.release_lock(TRACE_ID, &key).await?;
    lock.release_lock(TRACE_ID, &key).await?;
    Ok(())
}

async fn test_lock_expires(first: &dyn Lock, second: &dyn Lock, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "lock-4");
    assert!(
        first
            .try_acquire_lock(TRACE_ID, &key, Duration::from_millis(50))
            .await?
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let granted = second
        .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(10))
        .await?;
    assert!(granted, "lock should be free after its ttl");

    // A late release from the previous holder must not free the new one.
    first.release_lock(TRACE_ID, &key).await?;
    let granted = first
        .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(10))
        .await?;
    assert!(!granted, "ghost release must not free another owner's lock");

    second.release_lock(TRACE_ID, &key).await?;
    Ok(())
}

async fn test_handover(first: &dyn Lock, second: &dyn Lock, prefix: &str) -> Result<(), StateError> {
    let key = test_key(prefix, "job-42");
    assert!(
        first
            .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(5))
            .await?
    );
    assert!(
        !second
            .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(5))
            .await?
    );
    first.release_lock(TRACE_ID, &key).await?;
    assert!(
        second
            .try_acquire_lock(TRACE_ID, &key, Duration::from_secs(5))
            .await?
    );
    second.release_lock(TRACE_ID, &key).await?;
    Ok(())
}
