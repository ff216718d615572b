// Tests for the process-wide shared registry

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use maplock::{LockRegistry, Payload, SharedRegistry, shared};

#[test]
fn test_shared_is_a_singleton() {
    let handles: Vec<_> = (0..8)
        .map(|_| thread::spawn(|| shared() as *const SharedRegistry as usize))
        .collect();

    let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(std::ptr::eq(shared(), SharedRegistry::shared()));
}

#[test]
fn test_shared_carries_opaque_payloads() {
    let registry = shared();
    let payload: Payload = Arc::new(String::from("k8s-link"));

    registry.store("shared-payload", Some(payload)).unwrap();
    registry.store("shared-nil", None).unwrap();

    let handle = registry
        .lock("shared-payload", Duration::from_secs(10))
        .unwrap();
    let link = handle
        .value()
        .as_ref()
        .and_then(|value| value.downcast_ref::<String>())
        .cloned();
    assert_eq!(link.as_deref(), Some("k8s-link"));
    handle.release();

    assert!(registry.value("shared-nil").unwrap().is_none());

    registry.destroy("shared-payload");
    registry.destroy("shared-nil");
}

#[test]
fn test_new_instances_are_independent() {
    let first = LockRegistry::<()>::new();
    let second = LockRegistry::<()>::new();

    first.store("independent", ()).unwrap();
    assert!(second.store("independent", ()).is_ok());
    assert!(!shared().contains("independent"));
}
