// Tests for configuring the shared registry before first use
// Kept in its own binary so no other test creates the registry first

use std::time::Duration;

use maplock::{RegistryConfig, SharedRegistry, init_shared, shared};

#[test]
fn test_init_shared_applies_config_once() {
    let config = RegistryConfig::default().with_initial_capacity(256);

    assert!(init_shared(config.clone()));
    assert!(shared().capacity() >= 256);

    // Later initialization attempts keep the first registry
    assert!(!init_shared(RegistryConfig::default()));
    assert!(std::ptr::eq(shared(), SharedRegistry::shared()));

    shared().store("configured", None).unwrap();
    let handle = shared().lock("configured", Duration::ZERO).unwrap();
    assert!(!init_shared(config));
    assert!(handle.is_held());
    shared().destroy("configured");
}
