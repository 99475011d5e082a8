//! Device registry integration tests

use std::collections::HashMap;
use std::sync::Arc;

use robovoice::{ActiveProfile, DeviceMode, DeviceRegistry, DeviceRole, Error, RegistryConfig};

mod common;
use common::{MockScanner, event_log, events, fast_policy, registry};

#[tokio::test]
async fn test_simulated_mode_never_scans_or_fails() {
    let log = event_log();
    let scanner = Arc::new(MockScanner::new(&log));
    let registry = registry(DeviceMode::Simulated, scanner);

    for role in DeviceRole::ALL {
        let profile = registry.resolve(role).await.unwrap();
        assert!(profile.is_simulated());
        assert_eq!(profile.role(), role);
        assert_eq!(profile.address(), format!("simulated:{role}"));
    }
    assert!(events(&log).is_empty(), "simulated mode must not enumerate");
}

#[tokio::test]
async fn test_auto_mode_substitutes_missing_hardware() {
    let log = event_log();
    let scanner = Arc::new(
        MockScanner::new(&log).with_endpoint(DeviceRole::Speaker, "plughw:2,0", "iStore Audio"),
    );
    let registry = registry(DeviceMode::Auto, scanner);

    let mic = registry.resolve(DeviceRole::Microphone).await.unwrap();
    let speaker = registry.resolve(DeviceRole::Speaker).await.unwrap();

    assert!(mic.is_simulated());
    match speaker {
        ActiveProfile::Hardware(hw) => {
            assert_eq!(hw.address, "plughw:2,0");
            assert_eq!(hw.role, DeviceRole::Speaker);
        }
        ActiveProfile::Simulated(_) => panic!("speaker should be hardware"),
    }
}

#[tokio::test]
async fn test_hardware_mode_reports_missing_device() {
    let log = event_log();
    let scanner = Arc::new(MockScanner::new(&log));
    let registry = registry(DeviceMode::Hardware, scanner);

    let err = registry.resolve(DeviceRole::Camera).await.unwrap_err();
    assert!(matches!(
        err,
        Error::DeviceUnavailable {
            role: DeviceRole::Camera,
            ..
        }
    ));
    assert!(registry.current(DeviceRole::Camera).is_none());
}

#[tokio::test]
async fn test_held_device_is_busy_in_hardware_mode() {
    let log = event_log();
    let scanner = Arc::new(
        MockScanner::new(&log).with_endpoint(DeviceRole::Microphone, "plughw:3,0", "USB PnP"),
    );
    scanner.hold("plughw:3,0");
    let registry = registry(DeviceMode::Hardware, scanner.clone());

    let err = registry.resolve(DeviceRole::Microphone).await.unwrap_err();
    assert!(err.is_device_busy());

    // Once freed, a rescan finds it
    scanner.free("plughw:3,0");
    let profile = registry.rescan(DeviceRole::Microphone).await.unwrap();
    assert_eq!(profile.address(), "plughw:3,0");
}

#[tokio::test]
async fn test_held_device_falls_back_in_auto_mode() {
    let log = event_log();
    let scanner = Arc::new(
        MockScanner::new(&log).with_endpoint(DeviceRole::Microphone, "plughw:3,0", "USB PnP"),
    );
    scanner.hold("plughw:3,0");
    let registry = registry(DeviceMode::Auto, scanner);

    let profile = registry.resolve(DeviceRole::Microphone).await.unwrap();
    assert!(profile.is_simulated());
}

#[tokio::test]
async fn test_failed_holder_check_treats_endpoint_as_free() {
    let log = event_log();
    let scanner = Arc::new(
        MockScanner::new(&log).with_endpoint(DeviceRole::Speaker, "plughw:2,0", "iStore Audio"),
    );
    scanner.break_holder_check();
    let registry = registry(DeviceMode::Hardware, scanner.clone());

    let profile = registry.resolve(DeviceRole::Speaker).await.unwrap();

    assert_eq!(profile.address(), "plughw:2,0");
    assert_eq!(scanner.holder_checks(), 1, "a missing fuser is not retried");
}

#[tokio::test]
async fn test_held_endpoint_is_skipped_for_next_match() {
    let log = event_log();
    let scanner = Arc::new(
        MockScanner::new(&log)
            .with_endpoint(DeviceRole::Speaker, "plughw:0,0", "bcm2835 Headphones")
            .with_endpoint(DeviceRole::Speaker, "plughw:2,0", "iStore Audio"),
    );
    scanner.hold("plughw:0,0");
    let registry = registry(DeviceMode::Hardware, scanner);

    let profile = registry.resolve(DeviceRole::Speaker).await.unwrap();
    assert_eq!(profile.address(), "plughw:2,0");
}

#[tokio::test]
async fn test_pattern_selects_endpoint() {
    let log = event_log();
    let scanner = Arc::new(
        MockScanner::new(&log)
            .with_endpoint(DeviceRole::Speaker, "plughw:0,0", "bcm2835 Headphones")
            .with_endpoint(DeviceRole::Speaker, "plughw:2,0", "iStore Audio"),
    );
    let config = RegistryConfig {
        mode: DeviceMode::Hardware,
        patterns: HashMap::from([(DeviceRole::Speaker, "istore".to_string())]),
        scan_policy: fast_policy(),
        ..RegistryConfig::default()
    };
    let registry = DeviceRegistry::new(config, scanner);

    let profile = registry.resolve(DeviceRole::Speaker).await.unwrap();
    assert_eq!(profile.address(), "plughw:2,0");
}

#[tokio::test]
async fn test_unmatched_pattern_is_unavailable() {
    let log = event_log();
    let scanner = Arc::new(
        MockScanner::new(&log).with_endpoint(DeviceRole::Speaker, "plughw:0,0", "Headphones"),
    );
    let config = RegistryConfig {
        mode: DeviceMode::Hardware,
        patterns: HashMap::from([(DeviceRole::Speaker, "plughw:9,0".to_string())]),
        scan_policy: fast_policy(),
        ..RegistryConfig::default()
    };
    let registry = DeviceRegistry::new(config, scanner);

    let err = registry.resolve(DeviceRole::Speaker).await.unwrap_err();
    assert!(err.to_string().contains("no endpoint matches"));
}

#[tokio::test]
async fn test_resolve_is_cached_until_invalidated() {
    let log = event_log();
    let scanner = Arc::new(
        MockScanner::new(&log).with_endpoint(DeviceRole::Camera, "/dev/video0", "video0"),
    );
    let registry = registry(DeviceMode::Auto, scanner);

    registry.resolve(DeviceRole::Camera).await.unwrap();
    registry.resolve(DeviceRole::Camera).await.unwrap();
    assert_eq!(events(&log), vec!["enumerate camera"]);

    registry.invalidate(DeviceRole::Camera);
    registry.resolve(DeviceRole::Camera).await.unwrap();
    assert_eq!(events(&log).len(), 2);
}

#[tokio::test]
async fn test_seeded_simulation_is_reproducible() {
    let draws = |registry: Arc<DeviceRegistry>| async move {
        match registry.resolve(DeviceRole::Microphone).await.unwrap() {
            ActiveProfile::Simulated(sim) => (0..32).map(|_| sim.pick(1000)).collect::<Vec<_>>(),
            ActiveProfile::Hardware(_) => panic!("expected simulation"),
        }
    };

    let a = draws(registry(
        DeviceMode::Simulated,
        Arc::new(MockScanner::new(&event_log())),
    ))
    .await;
    let b = draws(registry(
        DeviceMode::Simulated,
        Arc::new(MockScanner::new(&event_log())),
    ))
    .await;

    assert_eq!(a, b);
    assert!(a.iter().all(Option::is_some));
}

#[tokio::test]
async fn test_release_goes_through_scanner() {
    let log = event_log();
    let scanner = Arc::new(
        MockScanner::new(&log).with_endpoint(DeviceRole::Speaker, "plughw:2,0", "iStore Audio"),
    );
    let registry = registry(DeviceMode::Hardware, scanner.clone());

    let ActiveProfile::Hardware(hw) = registry.resolve(DeviceRole::Speaker).await.unwrap() else {
        panic!("expected hardware speaker");
    };
    registry.release(&hw).await.unwrap();

    assert_eq!(scanner.releases(), 1);
    assert!(events(&log).contains(&"release plughw:2,0".to_string()));
}
