use modsync_core::{ContentItem, ContentRegistry, ContentSetKind, RegistryError};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn registry_with(extensions: &[(&str, usize)]) -> ContentRegistry {
    let mut registry = ContentRegistry::new();
    registry
        .capture_baseline((0..4).map(|i| ContentItem::baseline(format!("base.{i}"))).collect())
        .unwrap();
    for (extension_id, count) in extensions {
        let items = (0..*count)
            .map(|i| ContentItem::from_extension(*extension_id, format!("{extension_id}.{i}"), Value::Null))
            .collect();
        registry.register_extension_content(extension_id, items).unwrap();
    }
    registry
}

fn admitted(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

#[test]
fn readers_only_ever_see_whole_sets() {
    let mut registry = registry_with(&[("alpha", 16), ("beta", 16)]);
    let view = registry.view();
    let stop = Arc::new(AtomicBool::new(false));

    let reader = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut observed = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let set = view.current();
                match set.kind() {
                    ContentSetKind::Baseline => assert_eq!(set.len(), 4),
                    ContentSetKind::Extended => {
                        assert_eq!(set.len(), 36);
                        assert_eq!(set.items()[35].name, "beta.15");
                    }
                }
                observed += 1;
            }
            observed
        })
    };

    let everything = admitted(&["alpha", "beta"]);
    for _ in 0..2_000 {
        registry.publish_extended(&everything).unwrap();
        registry.revert();
    }
    stop.store(true, Ordering::Relaxed);
    assert!(reader.join().expect("reader must not panic") > 0);
}

#[test]
fn publish_is_idempotent_and_revert_restores_baseline() {
    let mut registry = registry_with(&[("alpha", 2)]);
    let everything = admitted(&["alpha"]);

    assert!(registry.publish_extended(&everything).unwrap());
    let first = registry.active_content_set();
    assert!(!registry.publish_extended(&everything).unwrap());
    assert!(Arc::ptr_eq(&first, &registry.active_content_set()));

    assert!(registry.revert());
    assert!(!registry.revert());
    assert!(Arc::ptr_eq(
        &registry.active_content_set(),
        &registry.baseline()
    ));
}

#[test]
fn extended_set_follows_registration_order() {
    let mut registry = registry_with(&[("beta", 1), ("alpha", 1)]);
    registry.publish_extended(&admitted(&["alpha", "beta"])).unwrap();
    assert_eq!(
        registry.active_content_set().names(),
        vec!["base.0", "base.1", "base.2", "base.3", "beta.0", "alpha.0"]
    );

    registry.publish_extended(&admitted(&["alpha"])).unwrap();
    assert_eq!(registry.active_content_set().len(), 5);
}

#[test]
fn lifecycle_violations_fail_the_call_only() {
    let mut registry = registry_with(&[("alpha", 1)]);
    assert_eq!(
        registry.capture_baseline(Vec::new()).unwrap_err(),
        RegistryError::AlreadyCaptured
    );
    assert_eq!(
        registry
            .register_extension_content("alpha", Vec::new())
            .unwrap_err(),
        RegistryError::DoublePublish("alpha".to_string())
    );

    registry.publish_extended(&admitted(&["alpha"])).unwrap();
    assert_eq!(
        registry
            .register_extension_content("late", Vec::new())
            .unwrap_err(),
        RegistryError::AlreadyPublished("late".to_string())
    );
    assert!(registry.is_extended_active());
}
