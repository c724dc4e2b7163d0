use modsync_core::{
    Capability, CapabilitySet, ContentContributions, EntryPointCatalog, ExtensionDescriptor,
    Extension, ExtensionFailure, ExtensionHost, ExtensionTable, HostError, InstantiationError,
    LoadError, LoadedExtension, ManifestLoader, NetworkedExtension, UiPanel,
};
use std::path::PathBuf;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

struct CardPack {
    id: &'static str,
    cards: &'static [&'static str],
}

impl Extension for CardPack {
    fn initialize(
        &mut self,
        contributions: &mut ContentContributions,
    ) -> Result<String, ExtensionFailure> {
        for card in self.cards {
            contributions.add(*card, json!({ "pack": self.id }));
        }
        Ok(self.id.to_string())
    }
}

struct Refuses;

impl Extension for Refuses {
    fn initialize(
        &mut self,
        _contributions: &mut ContentContributions,
    ) -> Result<String, ExtensionFailure> {
        Err(ExtensionFailure::new("missing assets"))
    }
}

struct Chatty {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl Extension for Chatty {
    fn initialize(
        &mut self,
        _contributions: &mut ContentContributions,
    ) -> Result<String, ExtensionFailure> {
        Ok("chatty".to_string())
    }

    fn ui_panel(&mut self) -> Option<&mut dyn UiPanel> {
        Some(self)
    }

    fn networked(&mut self) -> Option<&mut dyn NetworkedExtension> {
        Some(self)
    }
}

impl UiPanel for Chatty {
    fn render_frame(&mut self) {
        self.calls.lock().unwrap().push("render");
    }
}

impl NetworkedExtension for Chatty {
    fn on_session_joined(&mut self) {
        self.calls.lock().unwrap().push("joined");
        panic!("joined hook exploded");
    }

    fn on_session_left(&mut self) {
        self.calls.lock().unwrap().push("left");
    }

    fn on_handshake_completed(&mut self) {
        self.calls.lock().unwrap().push("completed");
    }
}

fn write_manifest(dir: &Path, file: &str, id: &str, entry_point: &str) {
    fs::write(
        dir.join(file),
        json!({ "id": id, "version": "1.0.0", "entry_point": entry_point }).to_string(),
    )
    .unwrap();
}

fn catalog(calls: Arc<Mutex<Vec<&'static str>>>) -> EntryPointCatalog {
    let mut catalog = EntryPointCatalog::new();
    catalog
        .register_type("AlphaPack", || CardPack {
            id: "alpha",
            cards: &["alpha.shield", "alpha.sword"],
        })
        .register_type("GammaPack", || CardPack {
            id: "gamma",
            cards: &["gamma.orb"],
        })
        .register_type("Refuses", || Refuses)
        .register_type("Chatty", move || Chatty {
            calls: Arc::clone(&calls),
        })
        .register("Exploding", || panic!("constructor exploded"));
    catalog
}

fn host(calls: Arc<Mutex<Vec<&'static str>>>) -> ExtensionHost {
    ExtensionHost::new(Arc::new(ManifestLoader::new(catalog(calls))))
}

#[test]
fn failing_candidates_do_not_block_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "a.extension.json", "alpha", "AlphaPack");
    fs::write(dir.path().join("b.extension.json"), "{ broken").unwrap();
    write_manifest(dir.path(), "c.extension.json", "ghost", "NotExported");
    write_manifest(dir.path(), "d.extension.json", "boom", "Exploding");
    write_manifest(dir.path(), "e.extension.json", "refuses", "Refuses");
    write_manifest(dir.path(), "f.extension.json", "not-gamma", "GammaPack");
    write_manifest(dir.path(), "g.extension.json", "gamma", "GammaPack");
    write_manifest(dir.path(), "h.extension.json", "alpha", "AlphaPack");
    fs::write(dir.path().join("notes.txt"), "not a package").unwrap();

    let host = host(Arc::default());
    let report = host.load_all(&host.discover(dir.path()));

    assert_eq!(report.loaded_ids(), vec!["alpha", "gamma"]);
    let errors: Vec<&HostError> = report.failures.iter().map(|f| &f.error).collect();
    assert_eq!(errors.len(), 6);
    assert!(matches!(errors[0], HostError::Load(LoadError::Malformed { .. })));
    assert!(matches!(errors[1], HostError::Load(LoadError::NoEntryPoint { .. })));
    assert!(matches!(
        errors[2],
        HostError::Instantiation(InstantiationError::ConstructorPanicked { .. })
    ));
    assert!(matches!(
        errors[3],
        HostError::Instantiation(InstantiationError::InitializeFailed { .. })
    ));
    assert!(matches!(
        errors[4],
        HostError::Instantiation(InstantiationError::IdMismatch { .. })
    ));
    assert_eq!(errors[5], &HostError::DuplicateExtensionId("alpha".to_string()));
    assert_eq!(
        report.failures[5].path.as_deref(),
        Some(dir.path().join("h.extension.json").as_path())
    );
}

#[test]
fn loaded_extension_carries_content_and_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "alpha.extension.json", "alpha", "AlphaPack");
    write_manifest(dir.path(), "chatty.extension.json", "chatty", "Chatty");

    let host = host(Arc::default());
    let report = host.load_all(&host.discover(dir.path()));
    assert!(report.failures.is_empty());

    let alpha = &report.loaded[0];
    assert_eq!(alpha.descriptor.version, "1.0.0");
    assert!(alpha.descriptor.capabilities.is_empty());
    let names: Vec<&str> = alpha.content().iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, vec!["alpha.shield", "alpha.sword"]);
    assert!(alpha
        .content()
        .iter()
        .all(|item| item.extension_id() == Some("alpha")));

    let chatty = &report.loaded[1];
    assert!(chatty.descriptor.implements(Capability::HasUi));
    assert!(chatty.descriptor.implements(Capability::IsNetworked));
    assert_eq!(chatty.descriptor.capabilities.to_label(), "ui,networked");
}

#[test]
fn background_load_hands_back_a_report() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "gamma.extension.json", "gamma", "GammaPack");
    write_manifest(dir.path(), "alpha.extension.json", "alpha", "AlphaPack");

    let report = host(Arc::default())
        .spawn_load(dir.path())
        .wait()
        .expect("worker should report");
    assert_eq!(report.loaded_ids(), vec!["alpha", "gamma"]);
}

#[test]
fn missing_directory_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(Arc::default());
    let report = host.load_all(&host.discover(dir.path().join("absent")));
    assert!(report.loaded.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.code(), "discovery_failed");
    assert!(report.failures[0].path.is_none());
}

#[test]
fn explicit_path_list_is_loaded_in_given_order() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "alpha.extension.json", "alpha", "AlphaPack");
    write_manifest(dir.path(), "gamma.extension.json", "gamma", "GammaPack");

    let report = host(Arc::default()).load_paths([
        dir.path().join("gamma.extension.json"),
        dir.path().join("alpha.extension.json"),
    ]);
    assert_eq!(report.loaded_ids(), vec!["gamma", "alpha"]);
}

#[test]
fn panicking_lifecycle_callback_is_contained() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "chatty.extension.json", "chatty", "Chatty");
    let calls = Arc::new(Mutex::new(Vec::new()));

    let host = host(Arc::clone(&calls));
    let report = host.load_all(&host.discover(dir.path()));
    let mut table = ExtensionTable::new();
    for extension in report.loaded {
        table.insert(extension).unwrap();
    }

    table.notify_session_joined();
    table.notify_handshake_completed("chatty");
    assert!(table.render_panel("chatty"));
    table.notify_session_left();

    assert_eq!(
        *calls.lock().unwrap(),
        vec!["joined", "completed", "render", "left"]
    );
}

#[test]
fn callbacks_follow_the_cached_descriptor() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let descriptor = ExtensionDescriptor {
        id: "chatty".to_string(),
        version: "1.0.0".to_string(),
        source: PathBuf::from("chatty.extension.json"),
        capabilities: CapabilitySet::new(),
    };
    let mut table = ExtensionTable::new();
    table
        .insert(LoadedExtension::new(
            descriptor,
            Box::new(Chatty {
                calls: Arc::clone(&calls),
            }),
            Vec::new(),
        ))
        .unwrap();

    table.notify_session_joined();
    table.notify_handshake_completed("chatty");
    assert!(!table.render_panel("chatty"));
    table.notify_session_left();

    assert!(calls.lock().unwrap().is_empty());
}
