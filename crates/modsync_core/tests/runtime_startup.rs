use modsync_core::{
    ContentContributions, ContentItem, ContentSetKind, Diagnostics, EntryPointCatalog, Extension,
    ExtensionFailure, HostConfig, LoopbackNetwork, LoopbackTransport, ManifestLoader, ManualClock,
    NoticeKind, PanelError, PanelFrame, RecordingSink, RuntimeError, RuntimeOptions,
    SessionRuntime, UiPanel,
};
use serde_json::json;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Tuner {
    frames: Arc<AtomicUsize>,
}

impl Extension for Tuner {
    fn initialize(
        &mut self,
        contributions: &mut ContentContributions,
    ) -> Result<String, ExtensionFailure> {
        contributions.add("tuner.dial", json!({ "steps": 8 }));
        Ok("tuner".to_string())
    }

    fn ui_panel(&mut self) -> Option<&mut dyn UiPanel> {
        Some(self)
    }
}

impl UiPanel for Tuner {
    fn render_frame(&mut self) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

struct Quiet;

impl Extension for Quiet {
    fn initialize(
        &mut self,
        contributions: &mut ContentContributions,
    ) -> Result<String, ExtensionFailure> {
        contributions.add("quiet.stone", json!(null));
        Ok("quiet".to_string())
    }
}

struct Harness {
    runtime: SessionRuntime<LoopbackTransport>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
    frames: Arc<AtomicUsize>,
    _dir: tempfile::TempDir,
}

fn harness(load_delay_ms: u64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    for (id, entry_point) in [("quiet", "Quiet"), ("tuner", "Tuner"), ("broken", "Missing")] {
        fs::write(
            dir.path().join(format!("{id}.extension.json")),
            json!({ "id": id, "version": "1.0.0", "entry_point": entry_point }).to_string(),
        )
        .unwrap();
    }

    let frames = Arc::new(AtomicUsize::new(0));
    let mut catalog = EntryPointCatalog::new();
    let tuner_frames = Arc::clone(&frames);
    catalog
        .register_type("Quiet", || Quiet)
        .register_type("Tuner", move || Tuner {
            frames: Arc::clone(&tuner_frames),
        });

    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(RecordingSink::new());
    let config = HostConfig {
        extension_dir: dir.path().to_path_buf(),
        load_delay_ms,
        announce_interval_ms: 333,
        ..HostConfig::default()
    };
    let runtime = SessionRuntime::new(
        config,
        LoopbackNetwork::new().connect(),
        Arc::new(ManifestLoader::new(catalog)),
        vec![ContentItem::baseline("base.rock")],
        RuntimeOptions {
            clock: clock.clone(),
            diagnostics: Diagnostics::new().with_sink(sink.clone()),
        },
    )
    .unwrap();

    Harness {
        runtime,
        sink,
        clock,
        frames,
        _dir: dir,
    }
}

fn wait_for_background_load(harness: &mut Harness) {
    for _ in 0..500 {
        harness.runtime.tick();
        if !harness.runtime.is_loading() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("background load did not finish");
}

#[test]
fn startup_load_is_deferred_and_announced_in_steps() {
    let mut harness = harness(1_000);
    harness.runtime.schedule_startup_load();

    harness.runtime.tick();
    assert!(!harness.runtime.is_loading());
    assert!(harness.runtime.context().extensions().is_empty());

    harness.clock.advance(Duration::from_millis(1_000));
    harness.runtime.tick();
    assert!(harness.runtime.is_loading() || !harness.runtime.context().extensions().is_empty());
    wait_for_background_load(&mut harness);

    assert_eq!(
        harness.runtime.context().extensions().ids(),
        vec!["quiet".to_string(), "tuner".to_string()]
    );
    assert_eq!(harness.sink.count(NoticeKind::LoadFailed), 1);
    assert_eq!(harness.sink.count(NoticeKind::ExtensionLoaded), 1);

    harness.clock.advance(Duration::from_millis(333));
    harness.runtime.tick();
    let announced: Vec<String> = harness
        .sink
        .notices()
        .into_iter()
        .filter(|notice| notice.kind == NoticeKind::ExtensionLoaded)
        .map(|notice| notice.message)
        .collect();
    assert_eq!(announced, vec!["Loaded quiet", "Loaded tuner"]);
}

#[test]
fn loaded_content_stays_baseline_until_a_session_reconciles() {
    let mut harness = harness(0);
    let installed = harness.runtime.load_now();
    assert_eq!(installed, vec!["quiet", "tuner"]);

    let view = harness.runtime.content_view();
    assert_eq!(view.current().kind(), ContentSetKind::Baseline);

    harness.runtime.on_local_session_ready();
    assert_eq!(
        view.current().names(),
        vec!["base.rock", "quiet.stone", "tuner.dial"]
    );

    harness.runtime.on_left_session();
    assert_eq!(view.current().names(), vec!["base.rock"]);
}

#[test]
fn offline_session_picks_up_a_deferred_load() {
    let mut harness = harness(1_000);
    harness.runtime.schedule_startup_load();
    harness.runtime.on_local_session_ready();
    assert_eq!(
        harness.runtime.active_content_set().kind(),
        ContentSetKind::Baseline
    );

    harness.clock.advance(Duration::from_millis(1_000));
    harness.runtime.tick();
    wait_for_background_load(&mut harness);

    let active = harness.runtime.active_content_set();
    assert_eq!(active.kind(), ContentSetKind::Extended);
    assert_eq!(active.names(), vec!["base.rock", "quiet.stone", "tuner.dial"]);
}

#[test]
fn second_install_of_same_extension_is_skipped() {
    let mut harness = harness(0);
    assert_eq!(harness.runtime.load_now().len(), 2);
    assert!(harness.runtime.load_now().is_empty());
    assert_eq!(harness.runtime.context().extensions().len(), 2);
}

#[test]
fn options_menu_lists_and_renders_ui_extensions() {
    let mut harness = harness(0);
    harness.runtime.load_now();

    assert_eq!(harness.runtime.panel_frame(), PanelFrame::Hidden);
    assert!(harness.runtime.toggle_panel());
    assert!(harness.runtime.panel_locks_input());

    let entries = harness.runtime.panel_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].label, "tuner Options");
    assert_eq!(harness.runtime.panel_frame(), PanelFrame::Menu(entries));

    assert_eq!(
        harness.runtime.open_panel("quiet"),
        Err(PanelError::NoPanel("quiet".to_string()))
    );
    assert_eq!(
        harness.runtime.open_panel("ghost"),
        Err(PanelError::UnknownExtension("ghost".to_string()))
    );

    harness.runtime.open_panel("tuner").unwrap();
    assert_eq!(
        harness.runtime.panel_frame(),
        PanelFrame::Extension {
            extension_id: "tuner".to_string()
        }
    );
    harness.runtime.panel_frame();
    assert_eq!(harness.frames.load(Ordering::SeqCst), 2);

    harness.runtime.close_panel();
    assert!(matches!(harness.runtime.panel_frame(), PanelFrame::Menu(_)));
    assert!(!harness.runtime.toggle_panel());
    assert!(!harness.runtime.panel_locks_input());
    assert_eq!(harness.runtime.panel_frame(), PanelFrame::Hidden);
}

#[test]
fn invalid_config_or_baseline_is_rejected() {
    let loader = Arc::new(ManifestLoader::default());
    let config = HostConfig {
        handshake_timeout_ms: 0,
        ..HostConfig::default()
    };
    let result = SessionRuntime::new(
        config,
        LoopbackNetwork::new().connect(),
        loader.clone(),
        Vec::new(),
        RuntimeOptions::default(),
    );
    assert!(matches!(result, Err(RuntimeError::Config(_))));

    let result = SessionRuntime::new(
        HostConfig::default(),
        LoopbackNetwork::new().connect(),
        loader,
        vec![ContentItem::baseline("dup"), ContentItem::baseline("dup")],
        RuntimeOptions::default(),
    );
    assert!(matches!(result, Err(RuntimeError::Registry(_))));
}
