//! CLI smoke entry point.
//!
//! # Responsibility
//! - Load extensions from a directory into two in-memory peers.
//! - Run one authoritative handshake and print both active content sets.
//!
//! Usage: `modsync [extension_dir] [--log-dir <absolute dir>]`

use log::info;
use modsync_core::{
    init_logging, ContentContributions, ContentItem, EntryPointCatalog, Extension,
    ExtensionFailure, HostConfig, LoopbackNetwork, LoopbackTransport, ManifestLoader,
    NetworkedExtension, RuntimeOptions, SessionRuntime, UiPanel, PACKAGE_SUFFIX,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const MAX_SETTLE_ROUNDS: usize = 64;

struct ShieldPack {
    handshakes: usize,
}

impl Extension for ShieldPack {
    fn initialize(
        &mut self,
        contributions: &mut ContentContributions,
    ) -> Result<String, ExtensionFailure> {
        contributions
            .add("shields.bulwark", json!({ "block_cooldown": -0.25 }))
            .add("shields.reflect", json!({ "reflect_chance": 0.1 }));
        Ok("shields".to_string())
    }

    fn networked(&mut self) -> Option<&mut dyn NetworkedExtension> {
        Some(self)
    }
}

impl NetworkedExtension for ShieldPack {
    fn on_session_joined(&mut self) {
        info!("event=demo_hook module=cli status=ok extension_id=shields hook=joined");
    }

    fn on_session_left(&mut self) {
        info!("event=demo_hook module=cli status=ok extension_id=shields hook=left");
    }

    fn on_handshake_completed(&mut self) {
        self.handshakes += 1;
        info!(
            "event=demo_hook module=cli status=ok extension_id=shields hook=handshake_completed count={}",
            self.handshakes
        );
    }
}

struct TurboPack;

impl Extension for TurboPack {
    fn initialize(
        &mut self,
        contributions: &mut ContentContributions,
    ) -> Result<String, ExtensionFailure> {
        contributions.add("turbo.dash", json!({ "speed": 1.5 }));
        Ok("turbo".to_string())
    }

    fn ui_panel(&mut self) -> Option<&mut dyn UiPanel> {
        Some(self)
    }
}

impl UiPanel for TurboPack {
    fn render_frame(&mut self) {
        println!("  [turbo options] speed multiplier: 1.5");
    }
}

struct Args {
    extension_dir: Option<PathBuf>,
    log_dir: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        extension_dir: None,
        log_dir: None,
    };
    let mut raw = std::env::args().skip(1);
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--log-dir" => {
                args.log_dir = Some(raw.next().ok_or("--log-dir needs a value")?);
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag `{flag}`")),
            _ if args.extension_dir.is_none() => args.extension_dir = Some(PathBuf::from(arg)),
            _ => return Err(format!("unexpected argument `{arg}`")),
        }
    }
    Ok(args)
}

fn catalog() -> EntryPointCatalog {
    let mut catalog = EntryPointCatalog::new();
    catalog
        .register_type("ShieldPack", || ShieldPack { handshakes: 0 })
        .register_type("TurboPack", || TurboPack);
    catalog
}

/// Writes the demo manifests when `dir` holds no packages yet.
fn seed_demo_packages(dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|err| format!("cannot create `{}`: {err}", dir.display()))?;
    let has_packages = std::fs::read_dir(dir)
        .map_err(|err| format!("cannot list `{}`: {err}", dir.display()))?
        .filter_map(Result::ok)
        .any(|entry| entry.file_name().to_string_lossy().ends_with(PACKAGE_SUFFIX));
    if has_packages {
        return Ok(());
    }

    for (id, entry_point) in [("shields", "ShieldPack"), ("turbo", "TurboPack")] {
        let path = dir.join(format!("{id}{PACKAGE_SUFFIX}"));
        let manifest = json!({ "id": id, "version": "0.1.0", "entry_point": entry_point });
        std::fs::write(&path, manifest.to_string())
            .map_err(|err| format!("cannot write `{}`: {err}", path.display()))?;
    }
    println!("seeded demo packages in {}", dir.display());
    Ok(())
}

fn build_peer(
    config: &HostConfig,
    network: &LoopbackNetwork,
) -> Result<SessionRuntime<LoopbackTransport>, String> {
    let baseline = vec![
        ContentItem::baseline("base.punch"),
        ContentItem::baseline("base.block"),
    ];
    SessionRuntime::new(
        config.clone(),
        network.connect(),
        Arc::new(ManifestLoader::new(catalog())),
        baseline,
        RuntimeOptions::default(),
    )
    .map_err(|err| err.to_string())
}

fn settle(peers: &mut [&mut SessionRuntime<LoopbackTransport>]) {
    for _ in 0..MAX_SETTLE_ROUNDS {
        let work: usize = peers.iter_mut().map(|peer| peer.tick()).sum();
        if work == 0 {
            return;
        }
    }
}

fn print_content(label: &str, peer: &SessionRuntime<LoopbackTransport>) {
    let set = peer.active_content_set();
    println!(
        "{label}: {} [{}]",
        set.kind().as_str(),
        set.names().join(", ")
    );
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let mut config = HostConfig::from_env().map_err(|err| err.to_string())?;
    if let Some(dir) = args.extension_dir {
        config.extension_dir = dir;
    }
    if let Some(log_dir) = args.log_dir.as_deref() {
        init_logging(&config.log_level, log_dir)?;
    }

    seed_demo_packages(&config.extension_dir)?;
    println!("modsync_core version={}", modsync_core::core_version());

    let network = LoopbackNetwork::new();
    let mut host = build_peer(&config, &network)?;
    let mut guest = build_peer(&config, &network)?;
    println!("host loaded: {:?}", host.load_now());
    println!("guest loaded: {:?}", guest.load_now());

    host.on_joined_session(true);
    guest.on_joined_session(false);
    host.on_peer_joined(guest.local_peer());
    settle(&mut [&mut host, &mut guest]);

    print_content("host", &host);
    print_content("guest", &guest);

    if let Some(entry) = host.panel_entries().first() {
        host.toggle_panel();
        host.open_panel(&entry.extension_id)
            .map_err(|err| err.to_string())?;
        println!("panel: {}", entry.label);
        host.panel_frame();
    }

    guest.on_left_session();
    print_content("guest after leave", &guest);
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("modsync: {err}");
            ExitCode::FAILURE
        }
    }
}
