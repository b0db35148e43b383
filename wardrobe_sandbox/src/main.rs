//! Standalone wardrobe host.
//!
//! Usage:
//!   cargo run -p wardrobe_sandbox -- [--config wardrobe.json] [--lod 1]
//!
//! Reads commands from stdin and applies them on the owning thread, pumping
//! queued host-object releases between commands. Type `help` for commands.

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;
use wardrobe_sandbox::{SandboxConfig, WardrobeSession};

fn parse_args() -> anyhow::Result<SandboxConfig> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut lod: Option<u8> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--lod" if i + 1 < args.len() => {
                lod = Some(
                    args[i + 1]
                        .parse()
                        .with_context(|| format!("invalid --lod {}", args[i + 1]))?,
                );
                i += 2;
            }
            _ => i += 1,
        }
    }

    let mut cfg = match config_path {
        Some(path) => SandboxConfig::load(&path)?,
        None => SandboxConfig::default(),
    };
    if lod.is_some() {
        cfg.equip.level_of_detail = lod;
    }
    Ok(cfg)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;

    // The session is bound to the thread that creates it.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build runtime")?;
    runtime.block_on(run(cfg))
}

async fn run(cfg: SandboxConfig) -> anyhow::Result<()> {
    info!(
        garments = cfg.catalog.garments.len(),
        tattoos = cfg.catalog.tattoos.len(),
        lod = ?cfg.equip.level_of_detail,
        "Starting wardrobe"
    );
    let mut session = WardrobeSession::new(cfg);

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Wardrobe ready. Type 'help' for commands, 'quit' to exit.");
    println!();

    while let Some(line) = console_rx.recv().await {
        if matches!(line.as_str(), "quit" | "exit") {
            break;
        }
        for out in session.exec(&line).await? {
            println!("{}", out);
        }
        session.pump();
    }

    info!("Wardrobe shutting down");
    session.dispose();
    Ok(())
}
