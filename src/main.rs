//! nirmatch: NIR/camera correlation and bulk relocation.
//!
//! Thin binary entry point. All logic lives in the `nirmatch-core`
//! and `nirmatch-app` crates.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands, ConflictArg, ModeArg, TransferArgs};
use nirmatch_app::state::AppState;
use nirmatch_core::config::{default_state_dir, Settings, SETTINGS_FILE};
use nirmatch_core::executor::ConflictResponse;
use nirmatch_core::model::{Group, Line};
use nirmatch_core::plan::TransferMode;
use nirmatch_core::selection::{subject_for, LineSelection, TransferRequest};
use nirmatch_core::transfer::TransferOutcome;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Cadence of the coordination loop.
const TICK_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let state_dir = match args.state_dir.clone() {
        Some(dir) => dir,
        None => default_state_dir().context("Cannot resolve the state directory")?,
    };
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| state_dir.join(SETTINGS_FILE));
    let settings = Settings::load(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;
    tracing::info!("nirmatch starting (state dir {})", state_dir.display());

    let mut state = AppState::new(settings, state_dir);
    match args.command {
        Commands::Scan => cmd_scan(&mut state),
        Commands::Watch { duration } => cmd_watch(&mut state, duration.map(Duration::from_secs)),
        Commands::Plan(t) => cmd_transfer(&mut state, &t, true),
        Commands::Transfer(t) => cmd_transfer(&mut state, &t, false),
        Commands::Dispose { groups, subject } => cmd_dispose(&mut state, &groups, subject),
        Commands::Collect { date_dir } => cmd_collect(&state, date_dir),
        Commands::ExportCsv { path } => {
            state.rescan();
            let n = nirmatch_core::report::export_groups_csv(state.session().groups(), &path)?;
            println!("{n} groups written to {}", path.display());
            Ok(())
        }
    }
}

fn cmd_scan(state: &mut AppState) -> anyhow::Result<()> {
    state.rescan();
    for g in state.session().groups() {
        println!("{}", describe(g));
    }
    let stats = state.session().stats();
    for (label, s) in [("line 1", stats.line1), ("line 2", stats.line2), ("total", stats.combined)] {
        println!(
            "{label}: {} groups, {} with NIR, {} without NIR, {} incomplete",
            s.total, s.with_nir, s.without_nir, s.failed
        );
    }
    for (role, count) in nirmatch_core::reader::count_role_files(state.session().settings()) {
        println!("{role}: {count} files");
    }
    Ok(())
}

fn cmd_watch(state: &mut AppState, duration: Option<Duration>) -> anyhow::Result<()> {
    let start = Instant::now();
    state.start_watching(start)?;
    let mut seen = state.status_seq();
    loop {
        let now = Instant::now();
        if duration.is_some_and(|d| now.duration_since(start) >= d) {
            break;
        }
        state.tick(now);
        for line in state.status_since(seen) {
            println!("{line}");
        }
        seen = state.status_seq();
        std::thread::sleep(TICK_INTERVAL);
    }
    state.stop_watching();
    Ok(())
}

fn cmd_transfer(state: &mut AppState, args: &TransferArgs, metadata_only: bool) -> anyhow::Result<()> {
    state.rescan();
    let request = TransferRequest {
        mode: match args.mode {
            ModeArg::Copy => TransferMode::Copy,
            ModeArg::Move => TransferMode::Move,
        },
        lines: match args.line {
            Some(1) => LineSelection::Only(Line::One),
            Some(_) => LineSelection::Only(Line::Two),
            None => LineSelection::Both,
        },
        limit: args.limit,
        nir_keep: args.nir_keep,
    };

    let prepared = state.start_transfer(request, metadata_only)?;
    if prepared.skipped > 0 {
        println!("{} incomplete groups skipped", prepared.skipped);
    }
    for (subject, at) in &prepared.already_moved {
        println!("warning: {subject} was already moved today at {at}");
    }
    if prepared.plan.is_none() {
        println!("nothing to transfer");
        return Ok(());
    }

    let stdin = std::io::stdin();
    while state.is_transferring() {
        state.tick(Instant::now());
        if let Some(conflict) = &state.pending_conflict {
            let response = match args.on_conflict {
                ConflictArg::Overwrite => ConflictResponse::Overwrite,
                ConflictArg::OverwriteAll => ConflictResponse::OverwriteAll,
                ConflictArg::Cancel => ConflictResponse::Cancel,
                ConflictArg::Prompt => {
                    print!(
                        "{} already exists at {}. [o]verwrite / overwrite [a]ll / [c]ancel: ",
                        conflict.name,
                        conflict.dst.display()
                    );
                    std::io::stdout().flush()?;
                    let mut line = String::new();
                    stdin.lock().read_line(&mut line)?;
                    match line.trim().to_ascii_lowercase().as_str() {
                        "o" | "overwrite" => ConflictResponse::Overwrite,
                        "a" | "all" => ConflictResponse::OverwriteAll,
                        _ => ConflictResponse::Cancel,
                    }
                }
            };
            state.answer_conflict(response);
            continue;
        }
        std::thread::sleep(TICK_INTERVAL);
    }

    match &state.last_outcome {
        Some(TransferOutcome::MetadataOnly { plan_paths }) | Some(TransferOutcome::Finished { plan_paths, .. }) => {
            for (subject, path) in plan_paths {
                println!("{subject}: plan {}", path.display());
            }
        }
        _ => {}
    }
    match &state.last_outcome {
        Some(TransferOutcome::Failed(reason)) => anyhow::bail!("transfer failed: {reason}"),
        Some(outcome) => println!("{}", outcome.summary()),
        None => {}
    }
    Ok(())
}

fn cmd_dispose(state: &mut AppState, groups: &[String], subject: Option<String>) -> anyhow::Result<()> {
    state.rescan();
    let subject = subject.unwrap_or_else(|| subject_for(Line::One, state.session().settings()));
    let names: Vec<&str> = groups.iter().map(String::as_str).collect();
    let report = state.dispose_groups(&names, &subject)?;
    for (item, dst) in &report.moved {
        println!("{} -> {}", item.path.display(), dst.display());
    }
    for (item, err) in &report.failed {
        println!("failed: {} ({err})", item.path.display());
    }
    Ok(())
}

fn cmd_collect(state: &AppState, date_dir: PathBuf) -> anyhow::Result<()> {
    let naming = &state.session().settings().naming;
    let summary = nirmatch_core::report::collect_output_inventory(&date_dir, &naming.with_nir, &naming.without_nir)
        .with_context(|| format!("Failed to collect {}", date_dir.display()))?;
    for path in &summary.saved {
        println!("{}", path.display());
    }
    println!("{}: {} files", summary.date, summary.total_files);
    Ok(())
}

fn describe(g: &Group) -> String {
    let normal = g.normal.as_ref().map(|n| n.key.as_str()).unwrap_or("-");
    let nir = g.nir.as_ref().map(|n| n.key.as_str()).unwrap_or("-");
    let cams: Vec<&str> = g
        .cams
        .iter()
        .map(|c| c.as_ref().map(|c| c.file.name.as_str()).unwrap_or("-"))
        .collect();
    let missing: Vec<String> = g.missing_slots().iter().map(|s| s.to_string()).collect();
    format!(
        "{} line {} {} normal={} nir={} cams=[{}]{}",
        g.name,
        g.line,
        g.timestamp.format("%Y-%m-%d %H:%M:%S"),
        normal,
        nir,
        cams.join(", "),
        if missing.is_empty() {
            String::new()
        } else {
            format!(" missing: {}", missing.join(", "))
        }
    )
}
