use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "nirmatch")]
#[command(about = "Correlate NIR pairs and camera captures and relocate them into an output tree", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to <state-dir>/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State directory for plans, movement logs, and snapshots
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan once and print groups and statistics
    Scan,
    /// Watch the role directories and keep groups up to date
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Build and save the move plan without touching any file
    Plan(TransferArgs),
    /// Build the move plan and execute it
    Transfer(TransferArgs),
    /// Move groups or single source paths into the disposal tree
    Dispose {
        /// Group names as printed by `scan` (group_001, ...) or source paths
        #[arg(required = true)]
        groups: Vec<String>,
        /// Subject folder inside the disposal tree
        #[arg(long)]
        subject: Option<String>,
    },
    /// Write per-subject file inventories for a work-date output folder
    Collect {
        /// Work-date folder (<output>/<yyMMdd>)
        date_dir: PathBuf,
    },
    /// Export the current group list as CSV
    ExportCsv {
        /// Destination file
        path: PathBuf,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct TransferArgs {
    #[arg(long, value_enum, default_value_t = ModeArg::Copy)]
    pub mode: ModeArg,
    /// Transfer only this line (1 or 2)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub line: Option<u8>,
    /// Earliest N groups per subject
    #[arg(long)]
    pub limit: Option<usize>,
    /// Keep only the oldest N NIR bundles per subject
    #[arg(long)]
    pub nir_keep: Option<usize>,
    /// How to answer destination conflicts
    #[arg(long, value_enum, default_value_t = ConflictArg::Prompt)]
    pub on_conflict: ConflictArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Copy,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConflictArg {
    /// Ask on stdin
    Prompt,
    Overwrite,
    OverwriteAll,
    Cancel,
}
