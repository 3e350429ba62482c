// ─────────────────────────────────────────────────────────────────────────────
// Regressum v0.2.0
// Copyright 2026 Ankit Chaubey <ankitchaubey.dev@gmail.com>
// github.com/ankit-chaubey
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// All rights reserved 2026.
// ─────────────────────────────────────────────────────────────────────────────
mod backup;
mod cache;
mod collate;
mod config;
mod errors;
mod hardlink;
mod increments;
mod meta;
mod output;
mod patch;
mod record;
mod reducer;
mod regress;
mod repo;
mod restore;
mod rolling;
mod sessions;
mod stats;
#[cfg(test)]
mod tests;
mod utils;
mod verify;
mod walk;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use config::{Config, SessionConfig};
use increments::SessionTime;
use output::OutputCtx;

// ─── CLI definition ─────────────────────────────────────────────────────────

/// Regressum — incremental reverse-delta backup with point-in-time restore.
#[derive(Parser)]
#[command(
    name = "regressum",
    version = env!("CARGO_PKG_VERSION"),
    author = "Ankit Chaubey <ankitchaubey.dev@gmail.com>",
    about = "Incremental reverse-delta backup system with faithful restore",
    after_help = concat!(
        "EXAMPLES:
",
        "  regressum backup ./documents ./backup-repo
",
        "  regressum backup ./documents ./backup-repo --exclude '*.o'
",
        "  regressum list ./backup-repo
",
        "  regressum restore ./backup-repo ./restored --at 2024-03-01T12:30:00+01:00
",
        "  regressum verify ./backup-repo
",
        "  regressum regress ./backup-repo
",
        "  regressum remove-older-than ./backup-repo 2024-01-01T00:00:00+00:00
",
        "  regressum completions bash >> ~/.bashrc
",
        "
CONFIG: ~/.config/regressum/config.toml (run `regressum setup` to configure)"
    )
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Suppress all output except errors
    #[arg(long, global = true, short = 'q')]
    quiet: bool,

    /// Show what would happen without doing it (regress, remove-older-than)
    #[arg(long, global = true, short = 'n')]
    dry_run: bool,

    /// Append all output to this log file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a source tree into a repository
    Backup {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,
        #[arg(value_name = "REPO")]
        repo: PathBuf,
        /// Exclude glob patterns (repeatable)
        #[arg(long, value_name = "PATTERN")]
        exclude: Vec<String>,
        /// Store increments and metadata uncompressed
        #[arg(long)]
        no_compression: bool,
        /// Do not track hard-link groups
        #[arg(long)]
        no_hard_links: bool,
        /// Skip fsync at session end
        #[arg(long)]
        no_fsync: bool,
        /// Override the session clock (unix seconds; mainly for tests)
        #[arg(long, value_name = "SECS", hide = true)]
        current_time: Option<i64>,
    },

    /// Restore a snapshot into a target directory
    Restore {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
        #[arg(value_name = "TARGET")]
        target: PathBuf,
        /// Time to restore: a session timestamp, unix seconds, or "now"
        #[arg(long, value_name = "TIME", default_value = "now")]
        at: String,
        /// Make a non-empty target match the snapshot exactly
        #[arg(long, short)]
        force: bool,
        /// Fail instead of walking the mirror when metadata is missing
        #[arg(long)]
        require_metadata: bool,
    },

    /// List the session times available in a repository
    List {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
    },

    /// Verify mirror files against their stored hashes
    Verify {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
    },

    /// Roll an aborted session back to the previous state
    Regress {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
    },

    /// Delete increments older than a given time
    RemoveOlderThan {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
        /// Cutoff: a session timestamp or unix seconds
        #[arg(value_name = "TIME")]
        time: String,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate for
        #[arg(value_name = "SHELL", value_enum)]
        shell: clap_complete::Shell,
    },

    /// Interactive configuration setup
    Setup,

    /// Print current configuration
    Config,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            for cause in e.chain().skip(1) {
                eprintln!("  {} {}", "caused by:".yellow(), cause);
            }
            std::process::exit(errors::RET_ERR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = Config::load();

    let out = OutputCtx::new(
        cli.json || cfg.output.json,
        cli.quiet || cfg.output.quiet,
        cli.dry_run,
        cli.log_file.as_deref(),
    )?;

    let mut ret = errors::RET_OK;
    match cli.command {
        // ── Backup ──────────────────────────────────────────────────────────
        Commands::Backup {
            source,
            repo,
            mut exclude,
            no_compression,
            no_hard_links,
            no_fsync,
            current_time,
        } => {
            utils::print_banner(&out);
            let mut session = SessionConfig::from_config(&cfg);
            if no_compression {
                session.compression = false;
            }
            if no_hard_links {
                session.preserve_hardlinks = false;
            }
            if no_fsync {
                session.fsync = false;
            }
            session.current_time = current_time;

            let mut excludes = cfg.backup.exclude.clone();
            excludes.append(&mut exclude);

            if out.dry_run {
                out.dry(&format!("would back up: {}", source.display()));
                out.dry(&format!("would write to: {}", repo.display()));
                return Ok(ret);
            }
            ret |= backup::backup(
                &source,
                &repo,
                &backup::BackupOptions {
                    cfg: session,
                    excludes,
                },
                &out,
            )?;
        }

        // ── Restore ─────────────────────────────────────────────────────────
        Commands::Restore {
            repo,
            target,
            at,
            force,
            require_metadata,
        } => {
            utils::print_banner(&out);
            let session = SessionConfig::from_config(&cfg);
            let requested = parse_time(&at)?;
            ret |= restore::restore(
                &repo,
                &target,
                requested,
                &restore::RestoreOptions {
                    cfg: session,
                    force: force || cfg.restore.force,
                    require_metadata: require_metadata || cfg.restore.require_metadata,
                },
                &out,
            )?;
        }

        // ── List ────────────────────────────────────────────────────────────
        Commands::List { repo } => {
            sessions::list(&repo, &out)?;
        }

        // ── Verify ──────────────────────────────────────────────────────────
        Commands::Verify { repo } => {
            utils::print_banner(&out);
            ret |= verify::verify(&repo, &out)?;
        }

        // ── Regress ─────────────────────────────────────────────────────────
        Commands::Regress { repo } => {
            utils::print_banner(&out);
            ret |= regress::regress(&repo, &out, out.dry_run)?;
        }

        // ── Remove older than ───────────────────────────────────────────────
        Commands::RemoveOlderThan { repo, time } => {
            let cutoff = parse_time(&time)?;
            sessions::remove_older_than(&repo, cutoff, &out)?;
        }

        // ── Completions ─────────────────────────────────────────────────────
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "regressum", &mut std::io::stdout());
        }

        // ── Setup ───────────────────────────────────────────────────────────
        Commands::Setup => {
            Config::setup_interactive()?;
        }

        // ── Config ──────────────────────────────────────────────────────────
        Commands::Config => {
            cfg.print();
            if let Some(p) = config::config_path() {
                if !p.exists() {
                    println!();
                    println!(
                        "  {} Config file does not exist yet. Run {} to create it.",
                        "Note:".yellow(),
                        "regressum setup".cyan()
                    );
                }
            }
        }
    }

    Ok(ret)
}

fn parse_time(s: &str) -> Result<SessionTime> {
    if s.eq_ignore_ascii_case("now") {
        return Ok(SessionTime::now());
    }
    SessionTime::parse(s).with_context(|| {
        format!(
            "Cannot parse time '{}'. Use a session timestamp \
             (2024-03-01T12:30:00+01:00), unix seconds, or 'now'",
            s
        )
    })
}
