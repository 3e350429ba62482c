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
//! ~/.config/regressum/config.toml — user defaults — and the immutable
//! per-session configuration handed to every engine component.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

// ─── User config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backup: BackupConfig,
    pub restore: RestoreConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Gzip-compress increments and metadata
    pub compression: bool,
    /// Preserve hard-link groups across backup and restore
    pub preserve_hardlinks: bool,
    /// Depth of the signature/delta pipeline (flush cadence derives from it)
    pub pipeline_depth: usize,
    /// fsync data files before declaring the session done
    pub fsync: bool,
    /// Default glob exclude patterns
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Overwrite existing files in the restore target
    pub force: bool,
    /// Fail instead of walking the mirror when metadata is missing
    pub require_metadata: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub json: bool,
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup: BackupConfig {
                compression: true,
                preserve_hardlinks: true,
                pipeline_depth: 32,
                fsync: true,
                exclude: vec![
                    ".DS_Store".into(),
                    "Thumbs.db".into(),
                    "*.tmp".into(),
                    "*.swp".into(),
                ],
            },
            restore: RestoreConfig {
                force: false,
                require_metadata: false,
            },
            output: OutputConfig {
                json: false,
                quiet: false,
            },
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("regressum").join("config.toml"))
}

impl Config {
    /// Load config from disk, falling back to defaults.
    pub fn load() -> Self {
        if let Some(path) = config_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(cfg) => return cfg,
                    Err(e) => {
                        eprintln!(
                            "{} Could not parse config at {}: {}",
                            "warning:".yellow(),
                            path.display(),
                            e
                        );
                    }
                }
            }
        }
        Config::default()
    }

    fn load_from(path: &PathBuf) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
        let cfg: Config =
            toml::from_str(&text).with_context(|| format!("Invalid TOML in {}", path.display()))?;
        Ok(cfg)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(path) = config_path() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create config dir {}", parent.display()))?;
            }
            let text = toml::to_string_pretty(self).context("Failed to serialize config")?;
            fs::write(&path, text)
                .with_context(|| format!("Cannot write config to {}", path.display()))?;
            println!(
                "{} {}",
                "Config saved to:".green().bold(),
                path.display().to_string().yellow()
            );
        } else {
            anyhow::bail!("Cannot determine config directory for this OS");
        }
        Ok(())
    }

    /// Interactive setup — prompts the user for each field.
    pub fn setup_interactive() -> Result<()> {
        let mut cfg = Config::load();

        println!("{}", "─".repeat(60).dimmed());
        println!("{}", "  Regressum Interactive Setup".cyan().bold());
        println!(
            "  {}",
            "Press Enter to keep current value shown in [brackets]".dimmed()
        );
        println!("{}", "─".repeat(60).dimmed());

        let comp = prompt(
            "Compress increments with gzip (true/false)",
            &cfg.backup.compression.to_string(),
        )?;
        cfg.backup.compression = comp.eq_ignore_ascii_case("true") || comp == "1";

        let hl = prompt(
            "Preserve hard links (true/false)",
            &cfg.backup.preserve_hardlinks.to_string(),
        )?;
        cfg.backup.preserve_hardlinks = hl.eq_ignore_ascii_case("true") || hl == "1";

        let depth = prompt(
            "Pipeline depth",
            &cfg.backup.pipeline_depth.to_string(),
        )?;
        if let Ok(v) = depth.parse::<usize>() {
            cfg.backup.pipeline_depth = v.max(4);
        }

        let fsync = prompt("fsync at session end (true/false)", &cfg.backup.fsync.to_string())?;
        cfg.backup.fsync = fsync.eq_ignore_ascii_case("true") || fsync == "1";

        println!(
            "
  {} (current: {})",
            "Default exclude patterns (comma-separated globs):".cyan(),
            cfg.backup.exclude.join(", ").yellow()
        );
        let excl = prompt("Exclude patterns", &cfg.backup.exclude.join(","))?;
        if !excl.trim().is_empty() {
            cfg.backup.exclude = excl.split(',').map(|s| s.trim().to_string()).collect();
        }

        let force = prompt(
            "Overwrite existing files on restore (true/false)",
            &cfg.restore.force.to_string(),
        )?;
        cfg.restore.force = force.eq_ignore_ascii_case("true") || force == "1";

        println!();
        cfg.save()?;
        println!("{}", "  Setup complete!".green().bold());
        println!("{}", "─".repeat(60).dimmed());
        Ok(())
    }

    /// Print current config in a readable table.
    pub fn print(&self) {
        println!("{}", "─".repeat(60).dimmed());
        println!("{}", "  Current Configuration".cyan().bold());
        println!("{}", "─".repeat(60).dimmed());

        let p = config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".into());
        println!("  {} {}", "Config file:".dimmed(), p.yellow());
        println!();

        println!("  [backup]");
        println!(
            "    compression         = {}",
            self.backup.compression.to_string().yellow()
        );
        println!(
            "    preserve_hardlinks  = {}",
            self.backup.preserve_hardlinks.to_string().yellow()
        );
        println!(
            "    pipeline_depth      = {}",
            self.backup.pipeline_depth.to_string().yellow()
        );
        println!(
            "    fsync               = {}",
            self.backup.fsync.to_string().yellow()
        );
        println!("    exclude             = {:?}", self.backup.exclude);

        println!();
        println!("  [restore]");
        println!(
            "    force               = {}",
            self.restore.force.to_string().yellow()
        );
        println!(
            "    require_metadata    = {}",
            self.restore.require_metadata.to_string().yellow()
        );

        println!();
        println!("  [output]");
        println!(
            "    json                = {}",
            self.output.json.to_string().yellow()
        );
        println!(
            "    quiet               = {}",
            self.output.quiet.to_string().yellow()
        );
        println!("{}", "─".repeat(60).dimmed());
    }
}

fn prompt(label: &str, current: &str) -> Result<String> {
    print!("  {} [{}]: ", label.cyan(), current.yellow());
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim().to_string();
    if trimmed.is_empty() {
        Ok(current.to_string())
    } else {
        Ok(trimmed)
    }
}

// ─── Session config ────────────────────────────────────────────────────────

/// Immutable configuration of one engine session, constructed once at session
/// start and passed by reference everywhere. Never mutated mid-session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub compression: bool,
    pub preserve_hardlinks: bool,
    pub pipeline_depth: usize,
    /// Override the session clock (tests and resumed sessions).
    pub current_time: Option<i64>,
    pub fsync: bool,
    /// Effective uid; 0 unlocks ownership restoration and skips the
    /// permission-elevation dance.
    pub process_uid: u32,
}

impl SessionConfig {
    pub fn from_config(cfg: &Config) -> Self {
        SessionConfig {
            compression: cfg.backup.compression,
            preserve_hardlinks: cfg.backup.preserve_hardlinks,
            pipeline_depth: cfg.backup.pipeline_depth.max(4),
            current_time: None,
            fsync: cfg.backup.fsync,
            process_uid: effective_uid(),
        }
    }

    /// CCPP capacity: four times the pipeline depth, leeway for the
    /// round trip to the delta side and back.
    pub fn cache_size(&self) -> usize {
        self.pipeline_depth * 4
    }

    /// Flush cadence on the signature stream.
    pub fn flush_threshold(&self) -> usize {
        self.pipeline_depth.saturating_sub(2)
    }

    pub fn is_root(&self) -> bool {
        self.process_uid == 0
    }
}

#[cfg(unix)]
pub fn effective_uid() -> u32 {
    unsafe { libc::geteuid() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_derives_cache_and_flush() {
        let cfg = Config::default();
        let mut s = SessionConfig::from_config(&cfg);
        s.pipeline_depth = 32;
        assert_eq!(s.cache_size(), 128);
        assert_eq!(s.flush_threshold(), 30);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.backup.pipeline_depth, cfg.backup.pipeline_depth);
        assert_eq!(back.backup.exclude, cfg.backup.exclude);
    }
}
