use chrono::{DateTime, Utc};
use std::fs::File;
use std::io;
use std::path::Path;

pub fn human(b: u64) -> String {
    use humansize::{format_size, BINARY};
    format_size(b, BINARY)
}

pub fn fmt_time(unix: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(unix, 0).unwrap_or_default();
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn now() -> i64 {
    use std::time::*;
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Flush a freshly written file and its containing directory to stable
/// storage. Increment files must hit the disk before the mirror entry they
/// protect is renamed over.
pub fn fsync_file_and_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}

pub fn print_banner(out: &crate::output::OutputCtx) {
    use colored::Colorize;
    out.println(
        &format!(
            " ▲ Regressum v{}  — reverse-delta backup system ",
            env!("CARGO_PKG_VERSION")
        )
        .black()
        .on_cyan()
        .bold()
        .to_string(),
    );
    out.println("");
}
