use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Written pid file; removed on drop so a clean shutdown leaves nothing
/// behind. An unclean exit leaves a stale file, which the next start
/// detects and overwrites.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the pid file for this process.
    ///
    /// If a file already exists: a live owning process is an error (the
    /// daemon refuses to double-start); a dead one is stale and gets
    /// overwritten with a warning.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            let old = fs::read_to_string(&path)
                .with_context(|| format!("read pid file {}", path.display()))?;
            match old.trim().parse::<u32>() {
                Ok(pid) if process_alive(pid) => {
                    bail!(
                        "another instance appears to be running (pid {pid}, {})",
                        path.display()
                    );
                }
                _ => {
                    warn!(path = %path.display(), "overwriting stale pid file");
                }
            }
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create pid file directory {}", parent.display()))?;
        }
        fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("write pid file {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // No cheap portable probe; treat any existing file as stale.
    false
}
