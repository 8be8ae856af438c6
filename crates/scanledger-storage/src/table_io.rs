//! Table files on disk.
//!
//! Writers never expose a half-written file: content goes to a sibling temp
//! file which is then renamed over the target.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use scanledger_model::delimited;
use scanledger_model::{Table, TableError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableIoError {
    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed table `{path}`: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: TableError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TableIoError + '_ {
    move |source| TableIoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn read_table(path: &Path, delimiter: char) -> Result<Table, TableIoError> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    delimited::parse(&text, delimiter).map_err(|source| TableIoError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// `Ok(None)` when the file does not exist.
pub fn read_table_if_exists(path: &Path, delimiter: char) -> Result<Option<Table>, TableIoError> {
    if !path.exists() {
        return Ok(None);
    }
    read_table(path, delimiter).map(Some)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "table".to_string());
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
}

/// Write `table` so readers see either the old file or the complete new one.
pub fn write_table_atomic(path: &Path, table: &Table, delimiter: char) -> Result<(), TableIoError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }
    let tmp = temp_path_for(path);
    let text = delimited::render(table, delimiter);

    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(source) = written {
        let _ = fs::remove_file(&tmp);
        return Err(TableIoError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    tracing::debug!(path = %path.display(), rows = table.len(), "table written");
    Ok(())
}
