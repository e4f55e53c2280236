//! ZIP bundles of stored media for bulk download.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("none of the requested files could be read")]
    Empty,

    #[error("failed to build ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to write ZIP archive: {0}")]
    Io(#[from] std::io::Error),
}

/// A file to add, and the name it gets inside the archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub id: String,
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug)]
pub struct Archive {
    pub bytes: Vec<u8>,
    /// Ids of the entries actually written
    pub included: Vec<String>,
}

/// Build an in-memory ZIP. Unreadable files are skipped; an archive with no
/// entries at all is an error.
///
/// This does blocking file I/O; call it from `spawn_blocking`.
pub fn build_zip(entries: Vec<ArchiveEntry>) -> Result<Archive, ArchiveError> {
    let mut buffer = Cursor::new(Vec::new());
    let mut included = Vec::new();
    let mut used_names = HashSet::new();

    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(9))
            .unix_permissions(0o644);

        for entry in entries {
            let data = match std::fs::read(&entry.path) {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        media_id = %entry.id,
                        path = %entry.path.display(),
                        error = %e,
                        "Skipping unreadable file in archive"
                    );
                    continue;
                }
            };

            let name = unique_entry_name(&sanitize_entry_name(&entry.name, &entry.id), &mut used_names);
            zip.start_file(name.as_str(), options)?;
            zip.write_all(&data)?;
            included.push(entry.id);
        }

        zip.finish()?;
    }

    if included.is_empty() {
        return Err(ArchiveError::Empty);
    }

    Ok(Archive {
        bytes: buffer.into_inner(),
        included,
    })
}

/// Base name only, so entries cannot escape the extraction directory
fn sanitize_entry_name(name: &str, fallback_id: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(str::to_string)
        .unwrap_or_else(|| format!("media-{}", fallback_id))
}

/// Append " (n)" before the extension until the name is unused
fn unique_entry_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };

    let mut n = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
