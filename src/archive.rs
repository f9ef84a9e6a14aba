//! ZIP packaging of processed items

use bytes::Bytes;
use std::collections::HashSet;
use std::io::{Cursor, Write};

use crate::batch::ProcessingOutcome;
use crate::error::{EqualizerError, Result};

/// Prefix prepended to every archived file name
pub const ENTRY_PREFIX: &str = "equalized_";

/// Archive entry name for an uploaded file name.
///
/// Any client-side directory components are dropped.
pub fn archive_entry_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .filter(|b| !b.is_empty())
        .unwrap_or("audio.mp3");
    format!("{}{}", ENTRY_PREFIX, base)
}

/// Make `name` unique within `taken` by numbering repeats before the
/// extension: `a.mp3`, `a (2).mp3`, `a (3).mp3`.
fn unique_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name.as_str(), ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Pack every processed outcome into a ZIP archive.
///
/// Entries are stored uncompressed; MP3 data does not shrink further.
/// Failed outcomes are skipped.
pub fn build_archive(outcomes: &[ProcessingOutcome]) -> Result<Bytes> {
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .large_file(false);

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let mut taken = HashSet::new();
    let mut entries = 0usize;

    for outcome in outcomes {
        let ProcessingOutcome::Processed { name, bytes } = outcome else {
            continue;
        };
        let entry = unique_name(archive_entry_name(name), &mut taken);
        writer
            .start_file(entry.as_str(), options)
            .map_err(|e| EqualizerError::Archive(format!("{}: {}", entry, e)))?;
        writer.write_all(bytes)?;
        entries += 1;
    }

    if entries == 0 {
        return Err(EqualizerError::NothingToArchive);
    }

    let cursor = writer
        .finish()
        .map_err(|e| EqualizerError::Archive(e.to_string()))?;
    let data = cursor.into_inner();

    tracing::debug!(entries, bytes = data.len(), "Archive built");

    Ok(Bytes::from(data))
}
