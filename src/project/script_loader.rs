//! Loading `.sql` scripts from a directory tree

use std::path::Path;

use anyhow::Result;
use encoding_rs::WINDOWS_1252;

use crate::error::SqlMetaError;
use crate::model::Script;

/// Read a file as a string, trying UTF-8 first, then Windows-1252 as fallback
fn read_file_with_encoding_fallback(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;

    let text = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(err) => {
            // Scripts saved by SSMS on Windows are often not UTF-8
            let bytes = err.into_bytes();
            let (decoded, _, had_errors) = WINDOWS_1252.decode(&bytes);
            if had_errors {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "File contains invalid characters",
                ));
            }
            decoded.into_owned()
        }
    };

    // Strip UTF-8 BOM if present
    Ok(match text.strip_prefix('\u{FEFF}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

/// Identity of a script at `path` under `root`: the relative path without
/// its extension, `/`-separated.
pub fn script_identity(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let without_extension = relative.with_extension("");
    without_extension
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every `*.sql` file under `dir`, as scripts ordered by identity.
pub fn load_scripts(dir: &Path) -> Result<Vec<Script>> {
    let mut scripts = Vec::new();

    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if !path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        {
            continue;
        }

        let text = read_file_with_encoding_fallback(path).map_err(|e| {
            SqlMetaError::ScriptReadError {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        scripts.push(Script::new(script_identity(dir, path), text));
    }

    scripts.sort_by(|a, b| a.identity.cmp(&b.identity));
    tracing::debug!(count = scripts.len(), dir = %dir.display(), "loaded scripts");
    Ok(scripts)
}
