//! Writing a [`FileSet`] into a workspace directory.

use std::path::Path;

use tracing::debug;

use super::fileset::FileSet;
use crate::errors::MaterializeError;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MaterializeError + '_ {
    move |source| MaterializeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write every file of `file_set` under `target`, creating intermediate
/// directories and overwriting existing files.
///
/// All paths are validated before the first write, so a set with a single
/// unsafe path leaves the disk untouched. An I/O failure partway through
/// leaves a partial directory behind; the caller discards the workspace.
pub async fn materialize(file_set: &FileSet, target: &Path) -> Result<(), MaterializeError> {
    let resolved = file_set.resolve_under(target)?;

    tokio::fs::create_dir_all(target)
        .await
        .map_err(io_error(target))?;

    for (path, content) in resolved {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        tokio::fs::write(&path, content.as_bytes())
            .await
            .map_err(io_error(&path))?;
        debug!(path = %path.display(), bytes = content.as_bytes().len(), "wrote file");
    }
    Ok(())
}
