use std::{
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::poll::{Clock, PollPolicy, poll_until};

const GLB_MAGIC: &[u8; 4] = b"glTF";

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("no verified `{stem}.{extension}` appeared in [{dirs}] within {seconds}s")]
    NotFound {
        stem: String,
        extension: String,
        dirs: String,
        seconds: u64,
    },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("creating {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("copying {from} -> {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What an exported artifact must look like to be picked up.
#[derive(Debug, Clone)]
pub struct ExportWatch<'a> {
    pub dirs: &'a [PathBuf],
    pub stem: &'a str,
    pub extension: &'a str,
    pub min_bytes: u64,
    /// Files last modified before this instant are leftovers from earlier runs.
    pub since: SystemTime,
}

impl ExportWatch<'_> {
    /// First verified match, searching directories in priority order and
    /// preferring the newest file within a directory.
    pub async fn find(&self) -> Option<PathBuf> {
        for dir in self.dirs {
            let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
                continue;
            };
            let mut newest: Option<(SystemTime, PathBuf)> = None;
            while let Ok(Some(entry)) = entries.next_entry().await {
                let matches = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| self.matches_name(name));
                if !matches {
                    continue;
                }
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                let Ok(modified) = meta.modified() else {
                    continue;
                };
                if !meta.is_file() || modified < self.since {
                    continue;
                }
                if newest.as_ref().is_some_and(|(best, _)| *best >= modified) {
                    continue;
                }
                let path = entry.path();
                if self.verify(&path).await {
                    newest = Some((modified, path));
                }
            }
            if let Some((_, path)) = newest {
                return Some(path);
            }
        }
        None
    }

    /// `<stem>.<ext>`, or the browser's de-duplicated `<stem> (N).<ext>`.
    /// In-progress downloads never match because their extension differs.
    fn matches_name(&self, name: &str) -> bool {
        let Some(base) = name
            .strip_suffix(self.extension)
            .and_then(|rest| rest.strip_suffix('.'))
        else {
            return false;
        };
        let Some(suffix) = base.strip_prefix(self.stem) else {
            return false;
        };
        if suffix.is_empty() {
            return true;
        }
        suffix
            .trim_start()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    }

    async fn verify(&self, path: &Path) -> bool {
        match verify_artifact(path, self.min_bytes).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(target = "stager.retrieve", path = %path.display(), "artifact_not_ready");
                false
            }
            Err(err) => {
                debug!(target = "stager.retrieve", path = %path.display(), error = %err, "artifact_unreadable");
                false
            }
        }
    }
}

/// Large enough and starts with the binary glTF magic.
pub async fn verify_artifact(path: &Path, min_bytes: u64) -> io::Result<bool> {
    let mut file = tokio::fs::File::open(path).await?;
    if file.metadata().await?.len() < min_bytes {
        return Ok(false);
    }
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic).await {
        Ok(_) => Ok(&magic == GLB_MAGIC),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err),
    }
}

pub async fn await_export(
    watch: &ExportWatch<'_>,
    policy: PollPolicy,
    clock: &dyn Clock,
) -> Result<PathBuf, RetrievalError> {
    let (found, checks) = poll_until(clock, policy, move || async move { watch.find().await }).await;
    crate::metrics::poll_checks("download", checks);
    match found {
        Some(path) => {
            info!(target = "stager.retrieve", path = %path.display(), checks, "export_found");
            Ok(path)
        }
        None => Err(RetrievalError::NotFound {
            stem: watch.stem.to_string(),
            extension: watch.extension.to_string(),
            dirs: watch
                .dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            seconds: policy.timeout.as_secs(),
        }),
    }
}

/// Moves `artifact` to `<asset_dir>/<stem>.<extension>`.
///
/// The copy goes through a `.part` file so the destination is never half
/// written; the downloaded original is removed afterwards on a best-effort
/// basis.
pub async fn persist(
    artifact: &Path,
    asset_dir: &Path,
    stem: &str,
    extension: &str,
) -> Result<PathBuf, PersistError> {
    tokio::fs::create_dir_all(asset_dir)
        .await
        .map_err(|source| PersistError::CreateDir {
            path: asset_dir.to_path_buf(),
            source,
        })?;
    let dest = asset_dir.join(format!("{stem}.{extension}"));
    if same_file(artifact, &dest).await {
        return Ok(dest);
    }

    let partial = asset_dir.join(format!("{stem}.{extension}.part"));
    let copied = async {
        tokio::fs::copy(artifact, &partial).await?;
        tokio::fs::rename(&partial, &dest).await
    }
    .await;
    if let Err(source) = copied {
        if let Err(cleanup) = tokio::fs::remove_file(&partial).await
            && cleanup.kind() != io::ErrorKind::NotFound
        {
            warn!(target = "stager.retrieve", path = %partial.display(), error = %cleanup, "partial_cleanup_failed");
        }
        return Err(PersistError::Copy {
            from: artifact.to_path_buf(),
            to: dest,
            source,
        });
    }

    if let Err(err) = tokio::fs::remove_file(artifact).await {
        warn!(target = "stager.retrieve", path = %artifact.display(), error = %err, "download_cleanup_failed");
    }
    info!(target = "stager.retrieve", path = %dest.display(), "asset_persisted");
    Ok(dest)
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (
        tokio::fs::canonicalize(a).await,
        tokio::fs::canonicalize(b).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
