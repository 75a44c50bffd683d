use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

/// A freshly claimed upload target: the resolved unique name, its path, and
/// an exclusively created file handle.
pub struct ClaimedFile {
    pub name: String,
    pub path: PathBuf,
    pub file: File,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Strict resolution for stored identifiers. Stored names never contain
    /// separators, so anything that still does is rejected rather than
    /// normalized.
    pub fn entry_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
        {
            return Err(StorageError::InvalidName);
        }
        Ok(self.root.join(name))
    }

    /// Claims a unique path for an uploaded file. Collision checking and
    /// creation are a single `create_new` call, so two concurrent uploads of
    /// the same name can never claim the same path.
    pub async fn claim_upload_file(&self, candidate: &str) -> Result<ClaimedFile, StorageError> {
        let base = sanitize_file_name(candidate)?;
        let stem = Path::new(&base)
            .file_stem()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| base.clone());
        let extension = Path::new(&base)
            .extension()
            .map(|value| value.to_string_lossy().into_owned());

        let mut counter: u32 = 0;
        loop {
            let attempt = if counter == 0 {
                base.clone()
            } else {
                match &extension {
                    Some(ext) => format!("{stem}_{counter}.{ext}"),
                    None => format!("{stem}_{counter}"),
                }
            };
            let path = self.root.join(&attempt);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    return Ok(ClaimedFile {
                        name: attempt,
                        path,
                        file,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => counter += 1,
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
    }

    /// Enumerates regular files in the storage directory. Entries deleted
    /// between enumeration and stat are skipped.
    pub async fn list_entries(&self) -> Result<Vec<FileEntry>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            // DirEntry metadata does not follow symlinks, so links to
            // files elsewhere never show up as regular files here.
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let timestamp = metadata
                .modified()
                .map(|modified| DateTime::<Utc>::from(modified).timestamp_millis())
                .unwrap_or(0);

            entries.push(FileEntry {
                id: name.clone(),
                name,
                path: entry.path().to_string_lossy().to_string(),
                size: metadata.len(),
                timestamp,
                exists: true,
            });
        }

        Ok(entries)
    }
}

/// Reduces a client-supplied filename to its final path segment and rejects
/// names that cannot live directly under the storage root.
pub fn sanitize_file_name(candidate: &str) -> Result<String, StorageError> {
    let normalized = candidate.trim().replace('\\', "/");
    let name = normalized
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("");
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(StorageError::InvalidName);
    }
    Ok(name.to_string())
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Serialize, Debug)]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub timestamp: i64,
    pub exists: bool,
}
