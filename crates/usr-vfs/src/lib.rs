// Read-only view over a dataset root, which is either a directory on disk or a
// zip archive of one. Paths are matched case-insensitively, so a dataset zipped
// on one platform resolves the same as the unpacked directory.
use std::{
    collections::HashMap,
    io::{self, Cursor, Error, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use path_clean::PathClean;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use zip::ZipArchive;

// New type to keep track that this string-y path might not correspond to
// a physical file path.
#[derive(Debug, Eq, PartialEq, Hash)]
struct PathKey(String);

impl PathKey {
    fn from_path(path: &Path) -> Self {
        Self(
            path.clean()
                .to_string_lossy()
                .replace('\\', "/")
                .to_lowercase(),
        )
    }
}

#[derive(Clone)]
struct ZipData {
    data: Arc<Vec<u8>>,
}

impl AsRef<[u8]> for ZipData {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

enum VfsContainer {
    Zip {
        archive: ZipArchive<Cursor<ZipData>>,
    },
    Directory {
        base_path: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("I/O error while opening {path}.")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read zip archive.")]
    Zip(#[from] zip::result::ZipError),

    #[error("Duplicate path {0}. Paths must be unique (case insensitive).")]
    DuplicatePath(PathBuf),

    #[error("{0} is neither a directory nor a zip archive.")]
    UnknownDataType(PathBuf),
}

pub struct Vfs {
    lookup: HashMap<PathKey, PathBuf>,
    container: VfsContainer,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.container {
            VfsContainer::Zip { .. } => "zip",
            VfsContainer::Directory { .. } => "directory",
        };
        f.debug_struct("Vfs")
            .field("kind", &kind)
            .field("files", &self.lookup.len())
            .finish()
    }
}

fn lookup_from_paths(paths: &[PathBuf]) -> Result<HashMap<PathKey, PathBuf>, VfsError> {
    let mut result = HashMap::new();
    for path in paths {
        let path = path.clean();

        // Zip files report directories as paths without extension, and no dataset
        // file is extensionless, so skip those. Also skip macOS archive metadata.
        if path.extension().is_some() && !path.components().any(|c| c.as_os_str() == "__MACOSX") {
            let key = PathKey::from_path(&path);
            if result.insert(key, path.clone()).is_some() {
                return Err(VfsError::DuplicatePath(path));
            }
        }
    }
    Ok(result)
}

async fn walk_dir(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(path) = stack.pop() {
        let mut read_dir = tokio::fs::read_dir(&path).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                stack.push(path);
            } else {
                let path = path
                    .strip_prefix(dir)
                    .map_err(|_e| io::ErrorKind::InvalidInput)?
                    .to_path_buf();
                paths.push(path);
            }
        }
    }
    Ok(paths)
}

impl Vfs {
    /// Mount a directory or a zip archive.
    pub async fn from_path(root: &Path) -> Result<Self, VfsError> {
        let io_err = |source| VfsError::Io {
            path: root.to_path_buf(),
            source,
        };

        let meta = tokio::fs::metadata(root).await.map_err(io_err)?;

        if meta.is_dir() {
            let files = walk_dir(root).await.map_err(io_err)?;
            log::debug!("Mounted directory {} with {} files", root.display(), files.len());
            return Ok(Self {
                lookup: lookup_from_paths(&files)?,
                container: VfsContainer::Directory {
                    base_path: root.to_path_buf(),
                },
            });
        }

        let mut bytes = vec![];
        tokio::fs::File::open(root)
            .await
            .map_err(io_err)?
            .read_to_end(&mut bytes)
            .await
            .map_err(io_err)?;

        if !bytes.starts_with(b"PK") {
            return Err(VfsError::UnknownDataType(root.to_path_buf()));
        }

        let archive = ZipArchive::new(Cursor::new(ZipData {
            data: Arc::new(bytes),
        }))?;
        let file_names: Vec<_> = archive.file_names().map(PathBuf::from).collect();
        log::debug!(
            "Mounted archive {} with {} entries",
            root.display(),
            file_names.len()
        );
        Ok(Self {
            lookup: lookup_from_paths(&file_names)?,
            container: VfsContainer::Zip { archive },
        })
    }

    pub fn file_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn file_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.lookup.values().cloned()
    }

    /// Files whose extension is one of `extensions`, compared case-insensitively.
    pub fn files_with_extensions<'a>(
        &'a self,
        extensions: &'a [&'a str],
    ) -> impl Iterator<Item = PathBuf> + 'a {
        self.lookup.values().filter_map(move |path| {
            let ext = path.extension().and_then(|ext| ext.to_str())?;
            extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext))
                .then(|| path.clone())
        })
    }

    pub fn files_with_stem<'a>(&'a self, filestem: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
        let filestem = filestem.to_lowercase();
        self.lookup.values().filter_map(move |path| {
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())?
                .to_lowercase();
            (stem == filestem).then(|| path.clone())
        })
    }

    /// Read a whole file. `path` is relative to the mounted root.
    pub async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let key = PathKey::from_path(path);
        let path = self.lookup.get(&key).ok_or_else(|| {
            Error::new(
                io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            )
        })?;

        match &self.container {
            VfsContainer::Zip { archive } => {
                let name = path.to_string_lossy().replace('\\', "/");
                let mut buffer = vec![];
                // Archive is cheap to clone, as the data is an Arc<[u8]>.
                archive
                    .clone()
                    .by_name(&name)
                    .map_err(io::Error::other)?
                    .read_to_end(&mut buffer)?;
                Ok(buffer)
            }
            VfsContainer::Directory { base_path } => tokio::fs::read(base_path.join(path)).await,
        }
    }
}
