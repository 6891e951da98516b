use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{CasError, CasStore, ContentDigest, Result};

/// Filesystem-backed store with git-style 2-char sharding.
///
/// Layout:
/// - `<root>/objects/<2 hex>/<62 hex>`: blobs and commit records
/// - `<root>/heads/<sha256 of path>`: latest commit id per destination path
pub struct FsCasStore {
    objects_dir: PathBuf,
    heads_dir: PathBuf,
}

impl FsCasStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let objects_dir = root.as_ref().join("objects");
        let heads_dir = root.as_ref().join("heads");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&heads_dir)?;
        Ok(Self {
            objects_dir,
            heads_dir,
        })
    }

    fn object_path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    fn head_path(&self, path: &str) -> PathBuf {
        self.heads_dir
            .join(ContentDigest::compute(path.as_bytes()).to_hex())
    }
}

fn write_atomic(dir: &Path, dest: &Path, data: &[u8]) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_data()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

impl CasStore for FsCasStore {
    fn put(&self, data: &[u8]) -> Result<ContentDigest> {
        let digest = ContentDigest::compute(data);
        let path = self.object_path(&digest);
        if path.exists() {
            return Ok(digest);
        }
        let shard_dir = path.parent().unwrap_or(&self.objects_dir);
        write_atomic(shard_dir, &path, data)?;
        Ok(digest)
    }

    fn get(&self, digest: &ContentDigest) -> Result<Vec<u8>> {
        fs::read(self.object_path(digest)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CasError::NotFound(*digest)
            } else {
                CasError::Io(e)
            }
        })
    }

    fn exists(&self, digest: &ContentDigest) -> Result<bool> {
        Ok(self.object_path(digest).exists())
    }

    fn head(&self, path: &str) -> Result<Option<ContentDigest>> {
        match fs::read_to_string(self.head_path(path)) {
            Ok(text) => Ok(Some(text.trim().parse()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_head(&self, path: &str, commit: &ContentDigest) -> Result<()> {
        write_atomic(
            &self.heads_dir,
            &self.head_path(path),
            commit.to_hex().as_bytes(),
        )
    }
}
