use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use super::SecretStore;
use super::INITIALIZED_FILE_NAME;
use super::SECRETS_FILE_NAME;
use crate::error::Result;

/// Stores the wrapped secret as files in one directory.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn secrets_file_path(&self) -> PathBuf {
        self.dir.join(SECRETS_FILE_NAME)
    }

    pub fn initialized_file_path(&self) -> PathBuf {
        self.dir.join(INITIALIZED_FILE_NAME)
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(self.secrets_file_path()) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, blob: &[u8]) -> Result<()> {
        let path = self.secrets_file_path();
        write_atomically(&path, blob)?;
        debug!("wrote {} byte secret to {}", blob.len(), path.display());
        Ok(())
    }

    fn is_initialized(&self) -> Result<bool> {
        Ok(self.initialized_file_path().try_exists()?)
    }

    fn set_initialized(&self, initialized: bool) -> Result<()> {
        let path = self.initialized_file_path();
        if initialized {
            write_atomically(&path, b"1")?;
        } else {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Write to a sibling temp file, fsync, then rename over `path`.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
