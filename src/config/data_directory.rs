use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use directories::ProjectDirs;

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SECRETS_DIRECTORY_NAME: &str = "secrets";

#[derive(Debug, Clone)]
pub struct DataDirectory {
    data_dir: PathBuf,
}

impl DataDirectory {
    ///////////////////////////////////////////////////////////////////////////
    ///
    /// The data directory that holds settings and the wrapped secret
    ///
    /// The default varies by operating system, e.g.
    ///
    /// - Linux:   /home/alice/.local/share/cacheword
    /// - Windows: C:\Users\Alice\AppData\Roaming\cacheword\cacheword\data
    /// - macOS:   /Users/Alice/Library/Application Support/org.cacheword.cacheword
    pub fn get(root_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match root_dir {
            Some(dir) => dir,
            None => ProjectDirs::from("org", "cacheword", "cacheword")
                .context("Could not determine data directory")?
                .data_dir()
                .to_path_buf(),
        };

        Ok(DataDirectory { data_dir })
    }

    /// Create directory if it does not exist
    pub fn create_dir_if_not_exists(dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.to_string_lossy()))
    }

    /// The root data directory path
    pub fn root_dir_path(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// The settings file path
    pub fn settings_file_path(&self) -> PathBuf {
        self.data_dir.join(Path::new(SETTINGS_FILE_NAME))
    }

    /// The directory a `FileSecretStore` is rooted at
    pub fn secrets_dir_path(&self) -> PathBuf {
        self.data_dir.join(Path::new(SECRETS_DIRECTORY_NAME))
    }
}

impl std::fmt::Display for DataDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.data_dir.display())
    }
}
