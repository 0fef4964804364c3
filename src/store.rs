use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;

use crate::error::KiraError;
use crate::file_record::FileRecord;

/// On-disk layout of the local archive mirror.
///
/// ```text
/// <root>/encode/data/<experiment>/<file name>
/// <root>/encode/json/exps/<experiment>.json
/// <root>/encode/mean/<experiment>/<assembly>/<derived artifact>
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    /// Resolves the root from `METADATA_BASEDIR`, falling back to the user
    /// cache directory.
    pub fn new() -> Result<Self, KiraError> {
        if let Ok(dir) = std::env::var("METADATA_BASEDIR") {
            if !dir.trim().is_empty() {
                return Ok(Self::new_with_root(Utf8PathBuf::from(dir.trim())));
            }
        }

        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-dcc")).ok()
            })
            .ok_or_else(|| {
                KiraError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn encode_root(&self) -> Utf8PathBuf {
        self.root.join("encode")
    }

    pub fn data_dir(&self, experiment: &str) -> Utf8PathBuf {
        self.encode_root().join("data").join(experiment)
    }

    pub fn file_path(&self, file: &FileRecord) -> Utf8PathBuf {
        self.data_dir(&file.experiment).join(file.file_name())
    }

    pub fn experiment_json_path(&self, experiment: &str) -> Utf8PathBuf {
        self.encode_root()
            .join("json")
            .join("exps")
            .join(format!("{experiment}.json"))
    }

    pub fn biosample_json_path(&self, biosample: &str) -> Utf8PathBuf {
        self.encode_root()
            .join("json")
            .join("biosamples")
            .join(format!("{biosample}.json"))
    }

    pub fn derived_dir(&self, experiment: &str, assembly: &str) -> Utf8PathBuf {
        self.encode_root()
            .join("mean")
            .join(experiment)
            .join(assembly)
    }

    /// Fallback location for `<assembly>.chrom.sizes` files.
    pub fn genome_dir(&self) -> Utf8PathBuf {
        self.root.join("genome")
    }

    pub fn ensure_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".kira-dcc")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn read_json(path: &Utf8Path) -> Result<serde_json::Value, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| KiraError::MetadataParse(format!("{path}: {err}")))
    }

    /// True when the file is missing or was last modified more than `days`
    /// days ago.
    pub fn is_older_than_days(path: &Utf8Path, days: u32) -> bool {
        let Ok(modified) = fs::metadata(path.as_std_path()).and_then(|meta| meta.modified()) else {
            return true;
        };
        let modified: DateTime<Utc> = modified.into();
        (Utc::now() - modified).num_days() > i64::from(days)
    }
}
