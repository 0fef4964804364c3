use std::fs::{self, File};
use std::io;

use camino::Utf8Path;
use tracing::{info, warn};

use crate::dcc::DccClient;
use crate::error::KiraError;

/// Makes a remote file present on local disk.
pub trait Materializer: Send + Sync {
    /// Returns whether `path` now exists with the expected size. Idempotent:
    /// a valid local copy is never fetched again unless forced.
    fn ensure_materialized(
        &self,
        path: &Utf8Path,
        url: &str,
        expected_size: Option<u64>,
        md5sum: Option<&str>,
    ) -> Result<bool, KiraError>;
}

/// Never touches the network; reports what is already on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

impl Materializer for LocalOnly {
    fn ensure_materialized(
        &self,
        path: &Utf8Path,
        _url: &str,
        expected_size: Option<u64>,
        _md5sum: Option<&str>,
    ) -> Result<bool, KiraError> {
        Ok(size_matches(path, expected_size))
    }
}

pub struct DccMaterializer<'a, D: DccClient> {
    client: &'a D,
    verify_md5: bool,
    force: bool,
}

impl<'a, D: DccClient> DccMaterializer<'a, D> {
    pub fn new(client: &'a D, verify_md5: bool, force: bool) -> Self {
        Self {
            client,
            verify_md5,
            force,
        }
    }
}

impl<D: DccClient> Materializer for DccMaterializer<'_, D> {
    fn ensure_materialized(
        &self,
        path: &Utf8Path,
        url: &str,
        expected_size: Option<u64>,
        md5sum: Option<&str>,
    ) -> Result<bool, KiraError> {
        if path.as_std_path().exists() {
            if !self.force && size_matches(path, expected_size) {
                return Ok(true);
            }
            fs::remove_file(path.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }

        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".kira-dcc-download")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        info!(%url, %path, "downloading");
        match self.client.download(url, temp.path()) {
            Ok(()) => {}
            Err(KiraError::DccStatus { status, .. }) => {
                warn!(%url, status, "could not download");
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        let actual_size = fs::metadata(temp.path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?
            .len();
        if let Some(expected) = expected_size {
            if actual_size != expected {
                warn!(%url, expected, actual_size, "size mismatch after download");
                return Ok(false);
            }
        }

        if self.verify_md5 {
            if let Some(expected) = md5sum {
                let actual = md5_hex(temp.path())?;
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(KiraError::ChecksumMismatch {
                        path: path.to_string(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
        }

        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(true)
    }
}

fn size_matches(path: &Utf8Path, expected_size: Option<u64>) -> bool {
    match fs::metadata(path.as_std_path()) {
        Ok(meta) => expected_size.map(|size| meta.len() == size).unwrap_or(true),
        Err(_) => false,
    }
}

pub fn md5_hex(path: &std::path::Path) -> Result<String, KiraError> {
    let mut file = File::open(path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut context = md5::Context::new();
    io::copy(&mut file, &mut context).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(format!("{:x}", context.compute()))
}
