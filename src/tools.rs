use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::KiraError;
use crate::merge::{MergeKind, MergePlan};

/// Runs the external programs that turn a [`MergePlan`] into its artifact.
pub trait MergeExecutor: Send + Sync {
    fn compute_mean_signal(&self, plan: &MergePlan) -> Result<(), KiraError>;
    fn compute_intersect_peaks(&self, plan: &MergePlan) -> Result<(), KiraError>;

    fn execute(&self, plan: &MergePlan) -> Result<(), KiraError> {
        match plan.kind {
            MergeKind::MeanSignal => self.compute_mean_signal(plan),
            MergeKind::IntersectPeaks => self.compute_intersect_peaks(plan),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolPaths {
    pub wiggletools: Option<PathBuf>,
    pub wig_to_big_wig: Option<PathBuf>,
    pub bedtools: Option<PathBuf>,
    pub sort: Option<PathBuf>,
}

impl ToolPaths {
    /// Explicit paths win; anything left unset is looked up on `PATH`.
    pub fn resolve(
        wiggletools: Option<PathBuf>,
        wig_to_big_wig: Option<PathBuf>,
        bedtools: Option<PathBuf>,
    ) -> Self {
        Self {
            wiggletools: wiggletools.or_else(|| find_in_path("wiggletools")),
            wig_to_big_wig: wig_to_big_wig.or_else(|| find_in_path("wigToBigWig")),
            bedtools: bedtools.or_else(|| find_in_path("bedtools")),
            sort: find_in_path("sort"),
        }
    }
}

fn require<'p>(tool: &'p Option<PathBuf>, name: &str) -> Result<&'p Path, KiraError> {
    tool.as_deref()
        .ok_or_else(|| KiraError::MissingTool(name.to_string()))
}

/// Serializes work on a derived artifact per output path within the process.
#[derive(Debug, Default)]
pub struct ArtifactLocks {
    held: Mutex<HashSet<Utf8PathBuf>>,
    released: Condvar,
}

pub struct ArtifactGuard<'a> {
    locks: &'a ArtifactLocks,
    path: Utf8PathBuf,
}

impl ArtifactLocks {
    pub fn acquire(&self, path: &Utf8Path) -> ArtifactGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(path) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(path.to_owned());
        ArtifactGuard {
            locks: self,
            path: path.to_owned(),
        }
    }
}

impl Drop for ArtifactGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.path);
        self.locks.released.notify_all();
    }
}

pub struct SystemMergeExecutor {
    tools: ToolPaths,
    chrom_sizes: HashMap<String, PathBuf>,
    genome_dir: Utf8PathBuf,
    locks: ArtifactLocks,
}

impl SystemMergeExecutor {
    pub fn new(
        tools: ToolPaths,
        chrom_sizes: HashMap<String, PathBuf>,
        genome_dir: Utf8PathBuf,
    ) -> Self {
        Self {
            tools,
            chrom_sizes,
            genome_dir,
            locks: ArtifactLocks::default(),
        }
    }

    /// Configured path first, then `<genome dir>/<assembly>.chrom.sizes`.
    pub fn chrom_sizes_for(&self, assembly: &str) -> Result<PathBuf, KiraError> {
        if let Some(path) = self.chrom_sizes.get(assembly) {
            return Ok(path.clone());
        }
        let fallback = self.genome_dir.join(format!("{assembly}.chrom.sizes"));
        if fallback.as_std_path().exists() {
            return Ok(fallback.into_std_path_buf());
        }
        Err(KiraError::MissingChromSizes(assembly.to_string()))
    }

    /// Holds the per-output lock, skips work when another worker already
    /// produced the artifact, and renames the temp file into place on success.
    fn produce<F>(&self, plan: &MergePlan, suffix: &str, build: F) -> Result<(), KiraError>
    where
        F: FnOnce(&mut NamedTempFile) -> Result<(), KiraError>,
    {
        let _guard = self.locks.acquire(&plan.output_path);
        if plan.output_path.as_std_path().exists() {
            debug!(path = %plan.output_path, "artifact already computed");
            return Ok(());
        }
        let dir = plan
            .output_path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid artifact path".to_string()))?;
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".kira-dcc-merge")
            .suffix(suffix)
            .tempfile_in(dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        info!(kind = %plan.kind, experiment = %plan.experiment, inputs = plan.inputs.len(), "computing");
        build(&mut temp)?;

        temp.persist(plan.output_path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        info!(path = %plan.output_path, "wrote");
        Ok(())
    }
}

impl MergeExecutor for SystemMergeExecutor {
    fn compute_mean_signal(&self, plan: &MergePlan) -> Result<(), KiraError> {
        let wiggletools = require(&self.tools.wiggletools, "wiggletools")?;
        let wig_to_big_wig = require(&self.tools.wig_to_big_wig, "wigToBigWig")?;
        let chrom_sizes = self.chrom_sizes_for(&plan.assembly)?;

        self.produce(plan, ".bigWig", |temp| {
            let mut mean = Running::spawn(
                Command::new(wiggletools)
                    .arg("mean")
                    .args(plan.inputs.iter().map(|path| path.as_str()))
                    .stdout(Stdio::piped()),
                wiggletools,
            )?;
            let Some(wig) = mean.child.stdout.take() else {
                mean.abandon();
                return Err(KiraError::ToolFailed("wiggletools stdout unavailable".to_string()));
            };

            let convert = Running::spawn(
                Command::new(wig_to_big_wig)
                    .arg("-clip")
                    .arg("stdin")
                    .arg(&chrom_sizes)
                    .arg(temp.path())
                    .stdin(Stdio::from(wig)),
                wig_to_big_wig,
            );
            let convert = match convert {
                Ok(convert) => convert,
                Err(err) => {
                    mean.abandon();
                    return Err(err);
                }
            };

            let converted = convert.finish();
            let averaged = mean.finish();
            averaged?;
            converted
        })
    }

    fn compute_intersect_peaks(&self, plan: &MergePlan) -> Result<(), KiraError> {
        let bedtools = require(&self.tools.bedtools, "bedtools")?;
        let sort = require(&self.tools.sort, "sort")?;
        let Some((first, rest)) = plan.inputs.split_first() else {
            return Err(KiraError::ToolFailed("intersect needs at least one input".to_string()));
        };

        self.produce(plan, ".bed.gz", |temp| {
            let mut sorter = Running::spawn(
                Command::new(sort)
                    .args(["-k1,1", "-k2,2n"])
                    .env("LC_ALL", "C")
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped()),
                sort,
            )?;
            let (Some(mut sorter_in), Some(sorted)) =
                (sorter.child.stdin.take(), sorter.child.stdout.take())
            else {
                sorter.abandon();
                return Err(KiraError::ToolFailed("sort pipes unavailable".to_string()));
            };

            let source = first.clone();
            let feeder = thread::spawn(move || -> io::Result<u64> {
                let file = File::open(source.as_std_path())?;
                let mut reader: Box<dyn Read> = if source.as_str().ends_with(".gz") {
                    Box::new(GzDecoder::new(file))
                } else {
                    Box::new(file)
                };
                io::copy(&mut reader, &mut sorter_in)
            });

            let intersect = Running::spawn(
                Command::new(bedtools)
                    .args(["intersect", "-a", "stdin", "-b"])
                    .args(rest.iter().map(|path| path.as_str()))
                    .arg("-u")
                    .stdin(Stdio::from(sorted))
                    .stdout(Stdio::piped()),
                bedtools,
            );
            let mut intersect = match intersect {
                Ok(intersect) => intersect,
                Err(err) => {
                    sorter.abandon();
                    let _ = feeder.join();
                    return Err(err);
                }
            };

            let written = match intersect.child.stdout.take() {
                Some(mut hits) => {
                    let mut encoder = GzEncoder::new(temp.as_file_mut(), Compression::default());
                    io::copy(&mut hits, &mut encoder)
                        .and_then(|_| encoder.finish().map(|_| ()))
                        .map_err(|err| KiraError::Filesystem(err.to_string()))
                }
                None => Err(KiraError::ToolFailed("bedtools stdout unavailable".to_string())),
            };
            if written.is_err() {
                intersect.abandon();
                sorter.abandon();
                let _ = feeder.join();
                return written;
            }

            let fed = feeder
                .join()
                .map_err(|_| KiraError::ToolFailed("peak reader panicked".to_string()))?;
            let intersected = intersect.finish();
            sorter.finish()?;
            fed.map_err(|err| KiraError::Filesystem(format!("read {first}: {err}")))?;
            intersected
        })
    }
}

/// A spawned tool whose stderr is collected on a separate thread so a chatty
/// tool never stalls on a full pipe.
struct Running {
    child: Child,
    program: PathBuf,
    stderr: Option<JoinHandle<String>>,
}

impl Running {
    fn spawn(command: &mut Command, program: &Path) -> Result<Self, KiraError> {
        let mut child = command
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, err))?;
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });
        Ok(Self {
            child,
            program: program.to_path_buf(),
            stderr,
        })
    }

    fn finish(mut self) -> Result<(), KiraError> {
        let status = self
            .child
            .wait()
            .map_err(|err| spawn_error(&self.program, err))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if status.success() {
            return Ok(());
        }
        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            format!("command failed: {} ({status})", self.program.display())
        } else {
            format!("{}: {stderr}", self.program.display())
        };
        Err(KiraError::ToolFailed(message))
    }

    /// Kills and reaps a stage whose downstream could not be set up.
    fn abandon(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.stderr.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_error(program: &Path, err: io::Error) -> KiraError {
    KiraError::ToolFailed(format!("{}: {err}", program.display()))
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
