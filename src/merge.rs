use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    MeanSignal,
    IntersectPeaks,
}

impl MergeKind {
    fn prefix(self) -> &'static str {
        match self {
            MergeKind::MeanSignal => "mean",
            MergeKind::IntersectPeaks => "intersectFirst",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            MergeKind::MeanSignal => "bigWig",
            MergeKind::IntersectPeaks => "bed.gz",
        }
    }
}

impl fmt::Display for MergeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeKind::MeanSignal => write!(f, "mean-signal"),
            MergeKind::IntersectPeaks => write!(f, "intersect-peaks"),
        }
    }
}

/// Request to combine replicate files into one derived artifact. Running it
/// is left to a [`crate::tools::MergeExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergePlan {
    pub kind: MergeKind,
    pub experiment: String,
    pub assembly: String,
    pub inputs: Vec<Utf8PathBuf>,
    pub output_path: Utf8PathBuf,
    pub already_computed: bool,
}

pub struct MergePlanner<'a> {
    store: &'a Store,
}

impl<'a> MergePlanner<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn plan_mean_signal(
        &self,
        paths: &[Utf8PathBuf],
        experiment: &str,
        assembly: &str,
    ) -> MergePlan {
        self.plan(MergeKind::MeanSignal, paths, experiment, assembly)
    }

    pub fn plan_intersect_peaks(
        &self,
        paths: &[Utf8PathBuf],
        experiment: &str,
        assembly: &str,
    ) -> MergePlan {
        self.plan(MergeKind::IntersectPeaks, paths, experiment, assembly)
    }

    fn plan(
        &self,
        kind: MergeKind,
        paths: &[Utf8PathBuf],
        experiment: &str,
        assembly: &str,
    ) -> MergePlan {
        let mut inputs = paths.to_vec();
        inputs.sort();
        let output_path = self
            .store
            .derived_dir(experiment, assembly)
            .join(merged_file_name(kind, &inputs));
        let already_computed = output_path.as_std_path().exists();
        MergePlan {
            kind,
            experiment: experiment.to_string(),
            assembly: assembly.to_string(),
            inputs,
            output_path,
            already_computed,
        }
    }
}

/// `<prefix>_<stem>_<stem>...<ext>` with the stems sorted, so the name only
/// depends on the set of inputs.
pub fn merged_file_name(kind: MergeKind, paths: &[Utf8PathBuf]) -> String {
    let mut stems = paths.iter().map(|path| file_stem(path)).collect::<Vec<_>>();
    stems.sort();
    let mut parts = vec![kind.prefix()];
    parts.extend(stems);
    format!("{}.{}", parts.join("_"), kind.extension())
}

/// File name up to its first dot: `ENCFF001AAA.bed.gz` -> `ENCFF001AAA`.
pub fn file_stem(path: &Utf8Path) -> &str {
    let name = path.file_name().unwrap_or(path.as_str());
    name.split('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_stops_at_first_dot() {
        assert_eq!(file_stem(Utf8Path::new("/a/ENCFF001AAA.bed.gz")), "ENCFF001AAA");
        assert_eq!(file_stem(Utf8Path::new("ENCFF002AAA.bigWig")), "ENCFF002AAA");
    }

    #[test]
    fn name_is_independent_of_input_order() {
        let a = Utf8PathBuf::from("/d/ENCFF00B.bigWig");
        let b = Utf8PathBuf::from("/d/ENCFF00A.bigWig");
        let forward = merged_file_name(MergeKind::MeanSignal, &[a.clone(), b.clone()]);
        let reverse = merged_file_name(MergeKind::MeanSignal, &[b, a]);
        assert_eq!(forward, "mean_ENCFF00A_ENCFF00B.bigWig");
        assert_eq!(forward, reverse);
    }
}
