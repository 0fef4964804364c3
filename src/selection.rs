//! Picks the canonical signal track, alignment and peak set of an experiment.
//!
//! Each role is an ordered chain of filters evaluated against the files on the
//! requested assembly; the first filter with at least one match wins and later
//! filters are never consulted. When the winning set holds several replicate
//! files, the selection resolves to a [`MergePlan`] for a derived artifact.

use std::cell::RefCell;
use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, warn};

use crate::download::Materializer;
use crate::error::KiraError;
use crate::experiment::ExperimentRecord;
use crate::file_record::FileRecord;
use crate::merge::{MergePlan, MergePlanner};
use crate::store::Store;

/// Largest replicate set that may be averaged into one signal track.
pub const MAX_MEAN_SIGNAL_INPUTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityReason {
    /// Replicate restriction left nothing to work with.
    UnsureOfSignalFilter,
    /// More same-priority signal tracks than can be averaged.
    TooManySignalTracks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SelectionResult {
    None,
    Single {
        path: Utf8PathBuf,
    },
    Merge {
        plan: MergePlan,
    },
    Ambiguous {
        reason: AmbiguityReason,
        candidates: Vec<String>,
    },
}

impl SelectionResult {
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            SelectionResult::Single { path } => Some(path),
            SelectionResult::Merge { plan } => Some(&plan.output_path),
            SelectionResult::None | SelectionResult::Ambiguous { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alignment {
    pub file_id: String,
    pub path: Utf8PathBuf,
    pub assembly: Option<String>,
    /// Number of BAM files the experiment carried; more than one is an anomaly.
    pub candidates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateFilter {
    Pooled,
    BioRepContains(&'static str),
    BioRepIs(&'static str),
    Any,
}

impl ReplicateFilter {
    pub fn is_single_replicate(self) -> bool {
        matches!(
            self,
            ReplicateFilter::BioRepContains(_) | ReplicateFilter::BioRepIs(_)
        )
    }

    fn matches(self, file: &FileRecord) -> bool {
        match self {
            ReplicateFilter::Pooled => file.is_pooled,
            ReplicateFilter::BioRepContains(label) => file.bio_rep_contains(label),
            ReplicateFilter::BioRepIs(label) => file.bio_rep_is(label),
            ReplicateFilter::Any => true,
        }
    }
}

/// Output-type tiers of signal tracks, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTier {
    FoldChange,
    UniqueReads,
    RawSignal,
    Signal,
}

impl SignalTier {
    pub fn matches(self, file: &FileRecord) -> bool {
        match self {
            SignalTier::FoldChange => file.is_fold_change(),
            SignalTier::UniqueReads => file.is_signal_of_unique_reads(),
            SignalTier::RawSignal => file.is_raw_signal(),
            SignalTier::Signal => file.is_signal(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalFilter {
    pub tier: SignalTier,
    pub replicate: ReplicateFilter,
}

impl SignalFilter {
    pub fn matches(&self, file: &FileRecord) -> bool {
        file.is_big_wig() && self.tier.matches(file) && self.replicate.matches(file)
    }
}

const fn signal(tier: SignalTier, replicate: ReplicateFilter) -> SignalFilter {
    SignalFilter { tier, replicate }
}

/// Signal-track priority: output type first, then pooled over single
/// replicates.
pub const SIGNAL_FILTERS: [SignalFilter; 16] = [
    signal(SignalTier::FoldChange, ReplicateFilter::Pooled),
    signal(SignalTier::FoldChange, ReplicateFilter::BioRepContains("1")),
    signal(SignalTier::FoldChange, ReplicateFilter::BioRepContains("2")),
    signal(SignalTier::FoldChange, ReplicateFilter::Any),
    signal(SignalTier::UniqueReads, ReplicateFilter::Pooled),
    signal(SignalTier::UniqueReads, ReplicateFilter::BioRepContains("1")),
    signal(SignalTier::UniqueReads, ReplicateFilter::BioRepContains("2")),
    signal(SignalTier::UniqueReads, ReplicateFilter::Any),
    signal(SignalTier::RawSignal, ReplicateFilter::Pooled),
    signal(SignalTier::RawSignal, ReplicateFilter::BioRepIs("1")),
    signal(SignalTier::RawSignal, ReplicateFilter::BioRepIs("2")),
    signal(SignalTier::RawSignal, ReplicateFilter::Any),
    signal(SignalTier::Signal, ReplicateFilter::Pooled),
    signal(SignalTier::Signal, ReplicateFilter::BioRepIs("1")),
    signal(SignalTier::Signal, ReplicateFilter::BioRepIs("2")),
    signal(SignalTier::Signal, ReplicateFilter::Any),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakFilter {
    NarrowPeakIdrOptimal,
    NarrowPeakIdr,
    NarrowPeakReplicated,
    NarrowPeakReplicates1And2,
    NarrowPeak,
    BroadPeak,
    Peaks,
}

impl PeakFilter {
    pub fn matches(self, file: &FileRecord) -> bool {
        match self {
            PeakFilter::NarrowPeakIdrOptimal => file.is_bed_narrow_peak() && file.is_idr_optimal(),
            PeakFilter::NarrowPeakIdr => file.is_bed_narrow_peak() && file.is_idr(),
            PeakFilter::NarrowPeakReplicated => {
                file.is_bed_narrow_peak() && file.is_replicated_peaks()
            }
            PeakFilter::NarrowPeakReplicates1And2 => {
                file.is_bed_narrow_peak()
                    && file.has_biological_replicate(1)
                    && file.has_biological_replicate(2)
            }
            PeakFilter::NarrowPeak => file.is_bed_narrow_peak(),
            PeakFilter::BroadPeak => file.is_bed_broad_peak(),
            PeakFilter::Peaks => file.is_peaks(),
        }
    }
}

/// Peak priority. The IDR entry tests the same output type as the entry
/// before it and can never win on its own.
pub const PEAK_FILTERS: [PeakFilter; 7] = [
    PeakFilter::NarrowPeakIdrOptimal,
    PeakFilter::NarrowPeakIdr,
    PeakFilter::NarrowPeakReplicated,
    PeakFilter::NarrowPeakReplicates1And2,
    PeakFilter::NarrowPeak,
    PeakFilter::BroadPeak,
    PeakFilter::Peaks,
];

/// First filter with a non-empty, assembly-restricted match wins.
fn first_match<'f, P: Copy>(
    files: &'f [FileRecord],
    assembly: &str,
    filters: impl IntoIterator<Item = P>,
    matches: impl Fn(P, &FileRecord) -> bool,
) -> Option<(P, Vec<&'f FileRecord>)> {
    filters.into_iter().find_map(|filter| {
        let hits = files
            .iter()
            .filter(|file| matches(filter, file) && file.is_on_assembly(assembly))
            .collect::<Vec<_>>();
        (!hits.is_empty()).then_some((filter, hits))
    })
}

/// A single-replicate step only picks the output-type tier: the numbered
/// replicates of that tier win together so they can be averaged.
pub fn signal_candidates<'f>(files: &'f [FileRecord], assembly: &str) -> Vec<&'f FileRecord> {
    let Some((filter, hits)) =
        first_match(files, assembly, SIGNAL_FILTERS, |filter, file| filter.matches(file))
    else {
        return Vec::new();
    };
    if !filter.replicate.is_single_replicate() {
        return hits;
    }
    files
        .iter()
        .filter(|file| {
            file.is_big_wig()
                && filter.tier.matches(file)
                && file.is_on_assembly(assembly)
                && (filter.matches(file) || file.has_numbered_bio_rep())
        })
        .collect()
}

pub fn peak_candidates<'f>(files: &'f [FileRecord], assembly: &str) -> Vec<&'f FileRecord> {
    first_match(files, assembly, PEAK_FILTERS, |filter, file| filter.matches(file))
        .map(|(_, hits)| hits)
        .unwrap_or_default()
}

pub fn alignment_candidates(files: &[FileRecord]) -> Vec<&FileRecord> {
    files.iter().filter(|file| file.is_bam()).collect()
}

/// Numbered single replicates when there are any, otherwise the whole set.
fn restrict_to_numbered(candidates: Vec<&FileRecord>) -> Vec<&FileRecord> {
    let numbered = candidates
        .iter()
        .copied()
        .filter(|file| file.has_numbered_bio_rep())
        .collect::<Vec<_>>();
    if numbered.is_empty() {
        candidates
    } else {
        numbered
    }
}

fn file_ids(files: &[&FileRecord]) -> Vec<String> {
    files.iter().map(|file| file.file_id.clone()).collect()
}

pub struct Selector<'a> {
    store: &'a Store,
    materializer: &'a dyn Materializer,
    materialize: bool,
    materialized: RefCell<HashSet<Utf8PathBuf>>,
}

impl<'a> Selector<'a> {
    /// With `materialize` off, the selector only reports paths and never asks
    /// the materializer for anything.
    pub fn new(store: &'a Store, materializer: &'a dyn Materializer, materialize: bool) -> Self {
        Self {
            store,
            materializer,
            materialize,
            materialized: RefCell::new(HashSet::new()),
        }
    }

    /// Whether this selector already made `path` present on disk.
    pub fn has_materialized(&self, path: &Utf8Path) -> bool {
        self.materialized.borrow().contains(path)
    }

    fn ensure(&self, experiment: &ExperimentRecord, file: &FileRecord) -> Result<Utf8PathBuf, KiraError> {
        let path = self.store.file_path(file);
        if !self.materialize {
            return Ok(path);
        }
        let Some(href) = file.href.as_deref() else {
            warn!(experiment = %experiment.accession, file = %file.file_id, "file has no download href");
            return Ok(path);
        };
        let present = self.materializer.ensure_materialized(
            &path,
            href,
            file.size_bytes,
            file.checksum.as_deref(),
        )?;
        if present {
            self.materialized.borrow_mut().insert(path.clone());
        } else {
            warn!(experiment = %experiment.accession, file = %file.file_id, "file could not be materialized");
        }
        Ok(path)
    }

    pub fn select_signal_track(
        &self,
        experiment: &ExperimentRecord,
        assembly: &str,
    ) -> Result<SelectionResult, KiraError> {
        let candidates = signal_candidates(&experiment.files, assembly);
        debug!(experiment = %experiment.accession, count = candidates.len(), "signal candidates");

        match candidates.as_slice() {
            [] => return Ok(SelectionResult::None),
            [only] => {
                let path = self.ensure(experiment, only)?;
                return Ok(SelectionResult::Single { path });
            }
            _ => {}
        }

        let candidates = restrict_to_numbered(candidates);
        if candidates.is_empty() {
            return Ok(SelectionResult::Ambiguous {
                reason: AmbiguityReason::UnsureOfSignalFilter,
                candidates: Vec::new(),
            });
        }
        if candidates.len() > MAX_MEAN_SIGNAL_INPUTS {
            let ids = file_ids(&candidates);
            warn!(
                experiment = %experiment.accession,
                files = %ids.join(", "),
                "too many signal tracks"
            );
            return Ok(SelectionResult::Ambiguous {
                reason: AmbiguityReason::TooManySignalTracks,
                candidates: ids,
            });
        }

        let paths = candidates
            .iter()
            .map(|file| self.store.file_path(file))
            .collect::<Vec<_>>();
        let plan = MergePlanner::new(self.store).plan_mean_signal(
            &paths,
            &experiment.accession,
            assembly,
        );
        Ok(SelectionResult::Merge { plan })
    }

    /// BAM files are never merged. With several candidates the first one in
    /// metadata order is returned and the anomaly is logged.
    pub fn select_alignment(
        &self,
        experiment: &ExperimentRecord,
    ) -> Result<Option<Alignment>, KiraError> {
        let bams = alignment_candidates(&experiment.files);
        let Some(first) = bams.first() else {
            return Ok(None);
        };
        if bams.len() > 1 {
            warn!(
                experiment = %experiment.accession,
                count = bams.len(),
                files = %file_ids(&bams).join(", "),
                "too many bams; returning the first one"
            );
        }
        let path = self.ensure(experiment, first)?;
        Ok(Some(Alignment {
            file_id: first.file_id.clone(),
            path,
            assembly: first.assembly.clone(),
            candidates: bams.len(),
        }))
    }

    /// Peak files are small, so every candidate of the winning filter is
    /// materialized before the tie-break runs.
    pub fn select_peaks(
        &self,
        experiment: &ExperimentRecord,
        assembly: &str,
    ) -> Result<SelectionResult, KiraError> {
        let candidates = peak_candidates(&experiment.files, assembly);
        debug!(experiment = %experiment.accession, count = candidates.len(), "peak candidates");

        for file in &candidates {
            self.ensure(experiment, file)?;
        }

        match candidates.as_slice() {
            [] => return Ok(SelectionResult::None),
            [only] => {
                return Ok(SelectionResult::Single {
                    path: self.store.file_path(only),
                });
            }
            _ => {}
        }

        let candidates = restrict_to_numbered(candidates);
        let mut paths = candidates
            .iter()
            .map(|file| self.store.file_path(file))
            .collect::<Vec<_>>();
        paths.sort();
        paths.dedup();

        match paths.len() {
            0 => Ok(SelectionResult::None),
            1 => Ok(SelectionResult::Single {
                path: paths.remove(0),
            }),
            _ => {
                let plan = MergePlanner::new(self.store).plan_intersect_peaks(
                    &paths,
                    &experiment.accession,
                    assembly,
                );
                Ok(SelectionResult::Merge { plan })
            }
        }
    }
}
