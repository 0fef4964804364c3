use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;

use kira_dcc::download::{LocalOnly, Materializer};
use kira_dcc::error::KiraError;
use kira_dcc::experiment::ExperimentRecord;
use kira_dcc::file_record::FileRecord;
use kira_dcc::merge::MergeKind;
use kira_dcc::selection::{
    AmbiguityReason, PEAK_FILTERS, ReplicateFilter, SIGNAL_FILTERS, SelectionResult, Selector,
    SignalTier, peak_candidates, signal_candidates,
};
use kira_dcc::store::Store;

#[derive(Default)]
struct CountingMaterializer {
    calls: Mutex<Vec<Utf8PathBuf>>,
}

impl CountingMaterializer {
    fn calls(&self) -> Vec<Utf8PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl Materializer for CountingMaterializer {
    fn ensure_materialized(
        &self,
        path: &Utf8Path,
        _url: &str,
        _expected_size: Option<u64>,
        _md5sum: Option<&str>,
    ) -> Result<bool, KiraError> {
        self.calls.lock().unwrap().push(path.to_owned());
        Ok(true)
    }
}

fn file(
    id: &str,
    file_type: &str,
    output_type: &str,
    assembly: &str,
    reps: &[u32],
) -> FileRecord {
    let extension = match file_type {
        "bigWig" => "bigWig",
        "bam" => "bam",
        _ => "bed.gz",
    };
    FileRecord::from_json(
        "X1",
        &json!({
            "accession": id,
            "href": format!("/files/{id}/@@download/{id}.{extension}"),
            "file_type": file_type,
            "file_format": extension,
            "output_type": output_type,
            "assembly": assembly,
            "biological_replicates": reps,
            "file_size": 10,
        }),
    )
    .unwrap()
}

fn experiment(files: Vec<FileRecord>) -> ExperimentRecord {
    ExperimentRecord::new("X1", files)
}

fn store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Store::new_with_root(root))
}

#[test]
fn filter_tables_have_expected_shape() {
    assert_eq!(SIGNAL_FILTERS.len(), 16);
    assert_eq!(PEAK_FILTERS.len(), 7);

    let tiers = SIGNAL_FILTERS
        .chunks(4)
        .map(|steps| {
            assert!(steps.iter().all(|step| step.tier == steps[0].tier));
            assert_eq!(steps[0].replicate, ReplicateFilter::Pooled);
            assert_eq!(steps[3].replicate, ReplicateFilter::Any);
            steps[0].tier
        })
        .collect::<Vec<_>>();
    assert_eq!(
        tiers,
        vec![
            SignalTier::FoldChange,
            SignalTier::UniqueReads,
            SignalTier::RawSignal,
            SignalTier::Signal
        ]
    );
}

#[test]
fn single_signal_file_is_selected_among_noise() {
    let (_temp, store) = store();
    let signal = file("ENCFF001SIG", "bigWig", "signal", "hg19", &[1]);
    let exp = experiment(vec![
        file("ENCFF002BAM", "bam", "alignments", "hg19", &[1]),
        file("ENCFF003PEK", "bed narrowPeak", "peaks", "hg19", &[1]),
        signal.clone(),
    ]);
    let materializer = CountingMaterializer::default();
    let selector = Selector::new(&store, &materializer, true);

    let result = selector.select_signal_track(&exp, "hg19").unwrap();

    assert_eq!(
        result,
        SelectionResult::Single {
            path: store.file_path(&signal)
        }
    );
    assert_eq!(materializer.calls(), vec![store.file_path(&signal)]);
}

#[test]
fn two_fold_change_replicates_are_averaged() {
    let (_temp, store) = store();
    let rep2 = file("ENCFF00BFC", "bigWig", "fold change over control", "hg19", &[2]);
    let rep1 = file("ENCFF00AFC", "bigWig", "fold change over control", "hg19", &[1]);
    let exp = experiment(vec![rep2.clone(), rep1.clone()]);
    let materializer = CountingMaterializer::default();
    let selector = Selector::new(&store, &materializer, true);

    let result = selector.select_signal_track(&exp, "hg19").unwrap();

    let plan = assert_matches!(result, SelectionResult::Merge { plan } => plan);
    assert_eq!(plan.kind, MergeKind::MeanSignal);
    assert_eq!(plan.inputs, vec![store.file_path(&rep1), store.file_path(&rep2)]);
    assert_eq!(
        plan.output_path,
        store
            .derived_dir("X1", "hg19")
            .join("mean_ENCFF00AFC_ENCFF00BFC.bigWig")
    );
    assert!(!plan.already_computed);
    assert!(materializer.calls().is_empty());
}

#[test]
fn unique_reads_replicates_end_to_end() {
    let (_temp, store) = store();
    let file1 = file("ENCFF111AAA", "bigWig", "signal of unique reads", "hg19", &[1]);
    let file2 = file("ENCFF222AAA", "bigWig", "signal of unique reads", "hg19", &[2]);
    let exp = experiment(vec![file1.clone(), file2.clone()]);
    let selector = Selector::new(&store, &LocalOnly, false);

    let result = selector.select_signal_track(&exp, "hg19").unwrap();

    let plan = assert_matches!(result, SelectionResult::Merge { plan } => plan);
    assert_eq!(plan.inputs, vec![store.file_path(&file1), store.file_path(&file2)]);
    assert_eq!(
        plan.output_path.file_name(),
        Some("mean_ENCFF111AAA_ENCFF222AAA.bigWig")
    );
}

#[test]
fn pooled_track_beats_replicates() {
    let (_temp, store) = store();
    let pooled = file("ENCFF000POL", "bigWig", "fold change over control", "hg19", &[1, 2]);
    let exp = experiment(vec![
        file("ENCFF001REP", "bigWig", "fold change over control", "hg19", &[1]),
        pooled.clone(),
        file("ENCFF002REP", "bigWig", "fold change over control", "hg19", &[2]),
    ]);
    let selector = Selector::new(&store, &LocalOnly, false);

    assert_eq!(
        selector.select_signal_track(&exp, "hg19").unwrap(),
        SelectionResult::Single {
            path: store.file_path(&pooled)
        }
    );
}

#[test]
fn five_replicates_are_ambiguous() {
    let (_temp, store) = store();
    let files = (1..=5)
        .map(|rep| {
            file(
                &format!("ENCFF00{rep}SIG"),
                "bigWig",
                "fold change over control",
                "hg19",
                &[rep],
            )
        })
        .collect::<Vec<_>>();
    let exp = experiment(files);
    let materializer = CountingMaterializer::default();
    let selector = Selector::new(&store, &materializer, true);

    let result = selector.select_signal_track(&exp, "hg19").unwrap();

    let (reason, candidates) = assert_matches!(
        result,
        SelectionResult::Ambiguous { reason, candidates } => (reason, candidates)
    );
    assert_eq!(reason, AmbiguityReason::TooManySignalTracks);
    assert_eq!(candidates.len(), 5);
    assert!(materializer.calls().is_empty());
}

#[test]
fn five_unnumbered_tracks_are_ambiguous() {
    let (_temp, store) = store();
    let files = (1..=5)
        .map(|idx| file(&format!("ENCFF00{idx}RAW"), "bigWig", "raw signal", "hg19", &[]))
        .collect::<Vec<_>>();
    let selector = Selector::new(&store, &LocalOnly, false);

    assert_matches!(
        selector.select_signal_track(&experiment(files), "hg19").unwrap(),
        SelectionResult::Ambiguous {
            reason: AmbiguityReason::TooManySignalTracks,
            ..
        }
    );
}

#[test]
fn fold_change_outranks_raw_signal() {
    let (_temp, store) = store();
    let fold = file("ENCFF00FOLD", "bigWig", "fold change over control", "hg19", &[]);
    let exp = experiment(vec![
        file("ENCFF00RAW", "bigWig", "raw signal", "hg19", &[1, 2]),
        fold.clone(),
    ]);
    let selector = Selector::new(&store, &LocalOnly, false);

    assert_eq!(
        selector.select_signal_track(&exp, "hg19").unwrap(),
        SelectionResult::Single {
            path: store.file_path(&fold)
        }
    );
}

#[test]
fn other_assembly_is_never_selected() {
    let (_temp, store) = store();
    let exp = experiment(vec![
        file("ENCFF00MM9", "bigWig", "fold change over control", "mm9", &[1, 2]),
        file("ENCFF00PKM", "bed narrowPeak", "optimal idr thresholded peaks", "mm9", &[1, 2]),
    ]);
    let selector = Selector::new(&store, &LocalOnly, false);

    assert_eq!(selector.select_signal_track(&exp, "hg19").unwrap(), SelectionResult::None);
    assert_eq!(selector.select_peaks(&exp, "hg19").unwrap(), SelectionResult::None);
    assert!(signal_candidates(&exp.files, "hg19").is_empty());
}

#[test]
fn lower_priority_on_right_assembly_wins_over_top_priority_elsewhere() {
    let (_temp, store) = store();
    let raw = file("ENCFF00RAW", "bigWig", "raw signal", "hg19", &[1, 2]);
    let exp = experiment(vec![
        file("ENCFF00MM9", "bigWig", "fold change over control", "mm9", &[1, 2]),
        raw.clone(),
    ]);
    let selector = Selector::new(&store, &LocalOnly, false);

    assert_eq!(
        selector.select_signal_track(&exp, "hg19").unwrap(),
        SelectionResult::Single {
            path: store.file_path(&raw)
        }
    );
}

#[test]
fn non_bigwig_signal_is_ignored() {
    let (_temp, store) = store();
    let exp = experiment(vec![file("ENCFF00BED", "bed narrowPeak", "signal", "hg19", &[1])]);
    let selector = Selector::new(&store, &LocalOnly, false);
    assert_eq!(selector.select_signal_track(&exp, "hg19").unwrap(), SelectionResult::None);
}

#[test]
fn idr_narrow_peak_beats_broad_peak() {
    let (_temp, store) = store();
    let narrow = file("ENCFF00NAR", "bed narrowPeak", "optimal idr thresholded peaks", "hg19", &[1, 2]);
    let exp = experiment(vec![
        file("ENCFF00BRD", "bed broadPeak", "peaks", "hg19", &[1]),
        narrow.clone(),
    ]);
    let materializer = CountingMaterializer::default();
    let selector = Selector::new(&store, &materializer, true);

    assert_eq!(
        selector.select_peaks(&exp, "hg19").unwrap(),
        SelectionResult::Single {
            path: store.file_path(&narrow)
        }
    );
    assert_eq!(materializer.calls(), vec![store.file_path(&narrow)]);
}

#[test]
fn broad_peak_used_when_no_narrow_peak() {
    let (_temp, store) = store();
    let broad = file("ENCFF00BRD", "bed broadPeak", "replicated peaks", "hg19", &[1, 2]);
    let exp = experiment(vec![broad.clone()]);
    let selector = Selector::new(&store, &LocalOnly, false);

    assert_eq!(peak_candidates(&exp.files, "hg19").len(), 1);
    assert_eq!(
        selector.select_peaks(&exp, "hg19").unwrap(),
        SelectionResult::Single {
            path: store.file_path(&broad)
        }
    );
}

#[test]
fn replicate_peaks_are_intersected_after_eager_download() {
    let (_temp, store) = store();
    let rep1 = file("ENCFF00AAA", "bed narrowPeak", "peaks", "hg19", &[1]);
    let rep2 = file("ENCFF00BBB", "bed narrowPeak", "peaks", "hg19", &[2]);
    let exp = experiment(vec![rep2.clone(), rep1.clone()]);
    let materializer = CountingMaterializer::default();
    let selector = Selector::new(&store, &materializer, true);

    let result = selector.select_peaks(&exp, "hg19").unwrap();

    let plan = assert_matches!(result, SelectionResult::Merge { plan } => plan);
    assert_eq!(plan.kind, MergeKind::IntersectPeaks);
    assert_eq!(plan.inputs, vec![store.file_path(&rep1), store.file_path(&rep2)]);
    assert_eq!(
        plan.output_path.file_name(),
        Some("intersectFirst_ENCFF00AAA_ENCFF00BBB.bed.gz")
    );
    assert_eq!(materializer.calls().len(), 2);
}

#[test]
fn two_replicate_narrow_peak_outranks_plain_narrow_peak() {
    let (_temp, store) = store();
    let both = file("ENCFF00TWO", "bed narrowPeak", "peaks", "hg19", &[1, 2]);
    let exp = experiment(vec![
        file("ENCFF00ONE", "bed narrowPeak", "peaks", "hg19", &[1]),
        both.clone(),
    ]);
    let selector = Selector::new(&store, &LocalOnly, false);

    assert_eq!(
        selector.select_peaks(&exp, "hg19").unwrap(),
        SelectionResult::Single {
            path: store.file_path(&both)
        }
    );
}

#[test]
fn peaks_missing_entirely_is_none() {
    let (_temp, store) = store();
    let exp = experiment(vec![file("ENCFF00SIG", "bigWig", "signal", "hg19", &[1])]);
    let selector = Selector::new(&store, &LocalOnly, false);
    assert_eq!(selector.select_peaks(&exp, "hg19").unwrap(), SelectionResult::None);
}

#[test]
fn first_bam_is_returned_when_several_exist() {
    let (_temp, store) = store();
    let first = file("ENCFF00BM1", "bam", "alignments", "hg19", &[1]);
    let exp = experiment(vec![
        first.clone(),
        file("ENCFF00BM2", "bam", "alignments", "GRCh38", &[2]),
    ]);
    let materializer = CountingMaterializer::default();
    let selector = Selector::new(&store, &materializer, true);

    let alignment = selector.select_alignment(&exp).unwrap().unwrap();

    assert_eq!(alignment.file_id, "ENCFF00BM1");
    assert_eq!(alignment.assembly.as_deref(), Some("hg19"));
    assert_eq!(alignment.candidates, 2);
    assert_eq!(materializer.calls(), vec![store.file_path(&first)]);
}

#[test]
fn no_bam_means_no_alignment() {
    let (_temp, store) = store();
    let exp = experiment(vec![file("ENCFF00SIG", "bigWig", "signal", "hg19", &[1])]);
    let selector = Selector::new(&store, &LocalOnly, false);
    assert!(selector.select_alignment(&exp).unwrap().is_none());
}

#[test]
fn existing_merge_output_is_flagged() {
    let (_temp, store) = store();
    let rep1 = file("ENCFF00AFC", "bigWig", "fold change over control", "hg19", &[1]);
    let rep2 = file("ENCFF00BFC", "bigWig", "fold change over control", "hg19", &[2]);
    let exp = experiment(vec![rep1, rep2]);
    let selector = Selector::new(&store, &LocalOnly, false);

    let first = selector.select_signal_track(&exp, "hg19").unwrap();
    let output = first.path().unwrap().clone();
    Store::write_bytes_atomic(&output, b"bigwig").unwrap();

    let second = selector.select_signal_track(&exp, "hg19").unwrap();
    let plan = assert_matches!(second, SelectionResult::Merge { plan } => plan);
    assert!(plan.already_computed);
    assert_eq!(plan.output_path, output);
}

#[test]
fn numbered_replicate_wins_over_pooled_peaks_of_same_filter() {
    let (_temp, store) = store();
    let rep1 = file("ENCFF00REP", "bed narrowPeak", "peaks", "hg19", &[1]);
    let exp = experiment(vec![
        file("ENCFF00POL", "bed narrowPeak", "peaks", "hg19", &[1, 3]),
        rep1.clone(),
    ]);
    let selector = Selector::new(&store, &LocalOnly, false);

    assert_eq!(peak_candidates(&exp.files, "hg19").len(), 2);
    assert_eq!(
        selector.select_peaks(&exp, "hg19").unwrap(),
        SelectionResult::Single {
            path: store.file_path(&rep1)
        }
    );
}

#[test]
fn unnumbered_peaks_are_intersected_as_a_whole() {
    let (_temp, store) = store();
    let a = file("ENCFF00AAA", "bed narrowPeak", "peaks", "hg19", &[]);
    let b = file("ENCFF00BBB", "bed narrowPeak", "peaks", "hg19", &[]);
    let c = file("ENCFF00CCC", "bed narrowPeak", "peaks", "hg19", &[]);
    let exp = experiment(vec![c.clone(), a.clone(), b.clone()]);
    let selector = Selector::new(&store, &LocalOnly, false);

    let result = selector.select_peaks(&exp, "hg19").unwrap();

    let plan = assert_matches!(result, SelectionResult::Merge { plan } => plan);
    assert_eq!(plan.kind, MergeKind::IntersectPeaks);
    assert_eq!(
        plan.inputs,
        vec![store.file_path(&a), store.file_path(&b), store.file_path(&c)]
    );
    assert_eq!(
        plan.output_path.file_name(),
        Some("intersectFirst_ENCFF00AAA_ENCFF00BBB_ENCFF00CCC.bed.gz")
    );
}

#[test]
fn replicate_one_step_averages_every_numbered_replicate_of_the_tier() {
    let (_temp, store) = store();
    let exp = experiment(vec![
        file("ENCFF00REA", "bigWig", "fold change over control", "hg19", &[1]),
        file("ENCFF00REB", "bigWig", "fold change over control", "hg19", &[2]),
        file("ENCFF00REC", "bigWig", "fold change over control", "hg19", &[3]),
        file("ENCFF00RAW", "bigWig", "raw signal", "hg19", &[4]),
    ]);
    let selector = Selector::new(&store, &LocalOnly, false);

    assert_eq!(signal_candidates(&exp.files, "hg19").len(), 3);
    let result = selector.select_signal_track(&exp, "hg19").unwrap();

    let plan = assert_matches!(result, SelectionResult::Merge { plan } => plan);
    assert_eq!(plan.inputs.len(), 3);
    assert_eq!(
        plan.output_path.file_name(),
        Some("mean_ENCFF00REA_ENCFF00REB_ENCFF00REC.bigWig")
    );
}

#[test]
fn replicate_two_step_widens_to_its_tier() {
    let (_temp, store) = store();
    let exp = experiment(vec![
        file("ENCFF00TWO", "bigWig", "fold change over control", "hg19", &[2]),
        file("ENCFF00THR", "bigWig", "fold change over control", "hg19", &[3]),
        file("ENCFF00ELS", "bigWig", "fold change over control", "mm9", &[1]),
    ]);
    let selector = Selector::new(&store, &LocalOnly, false);

    let result = selector.select_signal_track(&exp, "hg19").unwrap();

    let plan = assert_matches!(result, SelectionResult::Merge { plan } => plan);
    assert_eq!(plan.kind, MergeKind::MeanSignal);
    assert_eq!(
        plan.output_path.file_name(),
        Some("mean_ENCFF00THR_ENCFF00TWO.bigWig")
    );
}
