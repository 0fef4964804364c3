use assert_matches::assert_matches;

use kira_dcc::domain::{DownloadKind, ExperimentAccession, Role, default_download_kinds};
use kira_dcc::error::KiraError;

#[test]
fn parse_experiment_and_file_accessions() {
    let exp: ExperimentAccession = "ENCSR000AKA".parse().unwrap();
    assert_eq!(exp.as_str(), "ENCSR000AKA");
    let file: ExperimentAccession = " encff001aaa ".parse().unwrap();
    assert_eq!(file.to_string(), "ENCFF001AAA");
}

#[test]
fn parse_test_accession() {
    let acc: ExperimentAccession = "TSTSR123456".parse().unwrap();
    assert_eq!(acc.as_str(), "TSTSR123456");
}

#[test]
fn parse_accession_rejects_garbage() {
    for value in ["", "ENCSR00AKA", "ENCSR000AKA1", "SRR014966"] {
        let err = value.parse::<ExperimentAccession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
    }
}

#[test]
fn accessions_sort_lexically() {
    let mut accs: Vec<ExperimentAccession> = ["ENCSR000EMT", "ENCSR000AKA"]
        .iter()
        .map(|value| value.parse().unwrap())
        .collect();
    accs.sort();
    assert_eq!(accs[0].as_str(), "ENCSR000AKA");
}

#[test]
fn role_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&Role::Signal).unwrap(), "\"signal\"");
    let role: Role = serde_json::from_str("\"peaks\"").unwrap();
    assert_eq!(role, Role::Peaks);
    assert_eq!(Role::Alignment.to_string(), "alignment");
}

#[test]
fn default_kinds_skip_raw_reads_and_alignments() {
    let kinds = default_download_kinds();
    assert!(kinds.contains(&DownloadKind::BigWig));
    assert!(kinds.contains(&DownloadKind::Bed));
    assert!(!kinds.contains(&DownloadKind::Bam));
    assert!(!kinds.contains(&DownloadKind::Fastq));
}
