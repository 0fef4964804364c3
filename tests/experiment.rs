use assert_matches::assert_matches;
use serde_json::json;

use kira_dcc::error::KiraError;
use kira_dcc::experiment::ExperimentRecord;
use kira_dcc::file_record::FileRecord;

#[test]
fn parses_experiment_document() {
    let doc = json!({
        "accession": "ENCSR000AKA",
        "assay_term_name": "ChIP-seq",
        "description": "H3K4me3 ChIP-seq on human GM12878",
        "status": "released",
        "run_type": "paired-ended",
        "lab": {"name": "bradley-bernstein"},
        "biosample_term_name": ["GM12878", "GM12878"],
        "biosample_type": "cell line",
        "target": [{"label": "H3K4me3", "investigated_as": ["histone", "broad histone mark"]}],
        "replicates": [{"library": {"biosample": {"age": 53}}}],
        "files": [
            {
                "accession": "ENCFF001AAA",
                "href": "/files/ENCFF001AAA/@@download/ENCFF001AAA.bigWig",
                "file_type": "bigWig",
                "output_type": "fold change over control",
                "assembly": "hg19",
                "biological_replicates": [1, 2],
                "technical_replicates": ["1_1"],
                "file_size": 1024,
                "md5sum": "abc"
            },
            {"file_type": "bam"},
            "not an object"
        ]
    });

    let record = ExperimentRecord::from_json(&doc).unwrap();
    assert_eq!(record.accession, "ENCSR000AKA");
    assert!(record.is_chip_seq_histone_mark());
    assert!(!record.is_dnase_seq());
    assert_eq!(record.label, "H3K4me3");
    assert_eq!(record.lab, "bradley-bernstein");
    assert_eq!(record.biosample_term_name, "GM12878");
    assert_eq!(record.age.as_deref(), Some("53"));
    assert!(record.is_paired_end);

    assert_eq!(record.files.len(), 1);
    let file = &record.files[0];
    assert_eq!(file.experiment, "ENCSR000AKA");
    assert!(file.is_pooled);
    assert!(file.bio_rep.is_none());
    assert_eq!(file.tech_rep.as_deref(), Some("1_1"));
    assert_eq!(file.size_bytes, Some(1024));
    assert_eq!(file.file_name(), "ENCFF001AAA.bigWig");
}

#[test]
fn annotation_uses_annotation_type() {
    let doc = json!({
        "accession": "ENCSR123ABC",
        "@type": ["Annotation", "FileSet", "Item"],
        "annotation_type": "candidate Cis-Regulatory Elements",
        "assay_term_name": "ignored",
        "lab": "encode-processing-pipeline"
    });
    let record = ExperimentRecord::from_json(&doc).unwrap();
    assert_eq!(record.assay_term_name, "candidate Cis-Regulatory Elements");
    assert_eq!(record.lab, "encode-processing-pipeline");
    assert!(record.files.is_empty());
}

#[test]
fn missing_accession_is_an_error() {
    let err = ExperimentRecord::from_json(&json!({"files": []})).unwrap_err();
    assert_matches!(err, KiraError::MetadataParse(_));
}

#[test]
fn single_replicate_is_numbered() {
    let file = FileRecord::from_json(
        "ENCSR000AKA",
        &json!({"accession": "ENCFF002AAA", "biological_replicates": ["2"]}),
    )
    .unwrap();
    assert_eq!(file.bio_rep.as_deref(), Some("2"));
    assert!(file.has_numbered_bio_rep());
    assert!(file.bio_rep_contains("2"));
    assert!(!file.is_pooled);
}

#[test]
fn new_record_has_no_metadata() {
    let record = ExperimentRecord::new("ENCSR000AKA", vec![FileRecord::new("ENCFF001AAA", "ENCSR000AKA")]);
    assert_eq!(record.files.len(), 1);
    assert!(!record.is_chip_seq());
}
