use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DownloadKind;

pub mod output_type {
    pub const FOLD_CHANGE_OVER_CONTROL: &str = "fold change over control";
    pub const SIGNAL_OF_UNIQUE_READS: &str = "signal of unique reads";
    pub const RAW_SIGNAL: &str = "raw signal";
    pub const SIGNAL: &str = "signal";
    pub const PEAKS: &str = "peaks";
    pub const REPLICATED_PEAKS: &str = "replicated peaks";
    pub const OPTIMAL_IDR_PEAKS: &str = "optimal idr thresholded peaks";
    pub const HOTSPOTS: &str = "hotspots";
}

pub mod file_type {
    pub const BIGWIG: &str = "bigWig";
    pub const BAM: &str = "bam";
    pub const NARROW_PEAK: &str = "bed narrowPeak";
    pub const BROAD_PEAK: &str = "bed broadPeak";
    pub const FASTQ: &str = "fastq";
    pub const FASTA: &str = "fasta";
    pub const TSV: &str = "tsv";
}

/// Replicate labels considered "numbered" (single, non-pooled) by the
/// replicate tie-break.
pub const NUMBERED_REPLICATES: [&str; 5] = ["1", "2", "3", "4", "5"];

/// One file of an experiment, as described by the DCC metadata.
///
/// Every classification field is optional. A predicate over a missing field
/// is simply false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub experiment: String,
    pub href: Option<String>,
    pub file_format: Option<String>,
    pub file_type: Option<String>,
    pub output_type: Option<String>,
    pub bio_rep: Option<String>,
    pub tech_rep: Option<String>,
    pub biological_replicates: Option<Vec<u32>>,
    pub is_pooled: bool,
    pub assembly: Option<String>,
    pub submitted_file_name: Option<String>,
    pub size_bytes: Option<u64>,
    pub checksum: Option<String>,
    pub status: Option<String>,
    pub date_created: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFile {
    #[serde(default)]
    accession: Option<String>,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    file_format: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    output_type: Option<String>,
    #[serde(default)]
    assembly: Option<String>,
    #[serde(default)]
    submitted_file_name: Option<String>,
    #[serde(default)]
    md5sum: Option<String>,
    #[serde(default)]
    file_size: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    date_created: Option<String>,
    #[serde(default)]
    biological_replicates: Option<Vec<Value>>,
    #[serde(default)]
    technical_replicates: Option<Vec<Value>>,
}

impl FileRecord {
    /// Minimal record, mostly useful for building fixtures.
    pub fn new(file_id: impl Into<String>, experiment: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            experiment: experiment.into(),
            href: None,
            file_format: None,
            file_type: None,
            output_type: None,
            bio_rep: None,
            tech_rep: None,
            biological_replicates: None,
            is_pooled: false,
            assembly: None,
            submitted_file_name: None,
            size_bytes: None,
            checksum: None,
            status: None,
            date_created: None,
        }
    }

    /// Parses one entry of an experiment's `files` array. Returns `None` when
    /// the entry is not an object or carries no accession.
    pub fn from_json(experiment: &str, value: &Value) -> Option<Self> {
        let raw: RawFile = serde_json::from_value(value.clone()).ok()?;
        let file_id = raw.accession.filter(|acc| !acc.trim().is_empty())?;

        let biological_replicates = raw
            .biological_replicates
            .map(|reps| reps.iter().filter_map(replicate_number).collect::<Vec<_>>());
        let is_pooled = biological_replicates
            .as_ref()
            .map(|reps| reps.len() > 1)
            .unwrap_or(false);
        let bio_rep = biological_replicates
            .as_ref()
            .and_then(|reps| single(reps))
            .map(|rep| rep.to_string());
        let tech_rep = raw
            .technical_replicates
            .as_ref()
            .and_then(|reps| single(reps))
            .and_then(|rep| match rep {
                Value::String(value) => Some(value.clone()),
                Value::Number(value) => Some(value.to_string()),
                _ => None,
            });

        Some(Self {
            file_id,
            experiment: experiment.to_string(),
            href: raw.href,
            file_format: raw.file_format,
            file_type: raw.file_type,
            output_type: raw.output_type,
            bio_rep,
            tech_rep,
            biological_replicates,
            is_pooled,
            assembly: raw.assembly,
            submitted_file_name: raw.submitted_file_name,
            size_bytes: raw.file_size.as_ref().and_then(Value::as_u64),
            checksum: raw.md5sum,
            status: raw.status,
            date_created: raw.date_created,
        })
    }

    /// Name of the file on the DCC, taken from the download href when present.
    pub fn file_name(&self) -> String {
        self.href
            .as_deref()
            .and_then(|href| href.rsplit('/').find(|part| !part.is_empty()))
            .map(|name| name.to_string())
            .unwrap_or_else(|| match self.file_format.as_deref() {
                Some(format) => format!("{}.{format}", self.file_id),
                None => self.file_id.clone(),
            })
    }

    pub fn is_on_assembly(&self, assembly: &str) -> bool {
        self.assembly.as_deref() == Some(assembly)
    }

    pub fn has_numbered_bio_rep(&self) -> bool {
        self.bio_rep
            .as_deref()
            .map(|rep| NUMBERED_REPLICATES.contains(&rep))
            .unwrap_or(false)
    }

    pub fn bio_rep_contains(&self, needle: &str) -> bool {
        self.bio_rep
            .as_deref()
            .map(|rep| rep.contains(needle))
            .unwrap_or(false)
    }

    pub fn bio_rep_is(&self, label: &str) -> bool {
        self.bio_rep.as_deref() == Some(label)
    }

    pub fn has_biological_replicate(&self, rep: u32) -> bool {
        self.biological_replicates
            .as_ref()
            .map(|reps| reps.contains(&rep))
            .unwrap_or(false)
    }

    pub fn is_output_type(&self, value: &str) -> bool {
        self.output_type.as_deref() == Some(value)
    }

    fn is_file_type(&self, value: &str) -> bool {
        self.file_type.as_deref() == Some(value)
    }

    fn is_file_format(&self, value: &str) -> bool {
        self.file_format.as_deref() == Some(value)
    }

    pub fn is_big_wig(&self) -> bool {
        self.is_file_type(file_type::BIGWIG)
    }

    pub fn is_bam(&self) -> bool {
        self.is_file_type(file_type::BAM)
    }

    pub fn is_bed_narrow_peak(&self) -> bool {
        self.is_file_type(file_type::NARROW_PEAK)
    }

    pub fn is_bed_broad_peak(&self) -> bool {
        self.is_file_type(file_type::BROAD_PEAK)
    }

    pub fn is_fastq_or_fasta(&self) -> bool {
        self.is_file_type(file_type::FASTQ) || self.is_file_type(file_type::FASTA)
    }

    pub fn is_tsv(&self) -> bool {
        self.is_file_type(file_type::TSV)
    }

    pub fn is_bed(&self) -> bool {
        self.is_file_format("bed")
    }

    pub fn is_big_bed(&self) -> bool {
        self.is_file_format("bigBed")
    }

    pub fn is_gtf(&self) -> bool {
        self.is_file_format("gtf")
    }

    pub fn is_hdf5(&self) -> bool {
        self.is_file_format("hdf5")
    }

    pub fn is_fold_change(&self) -> bool {
        self.is_output_type(output_type::FOLD_CHANGE_OVER_CONTROL)
    }

    pub fn is_signal_of_unique_reads(&self) -> bool {
        self.is_output_type(output_type::SIGNAL_OF_UNIQUE_READS)
    }

    pub fn is_raw_signal(&self) -> bool {
        self.is_output_type(output_type::RAW_SIGNAL)
    }

    pub fn is_signal(&self) -> bool {
        self.is_output_type(output_type::SIGNAL)
    }

    pub fn is_peaks(&self) -> bool {
        self.is_output_type(output_type::PEAKS)
    }

    pub fn is_replicated_peaks(&self) -> bool {
        self.is_output_type(output_type::REPLICATED_PEAKS)
    }

    pub fn is_idr_optimal(&self) -> bool {
        self.is_output_type(output_type::OPTIMAL_IDR_PEAKS)
    }

    // Same test as is_idr_optimal; the peak chain keeps both entries.
    pub fn is_idr(&self) -> bool {
        self.is_output_type(output_type::OPTIMAL_IDR_PEAKS)
    }

    pub fn is_hotspot(&self) -> bool {
        self.is_output_type(output_type::HOTSPOTS)
    }

    pub fn matches_kind(&self, kind: DownloadKind) -> bool {
        match kind {
            DownloadKind::Bed => self.is_bed(),
            DownloadKind::BigBed => self.is_big_bed(),
            DownloadKind::BigWig => self.is_big_wig(),
            DownloadKind::Bam => self.is_bam(),
            DownloadKind::Fastq => self.is_fastq_or_fasta(),
            DownloadKind::Tsv => self.is_tsv(),
            DownloadKind::Gtf => self.is_gtf(),
            DownloadKind::Hdf5 => self.is_hdf5(),
            DownloadKind::Hotspots => self.is_hotspot(),
        }
    }
}

fn replicate_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn single<T>(items: &[T]) -> Option<&T> {
    match items {
        [only] => Some(only),
        _ => None,
    }
}
