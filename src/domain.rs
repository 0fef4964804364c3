use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static ACCESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ENC[A-Z]{2}\d{3}[A-Z]{3}|TST[A-Z]{2}\d{6})$").expect("valid accession regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExperimentAccession(String);

impl ExperimentAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_matches('/').to_uppercase();
        let normalized = normalized
            .strip_prefix("EXPERIMENTS/")
            .unwrap_or(&normalized)
            .to_string();
        if !ACCESSION_RE.is_match(&normalized) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// What a selection request asks the engine to pick for an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Signal,
    Alignment,
    Peaks,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Signal => write!(f, "signal"),
            Role::Alignment => write!(f, "alignment"),
            Role::Peaks => write!(f, "peaks"),
        }
    }
}

/// File classes understood by the bulk `download` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadKind {
    Bed,
    BigBed,
    BigWig,
    Bam,
    Fastq,
    Tsv,
    Gtf,
    Hdf5,
    Hotspots,
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DownloadKind::Bed => "bed",
            DownloadKind::BigBed => "big-bed",
            DownloadKind::BigWig => "big-wig",
            DownloadKind::Bam => "bam",
            DownloadKind::Fastq => "fastq",
            DownloadKind::Tsv => "tsv",
            DownloadKind::Gtf => "gtf",
            DownloadKind::Hdf5 => "hdf5",
            DownloadKind::Hotspots => "hotspots",
        };
        write!(f, "{label}")
    }
}

/// Default set used when `download` is invoked without `--kind`.
pub fn default_download_kinds() -> Vec<DownloadKind> {
    vec![
        DownloadKind::Bed,
        DownloadKind::BigWig,
        DownloadKind::Gtf,
        DownloadKind::Hdf5,
        DownloadKind::Hotspots,
    ]
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_accession_normalizes_case() {
        let acc: ExperimentAccession = "encsr000aka".parse().unwrap();
        assert_eq!(acc.as_str(), "ENCSR000AKA");
    }

    #[test]
    fn parse_accession_from_at_id() {
        let acc: ExperimentAccession = "/experiments/ENCSR000AKA/".parse().unwrap();
        assert_eq!(acc.as_str(), "ENCSR000AKA");
    }

    #[test]
    fn parse_accession_invalid() {
        let err = "GSE102902".parse::<ExperimentAccession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
    }
}
