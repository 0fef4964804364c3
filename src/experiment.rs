use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::KiraError;
use crate::file_record::FileRecord;

/// One experiment of the archive together with the files it owns.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentRecord {
    pub accession: String,
    pub assay_term_name: String,
    pub description: String,
    pub target: String,
    pub label: String,
    pub status: String,
    pub lab: String,
    pub biosample_term_name: String,
    pub biosample_type: String,
    pub date_released: Option<String>,
    pub age: Option<String>,
    pub is_paired_end: bool,
    pub dbxrefs: Vec<String>,
    pub files: Vec<FileRecord>,
}

impl ExperimentRecord {
    pub fn new(accession: impl Into<String>, files: Vec<FileRecord>) -> Self {
        Self {
            accession: accession.into(),
            assay_term_name: String::new(),
            description: String::new(),
            target: String::new(),
            label: String::new(),
            status: String::new(),
            lab: String::new(),
            biosample_term_name: String::new(),
            biosample_type: String::new(),
            date_released: None,
            age: None,
            is_paired_end: false,
            dbxrefs: Vec::new(),
            files,
        }
    }

    /// Builds a record from an experiment document as served by
    /// `/experiments/<accession>/?format=json`.
    pub fn from_json(doc: &Value) -> Result<Self, KiraError> {
        let accession = str_field(doc, "accession")
            .ok_or_else(|| KiraError::MetadataParse("experiment has no accession".to_string()))?;

        let is_annotation = doc
            .get("@type")
            .and_then(Value::as_array)
            .map(|types| types.iter().any(|t| t.as_str() == Some("Annotation")))
            .unwrap_or(false);
        let assay_term_name = if is_annotation {
            str_field(doc, "annotation_type")
        } else {
            str_field(doc, "assay_term_name")
        }
        .unwrap_or_default();

        let target_doc = match doc.get("target") {
            Some(Value::Array(items)) => items.first(),
            Some(value @ Value::Object(_)) => Some(value),
            _ => None,
        };
        let target = target_doc
            .and_then(|t| t.get("investigated_as"))
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let label = target_doc
            .and_then(|t| t.get("label"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let dbxrefs = target_doc
            .and_then(|t| t.get("dbxref"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let lab = match doc.get("lab") {
            Some(Value::Object(lab)) => lab
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some(Value::String(lab)) => lab.clone(),
            _ => String::new(),
        };

        let age = doc
            .pointer("/replicates/0/library/biosample/age")
            .and_then(|value| match value {
                Value::String(text) => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            });

        let mut files = Vec::new();
        if let Some(entries) = doc.get("files").and_then(Value::as_array) {
            for entry in entries {
                match FileRecord::from_json(&accession, entry) {
                    Some(file) => files.push(file),
                    None => warn!(experiment = %accession, "skipping malformed file entry"),
                }
            }
        }

        Ok(Self {
            assay_term_name,
            description: str_field(doc, "description").unwrap_or_default(),
            target,
            label,
            status: str_field(doc, "status").unwrap_or_default(),
            lab,
            biosample_term_name: string_or_list(doc.get("biosample_term_name")),
            biosample_type: string_or_list(doc.get("biosample_type")),
            date_released: str_field(doc, "date_released"),
            age,
            is_paired_end: str_field(doc, "run_type").as_deref() == Some("paired-ended"),
            dbxrefs,
            files,
            accession,
        })
    }

    pub fn is_chip_seq(&self) -> bool {
        self.assay_term_name == "ChIP-seq"
    }

    pub fn is_chip_seq_histone_mark(&self) -> bool {
        self.is_chip_seq() && self.target.contains("histone")
    }

    pub fn is_dnase_seq(&self) -> bool {
        self.assay_term_name == "DNase-seq"
    }
}

fn str_field(doc: &Value, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_or_list(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => {
            let mut distinct: Vec<&str> = Vec::new();
            for item in items.iter().filter_map(Value::as_str) {
                if !distinct.contains(&item) {
                    distinct.push(item);
                }
            }
            if distinct.len() > 1 {
                warn!(values = %distinct.join(", "), "multiple values found, keeping the first");
            }
            distinct.first().map(|s| s.to_string()).unwrap_or_default()
        }
        _ => String::new(),
    }
}
