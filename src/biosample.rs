use serde::Serialize;
use serde_json::Value;

use crate::error::KiraError;

/// Biosample summary as served by `/biosamples/<accession>/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BiosampleRecord {
    pub accession: String,
    pub term_id: String,
    pub term_name: String,
    pub biosample_type: String,
    pub organism: Option<String>,
}

impl BiosampleRecord {
    /// Older documents carry the term fields at the top level, newer ones
    /// under `biosample_ontology`.
    pub fn from_json(doc: &Value) -> Result<Self, KiraError> {
        let accession = text(doc, &["/accession"])
            .ok_or_else(|| KiraError::MetadataParse("biosample has no accession".to_string()))?;

        Ok(Self {
            term_id: text(doc, &["/biosample_term_id", "/biosample_ontology/term_id"])
                .unwrap_or_default(),
            term_name: text(doc, &["/biosample_term_name", "/biosample_ontology/term_name"])
                .unwrap_or_default(),
            biosample_type: text(doc, &["/biosample_type", "/biosample_ontology/classification"])
                .unwrap_or_default(),
            organism: text(doc, &["/organism/scientific_name"]),
            accession,
        })
    }
}

fn text(doc: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|pointer| doc.pointer(pointer).and_then(Value::as_str))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
