use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::dcc::DEFAULT_HOST;
use crate::domain::{ExperimentAccession, Role};
use crate::error::KiraError;

pub const CONFIG_FILE: &str = "kira-dcc.json";
pub const DEFAULT_ASSEMBLY: &str = "hg19";
pub const DEFAULT_JOBS: usize = 4;
pub const DEFAULT_REFRESH_DAYS: u32 = 14;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub assembly: Option<String>,
    #[serde(default)]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub verify_md5: Option<bool>,
    #[serde(default)]
    pub refresh_days: Option<u32>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub chrom_sizes: HashMap<String, PathBuf>,
    #[serde(default)]
    pub experiments: Vec<ExperimentEntry>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub wiggletools: Option<PathBuf>,
    #[serde(default)]
    pub wig_to_big_wig: Option<PathBuf>,
    #[serde(default)]
    pub bedtools: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExperimentEntry {
    Shorthand(String),
    Detailed(ExperimentEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExperimentEntryObject {
    pub accession: String,
    #[serde(default)]
    pub assembly: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<Role>>,
}

#[derive(Debug, Clone)]
pub struct ExperimentRequest {
    pub accession: ExperimentAccession,
    /// Overrides the config-wide assembly when set.
    pub assembly: Option<String>,
    /// Roles to select; empty means whatever the command asks for.
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_root: Option<Utf8PathBuf>,
    pub host: String,
    pub assembly: String,
    pub jobs: usize,
    pub verify_md5: bool,
    pub refresh_days: u32,
    pub tools: ToolsConfig,
    pub chrom_sizes: HashMap<String, PathBuf>,
    pub experiments: Vec<ExperimentRequest>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            data_root: None,
            host: DEFAULT_HOST.to_string(),
            assembly: DEFAULT_ASSEMBLY.to_string(),
            jobs: DEFAULT_JOBS,
            verify_md5: true,
            refresh_days: DEFAULT_REFRESH_DAYS,
            tools: ToolsConfig::default(),
            chrom_sizes: HashMap::new(),
            experiments: Vec::new(),
        }
    }
}

impl ResolvedConfig {
    /// Experiments listed in the config that want `role`.
    pub fn experiments_for(&self, role: Role) -> impl Iterator<Item = &ExperimentRequest> {
        self.experiments
            .iter()
            .filter(move |entry| entry.roles.is_empty() || entry.roles.contains(&role))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    /// Like [`ConfigLoader::resolve`], but a missing default file yields the
    /// built-in defaults instead of an error.
    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        match Self::resolve(path) {
            Err(KiraError::MissingConfig) => Ok(ResolvedConfig::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let defaults = ResolvedConfig::default();

        let jobs = config.jobs.unwrap_or(defaults.jobs);
        if jobs == 0 {
            return Err(KiraError::ConfigParse("jobs must be at least 1".to_string()));
        }

        let experiments = config
            .experiments
            .into_iter()
            .map(|entry| match entry {
                ExperimentEntry::Shorthand(value) => Ok(ExperimentRequest {
                    accession: value.parse()?,
                    assembly: None,
                    roles: Vec::new(),
                }),
                ExperimentEntry::Detailed(obj) => Ok(ExperimentRequest {
                    accession: obj.accession.parse()?,
                    assembly: obj.assembly,
                    roles: obj.roles.unwrap_or_default(),
                }),
            })
            .collect::<Result<Vec<_>, KiraError>>()?;

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(defaults.schema_version),
            data_root: config.data_root,
            host: config.host.unwrap_or(defaults.host),
            assembly: config.assembly.unwrap_or(defaults.assembly),
            jobs,
            verify_md5: config.verify_md5.unwrap_or(defaults.verify_md5),
            refresh_days: config.refresh_days.unwrap_or(defaults.refresh_days),
            tools: config.tools,
            chrom_sizes: config.chrom_sizes,
            experiments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            experiments: vec![ExperimentEntry::Shorthand("ENCSR000AKA".to_string())],
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.assembly, "hg19");
        assert_eq!(resolved.jobs, 4);
        assert!(resolved.verify_md5);
        assert_eq!(resolved.experiments.len(), 1);
        assert!(resolved.experiments[0].roles.is_empty());
    }

    #[test]
    fn zero_jobs_is_rejected() {
        let config = Config {
            jobs: Some(0),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config).is_err());
    }
}
