use std::time::{Duration, Instant};

use camino::Utf8Path;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::biosample::BiosampleRecord;
use crate::config::ResolvedConfig;
use crate::dcc::{DccClient, alias_path, biosample_path, experiment_path, graph_accessions};
use crate::domain::{DownloadKind, ExperimentAccession, Role};
use crate::download::{DccMaterializer, LocalOnly, Materializer};
use crate::error::KiraError;
use crate::experiment::ExperimentRecord;
use crate::merge::MergePlan;
use crate::selection::{Alignment, SelectionResult, Selector};
use crate::store::Store;
use crate::tools::MergeExecutor;

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub assembly: String,
    pub jobs: usize,
    pub verify_md5: bool,
    pub refresh_days: u32,
}

impl From<&ResolvedConfig> for AppSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            assembly: config.assembly.clone(),
            jobs: config.jobs,
            verify_md5: config.verify_md5,
            refresh_days: config.refresh_days,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Re-fetch even when a cached document exists.
    pub force: bool,
    /// Re-fetch cached documents older than the configured refresh period.
    pub refresh: bool,
    /// Never write the metadata cache.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectOptions {
    /// Materialize selected files and compute merge artifacts.
    pub process: bool,
    pub dry_run: bool,
    pub force: bool,
    pub refresh: bool,
}

impl SelectOptions {
    fn load(self) -> LoadOptions {
        LoadOptions {
            force: self.force,
            refresh: self.refresh,
            dry_run: self.dry_run,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOptions {
    pub force: bool,
    pub dry_run: bool,
    pub refresh: bool,
}

#[derive(Debug, Clone)]
pub struct SelectRequest {
    pub accession: ExperimentAccession,
    pub role: Role,
    /// Falls back to the configured assembly.
    pub assembly: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub assay: Option<String>,
    pub organism: Option<String>,
    pub status: Option<String>,
    /// Extra raw `key=value` filters passed through to the search endpoint.
    pub terms: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectResult {
    pub items: Vec<SelectItemResult>,
}

impl SelectResult {
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|item| item.status == "error").count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectItemResult {
    pub accession: String,
    pub role: Role,
    pub assembly: String,
    /// `ok`, `ambiguous` or `error`.
    pub status: String,
    /// `none`, `selected`, `planned`, `would-compute`, `computed`,
    /// `already-computed`, `ambiguous` or `failed`.
    pub action: String,
    pub path: Option<String>,
    pub selection: Option<SelectionResult>,
    pub alignment: Option<Alignment>,
    pub error: Option<String>,
}

impl SelectItemResult {
    fn new(request: &SelectRequest, assembly: &str) -> Self {
        Self {
            accession: request.accession.to_string(),
            role: request.role,
            assembly: assembly.to_string(),
            status: "ok".to_string(),
            action: "none".to_string(),
            path: None,
            selection: None,
            alignment: None,
            error: None,
        }
    }

    fn failed(mut self, err: &KiraError) -> Self {
        self.status = "error".to_string();
        self.action = "failed".to_string();
        self.error = Some(err.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub items: Vec<DownloadItemResult>,
}

impl DownloadResult {
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|item| item.status == "error").count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItemResult {
    pub accession: String,
    pub status: String,
    pub files: Vec<DownloadedFile>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadedFile {
    pub file_id: String,
    pub path: String,
    /// `present`, `downloaded`, `would-download`, `no-href` or `failed`.
    pub action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub accession: String,
    pub assay_term_name: String,
    pub description: String,
    pub target: String,
    pub label: String,
    pub status: String,
    pub lab: String,
    pub biosample_term_name: String,
    pub biosample_type: String,
    pub age: Option<String>,
    pub is_paired_end: bool,
    pub metadata_path: String,
    pub files: Vec<InfoFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoFile {
    pub file_id: String,
    pub file_type: Option<String>,
    pub output_type: Option<String>,
    pub assembly: Option<String>,
    pub bio_rep: Option<String>,
    pub is_pooled: bool,
    pub size_bytes: Option<u64>,
    pub local: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub count: usize,
    pub accessions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AliasResult {
    pub alias: String,
    pub accession: Option<String>,
    /// Host-relative `@id` of the resolved object.
    pub id: Option<String>,
    pub types: Vec<String>,
}

impl AliasResult {
    fn from_json(alias: &str, doc: &Value) -> Self {
        let field = |key: &str| doc.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            alias: alias.to_string(),
            accession: field("accession"),
            id: field("@id"),
            types: doc
                .get("@type")
                .and_then(Value::as_array)
                .map(|types| {
                    types
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct App<D: DccClient, E: MergeExecutor> {
    store: Store,
    dcc: D,
    executor: E,
    settings: AppSettings,
}

impl<D: DccClient, E: MergeExecutor> App<D, E> {
    pub fn new(store: Store, dcc: D, executor: E, settings: AppSettings) -> Self {
        Self {
            store,
            dcc,
            executor,
            settings,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn dcc(&self) -> &D {
        &self.dcc
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Cached experiment document when fresh enough, otherwise a new fetch.
    pub fn load_experiment(
        &self,
        accession: &ExperimentAccession,
        options: LoadOptions,
    ) -> Result<ExperimentRecord, KiraError> {
        let path = self.store.experiment_json_path(accession.as_str());
        let doc = self.load_cached(&path, &experiment_path(accession.as_str()), options)?;
        ExperimentRecord::from_json(&doc)
    }

    /// Same caching rules as experiments, under `json/biosamples/`.
    pub fn biosample(
        &self,
        accession: &ExperimentAccession,
        options: LoadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BiosampleRecord, KiraError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up biosample {accession}"),
            elapsed: None,
        });
        let path = self.store.biosample_json_path(accession.as_str());
        let doc = self.load_cached(&path, &biosample_path(accession.as_str()), options)?;
        BiosampleRecord::from_json(&doc)
    }

    /// Resolve an alias to the object it names. Never cached.
    pub fn lookup_alias(
        &self,
        alias: &str,
        sink: &dyn ProgressSink,
    ) -> Result<AliasResult, KiraError> {
        if alias.trim().trim_matches('/').is_empty() {
            return Err(KiraError::InvalidAccession(alias.to_string()));
        }
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up alias {}", alias.trim()),
            elapsed: None,
        });
        let doc = self.dcc.get_json(&alias_path(alias), &[]).inspect_err(|err| {
            warn!(alias = alias.trim(), error = %err, "could not load alias");
        })?;
        Ok(AliasResult::from_json(alias.trim(), &doc))
    }

    fn load_cached(
        &self,
        path: &Utf8Path,
        remote_path: &str,
        options: LoadOptions,
    ) -> Result<Value, KiraError> {
        let stale = !self.store.exists(path)
            || options.force
            || (options.refresh && Store::is_older_than_days(path, self.settings.refresh_days));
        if !stale {
            return Store::read_json(path);
        }

        debug!(remote_path, "fetching metadata");
        let doc = self.dcc.get_json(remote_path, &[])?;
        if !options.dry_run {
            let bytes = serde_json::to_vec_pretty(&doc)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            Store::write_bytes_atomic(path, &bytes)?;
        }
        Ok(doc)
    }

    pub fn select(
        &self,
        requests: &[SelectRequest],
        options: SelectOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SelectResult, KiraError> {
        if !options.dry_run {
            self.store.ensure_root()?;
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.jobs)
            .build()
            .map_err(|err| KiraError::WorkerPool(err.to_string()))?;

        let items = pool.install(|| {
            requests
                .par_iter()
                .map(|request| {
                    let assembly = request
                        .assembly
                        .clone()
                        .unwrap_or_else(|| self.settings.assembly.clone());
                    let item = SelectItemResult::new(request, &assembly);
                    match self.select_one(request, &assembly, options, sink, item.clone()) {
                        Ok(item) => item,
                        Err(err) => {
                            warn!(accession = %request.accession, error = %err, "selection failed");
                            item.failed(&err)
                        }
                    }
                })
                .collect::<Vec<_>>()
        });

        Ok(SelectResult { items })
    }

    fn materializer(&self, dry_run: bool, force: bool) -> Box<dyn Materializer + '_> {
        if dry_run {
            Box::new(LocalOnly)
        } else {
            Box::new(DccMaterializer::new(
                &self.dcc,
                self.settings.verify_md5,
                force,
            ))
        }
    }

    fn select_one(
        &self,
        request: &SelectRequest,
        assembly: &str,
        options: SelectOptions,
        sink: &dyn ProgressSink,
        mut item: SelectItemResult,
    ) -> Result<SelectItemResult, KiraError> {
        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} {}", request.accession, request.role),
            elapsed: None,
        });
        let experiment = self.load_experiment(&request.accession, options.load())?;

        let materializer = self.materializer(options.dry_run, options.force);
        let selector = Selector::new(&self.store, materializer.as_ref(), options.process);

        match request.role {
            Role::Alignment => {
                if let Some(alignment) = selector.select_alignment(&experiment)? {
                    item.action = "selected".to_string();
                    item.path = Some(alignment.path.to_string());
                    item.alignment = Some(alignment);
                }
            }
            Role::Signal | Role::Peaks => {
                let selection = if request.role == Role::Signal {
                    selector.select_signal_track(&experiment, assembly)?
                } else {
                    selector.select_peaks(&experiment, assembly)?
                };
                item.path = selection.path().map(|path| path.to_string());
                item.action = match &selection {
                    SelectionResult::None => "none".to_string(),
                    SelectionResult::Single { .. } => "selected".to_string(),
                    SelectionResult::Ambiguous { .. } => {
                        item.status = "ambiguous".to_string();
                        "ambiguous".to_string()
                    }
                    SelectionResult::Merge { plan } => self.process_plan(
                        &experiment,
                        plan,
                        &selector,
                        materializer.as_ref(),
                        options,
                        sink,
                    )?,
                };
                item.selection = Some(selection);
            }
        }

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} {}", request.accession, item.action),
            elapsed: Some(start.elapsed()),
        });
        Ok(item)
    }

    fn process_plan(
        &self,
        experiment: &ExperimentRecord,
        plan: &MergePlan,
        selector: &Selector<'_>,
        materializer: &dyn Materializer,
        options: SelectOptions,
        sink: &dyn ProgressSink,
    ) -> Result<String, KiraError> {
        if plan.already_computed {
            return Ok("already-computed".to_string());
        }
        if !options.process {
            return Ok("planned".to_string());
        }
        if options.dry_run {
            return Ok("would-compute".to_string());
        }

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} merge inputs", plan.inputs.len()),
            elapsed: None,
        });
        for input in &plan.inputs {
            // Fetched by the selector during this request.
            if selector.has_materialized(input) {
                continue;
            }
            let file = experiment
                .files
                .iter()
                .find(|file| &self.store.file_path(file) == input)
                .ok_or_else(|| {
                    KiraError::MetadataParse(format!("no file record for merge input {input}"))
                })?;
            let href = file.href.as_deref().ok_or_else(|| {
                KiraError::MetadataParse(format!("file {} has no download href", file.file_id))
            })?;
            let present = materializer.ensure_materialized(
                input,
                href,
                file.size_bytes,
                file.checksum.as_deref(),
            )?;
            if !present {
                return Err(KiraError::Filesystem(format!(
                    "merge input {input} could not be downloaded"
                )));
            }
        }

        sink.event(ProgressEvent {
            message: format!("phase=Compute; {}", plan.kind),
            elapsed: None,
        });
        let start = Instant::now();
        self.executor.execute(plan)?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; wrote {}", plan.output_path),
            elapsed: Some(start.elapsed()),
        });
        Ok("computed".to_string())
    }

    pub fn download(
        &self,
        accessions: &[ExperimentAccession],
        kinds: &[DownloadKind],
        options: DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, KiraError> {
        if !options.dry_run {
            self.store.ensure_root()?;
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.jobs)
            .build()
            .map_err(|err| KiraError::WorkerPool(err.to_string()))?;

        let items = pool.install(|| {
            accessions
                .par_iter()
                .map(|accession| match self.download_one(accession, kinds, options, sink) {
                    Ok(files) => DownloadItemResult {
                        accession: accession.to_string(),
                        status: if files.iter().any(|file| file.action == "failed") {
                            "error".to_string()
                        } else {
                            "ok".to_string()
                        },
                        files,
                        error: None,
                    },
                    Err(err) => {
                        warn!(%accession, error = %err, "download failed");
                        DownloadItemResult {
                            accession: accession.to_string(),
                            status: "error".to_string(),
                            files: Vec::new(),
                            error: Some(err.to_string()),
                        }
                    }
                })
                .collect::<Vec<_>>()
        });

        Ok(DownloadResult { items })
    }

    fn download_one(
        &self,
        accession: &ExperimentAccession,
        kinds: &[DownloadKind],
        options: DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<DownloadedFile>, KiraError> {
        let experiment = self.load_experiment(
            accession,
            LoadOptions {
                force: options.force,
                refresh: options.refresh,
                dry_run: options.dry_run,
            },
        )?;
        let wanted = experiment
            .files
            .iter()
            .filter(|file| kinds.iter().any(|kind| file.matches_kind(*kind)))
            .collect::<Vec<_>>();
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {accession}: {} files", wanted.len()),
            elapsed: None,
        });

        let materializer = DccMaterializer::new(&self.dcc, self.settings.verify_md5, options.force);
        let mut out = Vec::with_capacity(wanted.len());
        for file in wanted {
            let path = self.store.file_path(file);
            let action = match file.href.as_deref() {
                None => {
                    warn!(%accession, file = %file.file_id, "file has no download href");
                    "no-href"
                }
                Some(href) => {
                    let present = LocalOnly.ensure_materialized(
                        &path,
                        href,
                        file.size_bytes,
                        file.checksum.as_deref(),
                    )?;
                    if present && !options.force {
                        "present"
                    } else if options.dry_run {
                        "would-download"
                    } else if materializer.ensure_materialized(
                        &path,
                        href,
                        file.size_bytes,
                        file.checksum.as_deref(),
                    )? {
                        "downloaded"
                    } else {
                        "failed"
                    }
                }
            };
            out.push(DownloadedFile {
                file_id: file.file_id.clone(),
                path: path.to_string(),
                action: action.to_string(),
            });
        }
        Ok(out)
    }

    pub fn info(
        &self,
        accession: &ExperimentAccession,
        options: LoadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<InfoResult, KiraError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up {accession}"),
            elapsed: None,
        });
        let experiment = self.load_experiment(accession, options)?;
        let files = experiment
            .files
            .iter()
            .map(|file| InfoFile {
                file_id: file.file_id.clone(),
                file_type: file.file_type.clone(),
                output_type: file.output_type.clone(),
                assembly: file.assembly.clone(),
                bio_rep: file.bio_rep.clone(),
                is_pooled: file.is_pooled,
                size_bytes: file.size_bytes,
                local: self.store.exists(&self.store.file_path(file)),
            })
            .collect();

        Ok(InfoResult {
            metadata_path: self
                .store
                .experiment_json_path(accession.as_str())
                .to_string(),
            accession: experiment.accession,
            assay_term_name: experiment.assay_term_name,
            description: experiment.description,
            target: experiment.target,
            label: experiment.label,
            status: experiment.status,
            lab: experiment.lab,
            biosample_term_name: experiment.biosample_term_name,
            biosample_type: experiment.biosample_type,
            age: experiment.age,
            is_paired_end: experiment.is_paired_end,
            files,
        })
    }

    pub fn search(
        &self,
        query: &SearchQuery,
        sink: &dyn ProgressSink,
    ) -> Result<SearchResult, KiraError> {
        let mut params = vec![("type".to_string(), "Experiment".to_string())];
        if let Some(assay) = &query.assay {
            params.push(("assay_term_name".to_string(), assay.clone()));
        }
        if let Some(organism) = &query.organism {
            params.push((
                "replicates.library.biosample.donor.organism.scientific_name".to_string(),
                organism.clone(),
            ));
        }
        if let Some(status) = &query.status {
            params.push(("status".to_string(), status.clone()));
        }
        params.extend(query.terms.iter().cloned());
        params.push(("limit".to_string(), "all".to_string()));

        sink.event(ProgressEvent {
            message: "phase=Resolve; searching experiments".to_string(),
            elapsed: None,
        });
        let start = Instant::now();
        let doc = self.dcc.get_json("/search/", &params)?;
        let accessions = graph_accessions(&doc);
        sink.event(ProgressEvent {
            message: format!("dcc.response count={}", accessions.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(SearchResult {
            count: accessions.len(),
            accessions,
        })
    }
}
