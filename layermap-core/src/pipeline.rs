//! Batch analysis: classify → extract → resolve → apply.
//!
//! [`Analyzer`] owns the extractor registry, the resolver and a cache of
//! the latest findings per path. Each [`update`](Analyzer::update) publishes
//! at most two versions: the batch itself, then the re-resolution of files
//! whose references may bind differently after the batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use layermap_extract::{ArtifactKind, Extractor, ExtractorRegistry, FindingSet, normalize_path};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::LayermapConfig;
use crate::error::{ConfigError, LayermapError, StoreError};
use crate::graph::{Graph, lookup_keys};
use crate::hash;
use crate::persist::{GraphPersistence, open_backend};
use crate::progress::{NoopReporter, ProgressReporter};
use crate::resolve::Resolver;
use crate::store::{GraphStore, validate_diff};
use crate::types::{CancelToken, FileKey, GraphDiff, LookupKey};

/// One input file. `artifact` overrides classification when given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
    pub artifact: Option<ArtifactKind>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            artifact: None,
        }
    }

    #[must_use]
    pub fn with_artifact(mut self, artifact: ArtifactKind) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum FileStatus {
    /// Extracted, resolved and applied.
    Applied,
    /// Same content as the applied version.
    Unchanged,
    /// Not part of the batch, but re-resolved because a definition it
    /// consulted changed.
    Reresolved,
    Removed,
    /// Not analyzed: excluded by pattern or claimed by no extractor.
    Skipped(String),
    /// Analysis produced an unusable contribution.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub artifact: Option<ArtifactKind>,
    pub status: FileStatus,
    pub nodes: usize,
    pub edges: usize,
    /// Parse problems recorded as markers.
    pub issues: usize,
}

impl FileOutcome {
    fn bare(path: &str, artifact: Option<ArtifactKind>, status: FileStatus) -> Self {
        Self {
            path: path.to_string(),
            artifact,
            status,
            nodes: 0,
            edges: 0,
            issues: 0,
        }
    }

    fn from_diff(diff: &GraphDiff, findings: &FindingSet, status: FileStatus) -> Self {
        Self {
            path: diff.path.clone(),
            artifact: Some(findings.artifact),
            status,
            nodes: diff.nodes.len(),
            edges: diff.edges.len(),
            issues: findings.issues.len(),
        }
    }
}

/// Result of one analysis batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Store version after the batch.
    pub version: u64,
    /// Per-file outcomes, ordered by path.
    pub files: Vec<FileOutcome>,
    /// Dependents that could not be re-resolved because their findings are
    /// not cached (e.g. after a load). Re-submit them to bring them current.
    pub needs_reanalysis: Vec<String>,
}

impl AnalysisSummary {
    pub fn count(&self, matches: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| matches(&f.status)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|s| *s == FileStatus::Applied)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Failed(_)))
    }

    pub fn issues(&self) -> usize {
        self.files.iter().map(|f| f.issues).sum()
    }

    pub fn outcome(&self, path: &str) -> Option<&FileOutcome> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Latest findings of one applied file version.
#[derive(Debug, Clone)]
struct Cached {
    file_key: FileKey,
    findings: Arc<FindingSet>,
}

/// A classified file waiting for extraction.
#[derive(Debug)]
struct Prepared {
    path: String,
    content: String,
    file_key: FileKey,
    extractor: Arc<dyn Extractor>,
    /// Already applied; extracted only to refill the cache.
    unchanged: bool,
}

#[derive(Debug)]
struct Extracted {
    file_key: FileKey,
    findings: Arc<FindingSet>,
    unchanged: bool,
}

/// Drives analysis batches against one [`GraphStore`].
pub struct Analyzer {
    config: LayermapConfig,
    registry: ExtractorRegistry,
    resolver: Resolver,
    store: Arc<GraphStore>,
    cache: RwLock<HashMap<String, Cached>>,
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
    reporter: Arc<dyn ProgressReporter>,
    /// Serializes batches so classification sees the version it applies to.
    batch: Mutex<()>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("cached", &self.cache.read().len())
            .finish_non_exhaustive()
    }
}

impl Analyzer {
    pub fn new(config: LayermapConfig) -> Result<Self, LayermapError> {
        Self::with_store(config, Arc::new(GraphStore::new()))
    }

    pub fn with_store(config: LayermapConfig, store: Arc<GraphStore>) -> Result<Self, LayermapError> {
        config.validate()?;
        let compile = |patterns: &[String]| -> Result<Vec<glob::Pattern>, ConfigError> {
            patterns
                .iter()
                .map(|p| {
                    glob::Pattern::new(p)
                        .map_err(|e| ConfigError::Invalid(format!("glob {p:?}: {e}")))
                })
                .collect()
        };
        Ok(Self {
            registry: ExtractorRegistry::with_options(config.extraction.confidence),
            resolver: Resolver::new(&config.resolver),
            include: compile(&config.extraction.include_patterns)?,
            exclude: compile(&config.extraction.exclude_patterns)?,
            config,
            store,
            cache: RwLock::new(HashMap::new()),
            reporter: Arc::new(NoopReporter),
            batch: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &LayermapConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<Graph> {
        self.store.snapshot()
    }

    /// Analyze changed files and drop removed ones.
    #[instrument(skip_all, name = "update", fields(files = files.len(), removed = removed.len()))]
    pub fn update(
        &self,
        files: Vec<SourceFile>,
        removed: &[String],
        cancel: &CancelToken,
    ) -> Result<AnalysisSummary, LayermapError> {
        let _batch = self.batch.lock();
        let started_at = Utc::now();
        let base = self.store.snapshot();
        let mut outcomes = Vec::new();

        let submitted: BTreeSet<String> = files.iter().map(|f| normalize_path(&f.path)).collect();
        let removed: Vec<String> = removed
            .iter()
            .map(|p| normalize_path(p))
            .filter(|p| !submitted.contains(p) && base.file_key(p).is_some())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let prepared = self.classify(files, Some(&base), &mut outcomes);
        let extracted = self.extract(prepared, cancel)?;

        let (changed, refreshed): (Vec<Extracted>, Vec<Extracted>) =
            extracted.into_iter().partition(|e| !e.unchanged);
        for file in &refreshed {
            outcomes.push(FileOutcome::bare(
                &file.findings.path,
                Some(file.findings.artifact),
                FileStatus::Unchanged,
            ));
        }

        let definitions: Vec<GraphDiff> = changed
            .iter()
            .map(|e| self.resolver.definitions(e.file_key.clone(), &e.findings))
            .collect();
        let staged = self.store.stage(&definitions, &removed, false);
        let (diffs, applied) = self.resolve(&changed, &staged, cancel, &mut outcomes)?;

        let changed_keys = changed_lookup_keys(&base, &diffs, &removed);
        let graph = self
            .store
            .apply_changes(diffs, &removed, cancel)
            .map_err(store_error)?;
        {
            let mut cache = self.cache.write();
            for path in &removed {
                cache.remove(path);
            }
            for file in applied.into_iter().chain(refreshed) {
                cache.insert(
                    file.findings.path.clone(),
                    Cached {
                        file_key: file.file_key,
                        findings: file.findings,
                    },
                );
            }
        }
        outcomes.extend(
            removed
                .iter()
                .map(|p| FileOutcome::bare(p, None, FileStatus::Removed)),
        );

        let batch_paths: BTreeSet<String> = outcomes.iter().map(|o| o.path.clone()).collect();
        let (graph, needs_reanalysis) =
            self.reresolve_dependents(graph, &changed_keys, &batch_paths, cancel, &mut outcomes);

        Ok(self.finish(started_at, graph.version(), outcomes, needs_reanalysis))
    }

    /// Replace the whole graph with the analysis of `files`.
    #[instrument(skip_all, name = "rebuild", fields(files = files.len()))]
    pub fn rebuild(
        &self,
        files: Vec<SourceFile>,
        cancel: &CancelToken,
    ) -> Result<AnalysisSummary, LayermapError> {
        let _batch = self.batch.lock();
        let started_at = Utc::now();
        let mut outcomes = Vec::new();

        let prepared = self.classify(files, None, &mut outcomes);
        let extracted = self.extract(prepared, cancel)?;
        let definitions: Vec<GraphDiff> = extracted
            .iter()
            .map(|e| self.resolver.definitions(e.file_key.clone(), &e.findings))
            .collect();
        let staged = self.store.stage(&definitions, &[], true);
        let (diffs, applied) = self.resolve(&extracted, &staged, cancel, &mut outcomes)?;

        let graph = self.store.full_rebuild(diffs, cancel).map_err(store_error)?;
        *self.cache.write() = applied
            .into_iter()
            .map(|file| {
                (
                    file.findings.path.clone(),
                    Cached {
                        file_key: file.file_key,
                        findings: file.findings,
                    },
                )
            })
            .collect();

        Ok(self.finish(started_at, graph.version(), outcomes, Vec::new()))
    }

    /// Save the current graph to the configured backend under `root`.
    pub fn save(&self, root: &Path) -> Result<(), LayermapError> {
        self.save_to(open_backend(root, &self.config.persistence).as_ref())
    }

    pub fn save_to(&self, backend: &dyn GraphPersistence) -> Result<(), LayermapError> {
        let doc = self.store.document().stamped();
        backend.save(&doc)?;
        info!(
            version = doc.version,
            nodes = doc.nodes.len(),
            edges = doc.edges.len(),
            "Saved graph"
        );
        Ok(())
    }

    /// Load the configured backend under `root` into the store.
    pub fn load(&self, root: &Path) -> Result<Arc<Graph>, LayermapError> {
        self.load_from(open_backend(root, &self.config.persistence).as_ref())
    }

    /// Replace the store's state with a saved document. Cached findings
    /// are dropped; later batches re-extract what they need.
    pub fn load_from(&self, backend: &dyn GraphPersistence) -> Result<Arc<Graph>, LayermapError> {
        let _batch = self.batch.lock();
        let doc = backend.load()?;
        let graph = self.store.restore(&doc)?;
        self.cache.write().clear();
        Ok(graph)
    }

    // ── Stages ─────────────────────────────────────────────────────

    /// Pick an extractor for every admitted file. With a `base`, files
    /// whose key is already applied and cached are reported unchanged.
    fn classify(
        &self,
        files: Vec<SourceFile>,
        base: Option<&Graph>,
        outcomes: &mut Vec<FileOutcome>,
    ) -> Vec<Prepared> {
        // Last submission of a path wins.
        let mut by_path: BTreeMap<String, SourceFile> = BTreeMap::new();
        for file in files {
            by_path.insert(normalize_path(&file.path), file);
        }

        let cache = self.cache.read();
        let mut prepared = Vec::new();
        for (path, file) in by_path {
            if !self.admits(&path) {
                outcomes.push(FileOutcome::bare(
                    &path,
                    file.artifact,
                    FileStatus::Skipped("excluded by pattern".into()),
                ));
                continue;
            }
            let artifact = file
                .artifact
                .or_else(|| self.registry.classify(&path, &file.content));
            let Some(extractor) = artifact.and_then(|a| self.registry.get(a)) else {
                debug!(path = %path, "No extractor claims file");
                outcomes.push(FileOutcome::bare(
                    &path,
                    artifact,
                    FileStatus::Skipped("no extractor claims the file".into()),
                ));
                continue;
            };

            let file_key = hash::file_key(&path, &file.content);
            let applied = base.is_some_and(|g| g.file_key(&path) == Some(&file_key));
            if applied && cache.get(&path).is_some_and(|c| c.file_key == file_key) {
                outcomes.push(FileOutcome::bare(&path, artifact, FileStatus::Unchanged));
                continue;
            }
            prepared.push(Prepared {
                path,
                content: file.content,
                file_key,
                extractor,
                unchanged: applied,
            });
        }
        prepared
    }

    fn admits(&self, path: &str) -> bool {
        (self.include.is_empty() || self.include.iter().any(|p| p.matches(path)))
            && !self.exclude.iter().any(|p| p.matches(path))
    }

    /// Run extractors in parallel. Extraction is pure, so cancelling here
    /// leaves nothing to undo.
    fn extract(
        &self,
        prepared: Vec<Prepared>,
        cancel: &CancelToken,
    ) -> Result<Vec<Extracted>, LayermapError> {
        self.reporter.start("Extracting", Some(count(prepared.len())));
        let extracted: Vec<Option<Extracted>> = prepared
            .into_par_iter()
            .map(|file| {
                if cancel.is_cancelled() {
                    return None;
                }
                let findings = file.extractor.extract(&file.content, &file.path);
                self.reporter.advance(1);
                Some(Extracted {
                    file_key: file.file_key,
                    findings: Arc::new(findings),
                    unchanged: file.unchanged,
                })
            })
            .collect();
        self.reporter.finish();
        if cancel.is_cancelled() {
            info!("Batch cancelled during extraction");
            return Err(LayermapError::Cancelled);
        }
        Ok(extracted.into_iter().flatten().collect())
    }

    /// Resolve every file against `graph` in parallel. Returns the valid
    /// diffs and the files they came from; invalid ones become failures.
    fn resolve(
        &self,
        files: &[Extracted],
        graph: &Graph,
        cancel: &CancelToken,
        outcomes: &mut Vec<FileOutcome>,
    ) -> Result<(Vec<GraphDiff>, Vec<Extracted>), LayermapError> {
        self.reporter.start("Resolving", Some(count(files.len())));
        let resolved: Vec<Option<GraphDiff>> = files
            .par_iter()
            .map(|file| {
                if cancel.is_cancelled() {
                    return None;
                }
                let diff = self
                    .resolver
                    .resolve(file.file_key.clone(), &file.findings, graph);
                self.reporter.advance(1);
                Some(diff)
            })
            .collect();
        self.reporter.finish();
        if cancel.is_cancelled() {
            info!("Batch cancelled during resolution");
            return Err(LayermapError::Cancelled);
        }

        let mut diffs = Vec::new();
        let mut applied = Vec::new();
        for (file, diff) in files.iter().zip(resolved.into_iter().flatten()) {
            match validate_diff(&diff) {
                Ok(()) => {
                    outcomes.push(FileOutcome::from_diff(&diff, &file.findings, FileStatus::Applied));
                    diffs.push(diff);
                    applied.push(Extracted {
                        file_key: file.file_key.clone(),
                        findings: Arc::clone(&file.findings),
                        unchanged: false,
                    });
                }
                Err(e) => {
                    warn!(path = %diff.path, error = %e, "Dropping invalid contribution");
                    outcomes.push(FileOutcome::bare(
                        &diff.path,
                        Some(file.findings.artifact),
                        FileStatus::Failed(e.to_string()),
                    ));
                }
            }
        }
        Ok((diffs, applied))
    }

    /// Re-resolve files outside the batch whose lookups intersect
    /// `changed_keys`, and apply them as a second version. A cancelled or
    /// failed second pass leaves the dependents for the caller to resubmit.
    fn reresolve_dependents(
        &self,
        graph: Arc<Graph>,
        changed_keys: &BTreeSet<LookupKey>,
        batch_paths: &BTreeSet<String>,
        cancel: &CancelToken,
        outcomes: &mut Vec<FileOutcome>,
    ) -> (Arc<Graph>, Vec<String>) {
        let dependents: BTreeSet<String> = graph
            .dependents_of(changed_keys)
            .map(|p| p.path.clone())
            .filter(|p| !batch_paths.contains(p))
            .collect();
        if dependents.is_empty() {
            return (graph, Vec::new());
        }

        let mut needs_reanalysis = Vec::new();
        let mut cached = Vec::new();
        {
            let cache = self.cache.read();
            for path in dependents {
                match cache.get(&path) {
                    Some(c) if graph.file_key(&path) == Some(&c.file_key) => {
                        cached.push(Extracted {
                            file_key: c.file_key.clone(),
                            findings: Arc::clone(&c.findings),
                            unchanged: false,
                        });
                    }
                    _ => needs_reanalysis.push(path),
                }
            }
        }
        debug!(
            dependents = cached.len(),
            uncached = needs_reanalysis.len(),
            "Re-resolving dependents"
        );

        let mut second = Vec::new();
        let resolved = self.resolve(&cached, &graph, cancel, &mut second);
        let applied = resolved.and_then(|(diffs, _)| {
            self.store
                .apply_changes(diffs, &[], cancel)
                .map_err(store_error)
        });
        match applied {
            Ok(next) => {
                outcomes.extend(second.into_iter().map(|mut o| {
                    if o.status == FileStatus::Applied {
                        o.status = FileStatus::Reresolved;
                    }
                    o
                }));
                (next, needs_reanalysis)
            }
            Err(e) => {
                warn!(error = %e, "Dependent re-resolution abandoned");
                needs_reanalysis.extend(cached.into_iter().map(|c| c.findings.path.clone()));
                needs_reanalysis.sort();
                (graph, needs_reanalysis)
            }
        }
    }

    fn finish(
        &self,
        started_at: DateTime<Utc>,
        version: u64,
        mut files: Vec<FileOutcome>,
        needs_reanalysis: Vec<String>,
    ) -> AnalysisSummary {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let summary = AnalysisSummary {
            started_at,
            finished_at: Utc::now(),
            version,
            files,
            needs_reanalysis,
        };
        info!(
            version,
            applied = summary.applied(),
            reresolved = summary.count(|s| *s == FileStatus::Reresolved),
            unchanged = summary.count(|s| *s == FileStatus::Unchanged),
            failed = summary.failed(),
            issues = summary.issues(),
            "Analysis complete"
        );
        if !summary.needs_reanalysis.is_empty() {
            self.reporter.message(&format!(
                "{} dependent file(s) need re-analysis",
                summary.needs_reanalysis.len()
            ));
        }
        summary
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn store_error(e: StoreError) -> LayermapError {
    match e {
        StoreError::Cancelled => LayermapError::Cancelled,
        other => other.into(),
    }
}

/// Lookup keys of every definition the batch adds, replaces or drops.
fn changed_lookup_keys(base: &Graph, diffs: &[GraphDiff], removed: &[String]) -> BTreeSet<LookupKey> {
    let mut keys = BTreeSet::new();
    for diff in diffs {
        for node in diff.nodes.iter().filter(|n| n.is_concrete()) {
            keys.extend(lookup_keys(node));
        }
    }
    let touched = diffs.iter().map(|d| d.path.as_str()).chain(removed.iter().map(String::as_str));
    for path in touched {
        let previous = base.file_key(path).and_then(|k| base.provenance_of(k));
        for id in previous.into_iter().flat_map(|p| &p.node_ids) {
            if let Some(node) = base.node(*id) {
                keys.extend(lookup_keys(node));
            }
        }
    }
    keys
}
