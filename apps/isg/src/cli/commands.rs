//! # CLI Command Implementations
//!
//! Every command restores the engine from the redb store, runs, and saves the
//! engine back when it changed the graph.

use super::{Cli, QueryCommand};
use isg_core::{
    BlastRadius, ChangeSet, Checksum, Engine, EngineConfig, EntityId, EntityRef, FileBatch, FileEvent,
    FileUpdate, ImpactDirection, IsgError, Query, QueryOutput, QueryType, RedbSnapshotStore,
    RestoreOutcome, Snapshot, Suggestion, UpdateReport, canonical_checksum,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a batch or checksum file (100 MB).
const MAX_INPUT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), IsgError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| IsgError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(IsgError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, IsgError> {
    let canonical = path.canonicalize().map_err(|e| {
        IsgError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(IsgError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path: the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, IsgError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        IsgError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(IsgError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| IsgError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn read_input(path: &Path, max_size: u64) -> Result<Vec<u8>, IsgError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, max_size)?;
    std::fs::read(&validated)
        .map_err(|e| IsgError::IoError(format!("Read {}: {}", validated.display(), e)))
}

// =============================================================================
// INPUT FORMATS
// =============================================================================

/// One entry of a batch file: a parsed file, or a failure when `error` is set.
#[derive(Debug, Deserialize)]
struct BatchEntry {
    #[serde(flatten)]
    batch: FileBatch,
    #[serde(default)]
    error: Option<String>,
}

impl From<BatchEntry> for FileUpdate {
    fn from(entry: BatchEntry) -> Self {
        match entry.error {
            Some(reason) => FileUpdate::Failed {
                path: entry.batch.path,
                reason,
            },
            None => FileUpdate::Parsed(entry.batch),
        }
    }
}

/// Parse a JSON array of file batches.
pub fn parse_batches(bytes: &[u8]) -> Result<Vec<FileUpdate>, IsgError> {
    let entries: Vec<BatchEntry> = serde_json::from_slice(bytes)
        .map_err(|e| IsgError::SerializationError(format!("Invalid batch file: {}", e)))?;
    Ok(entries.into_iter().map(FileUpdate::from).collect())
}

/// Parse a JSON object mapping file paths to checksums.
pub fn parse_checksums(bytes: &[u8]) -> Result<BTreeMap<String, Checksum>, IsgError> {
    serde_json::from_slice(bytes)
        .map_err(|e| IsgError::SerializationError(format!("Invalid checksum file: {}", e)))
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Global options shared by every command.
#[derive(Debug)]
pub struct Context {
    pub database: PathBuf,
    pub config: EngineConfig,
    pub json_mode: bool,
    pub verbose: bool,
}

impl Context {
    /// Resolve the configuration from `--config` or `$ISG_CONFIG`.
    pub fn new(cli: &Cli) -> Result<Self, IsgError> {
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var_os("ISG_CONFIG").map(PathBuf::from));
        let config = match config_path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                EngineConfig::load(&path)?
            }
            None => EngineConfig::default(),
        };
        Ok(Self {
            database: cli.database.clone(),
            config,
            json_mode: cli.json_mode,
            verbose: cli.verbose,
        })
    }

    /// Restore the engine from the store; an unusable snapshot starts empty.
    pub fn open(&self) -> Result<(Engine, RedbSnapshotStore), IsgError> {
        let store = RedbSnapshotStore::open(&self.database)?;
        let (engine, outcome) = Engine::restore(&store, self.config.clone())?;
        match outcome {
            RestoreOutcome::Restored { version } => {
                tracing::debug!(version, "engine restored");
            }
            RestoreOutcome::Empty => tracing::debug!("store is empty"),
            RestoreOutcome::RebuildRequired { reason } => {
                tracing::warn!(%reason, "stored snapshot unusable; re-ingest all files");
            }
        }
        Ok((engine, store))
    }
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

// =============================================================================
// INGEST / UPDATE / REMOVE COMMANDS
// =============================================================================

/// Ingest batches from a JSON file.
pub fn cmd_ingest(ctx: &Context, file: &Path) -> Result<(), IsgError> {
    tracing::info!("Ingesting from {:?}", file);

    let updates = parse_batches(&read_input(file, MAX_INPUT_FILE_SIZE)?)?;
    let (engine, store) = ctx.open()?;
    let report = engine.ingest(&updates);
    engine.save(&store)?;

    print_report(ctx, &engine, None, &report);
    Ok(())
}

/// Detect changes and apply the supplied batches.
pub fn cmd_update(ctx: &Context, file: &Path, checksums: Option<&Path>) -> Result<(), IsgError> {
    let updates = parse_batches(&read_input(file, MAX_INPUT_FILE_SIZE)?)?;
    let (engine, store) = ctx.open()?;

    let (changes, report) = match checksums {
        Some(path) => {
            let current = parse_checksums(&read_input(path, MAX_INPUT_FILE_SIZE)?)?;
            let changes = engine.detect_changes(&current);
            let report = engine.apply_changes(&changes, &updates);
            (changes, report)
        }
        None => {
            // Failed entries raise no event; the updater still reports them.
            let events: Vec<_> = updates
                .iter()
                .filter_map(|update| match update {
                    FileUpdate::Parsed(batch) => Some(FileEvent::changed(
                        batch.path.clone(),
                        batch.checksum,
                    )),
                    FileUpdate::Failed { .. } => None,
                })
                .collect();
            engine.update(&events, &updates)
        }
    };
    engine.save(&store)?;

    print_report(ctx, &engine, Some(&changes), &report);
    Ok(())
}

/// Show the change set against the stored checksums.
pub fn cmd_changes(ctx: &Context, checksums: &Path) -> Result<(), IsgError> {
    let current = parse_checksums(&read_input(checksums, MAX_INPUT_FILE_SIZE)?)?;
    let (engine, _) = ctx.open()?;
    let changes = engine.detect_changes(&current);

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "version": engine.version(),
            "changes": changes,
        }));
        return Ok(());
    }

    print_changes(&changes);
    Ok(())
}

/// Remove files from the graph.
pub fn cmd_remove(ctx: &Context, paths: &[String]) -> Result<(), IsgError> {
    let (engine, store) = ctx.open()?;
    let report = engine.remove_files(paths);
    engine.save(&store)?;

    print_report(ctx, &engine, None, &report);
    Ok(())
}

fn print_changes(changes: &ChangeSet) {
    let sections = [
        ("new", &changes.new),
        ("modified", &changes.modified),
        ("deleted", &changes.deleted),
        ("unchanged", &changes.unchanged),
        ("invalid", &changes.invalid),
    ];
    for (label, paths) in sections {
        println!("{:<10} {}", format!("{}:", label), paths.len());
        for path in paths {
            if label != "unchanged" {
                println!("  {}", path);
            }
        }
    }
}

fn print_report(ctx: &Context, engine: &Engine, changes: Option<&ChangeSet>, report: &UpdateReport) {
    if ctx.json_mode {
        print_json(&serde_json::json!({
            "version": engine.version(),
            "changes": changes,
            "report": report,
        }));
        return;
    }

    if let Some(changes) = changes {
        print_changes(changes);
        println!();
    }
    println!(
        "Files:    {} ingested, {} removed, {} unchanged, {} failed",
        report.files_ingested, report.files_removed, report.files_unchanged, report.files_failed
    );
    println!(
        "Entities: {} inserted, {} removed, {} replaced",
        report.entities_inserted, report.entities_removed, report.entities_replaced
    );
    println!("Version:  {}", engine.version());
    if !report.warnings.is_empty() {
        println!("Warnings: {}", report.warnings.len());
        let shown = if ctx.verbose { report.warnings.len() } else { 10 };
        for warning in report.warnings.iter().take(shown) {
            println!("  - {}", warning);
        }
        if report.warnings.len() > shown {
            println!("  ... {} more (use --verbose)", report.warnings.len() - shown);
        }
    }
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show graph status.
pub fn cmd_status(ctx: &Context) -> Result<(), IsgError> {
    let (engine, _) = ctx.open()?;
    let stats = engine.stats();

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "database": ctx.database.to_string_lossy(),
            "stats": stats,
        }));
        return Ok(());
    }

    println!("ISG Status");
    println!("==========");
    println!("Database:        {:?}", ctx.database);
    println!("Version:         {}", stats.version);
    println!();
    println!("Files:           {}", stats.files);
    println!("Entities:        {}", stats.entities);
    println!("External stubs:  {}", stats.external_stubs);
    println!("Edges:           {}", stats.edges);
    println!("Low confidence:  {}", stats.low_confidence_edges);
    println!("Pooled strings:  {}", stats.interned_strings);
    if ctx.verbose {
        println!();
        for (kind, count) in &stats.entities_by_kind {
            println!("  {:<14} {}", kind, count);
        }
        for (kind, count) in &stats.edges_by_kind {
            println!("  {:<14} {}", kind, count);
        }
    }

    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Translate the query subcommand into a structured query.
pub fn build_query(kind: &QueryCommand, include_low_confidence: bool) -> Query {
    let query = match kind {
        QueryCommand::Callers { target } => Query::callers(EntityRef::parse(target)),
        QueryCommand::Callees { target } => Query::callees(EntityRef::parse(target)),
        QueryCommand::Users { target } => Query::users(EntityRef::parse(target)),
        QueryCommand::Implements { target } => Query::what_implements(EntityRef::parse(target)),
        QueryCommand::Blast {
            target,
            depth,
            timeout_ms,
            downstream,
        } => {
            let query_type = QueryType::BlastRadius {
                target: EntityRef::parse(target),
                max_depth: *depth,
                direction: if *downstream {
                    ImpactDirection::Downstream
                } else {
                    ImpactDirection::Upstream
                },
            };
            match timeout_ms {
                Some(ms) => Query::with_timeout(query_type, *ms),
                None => Query::new(query_type),
            }
        }
        QueryCommand::Cycles { target: Some(target) } => Query::cycles(EntityRef::parse(target)),
        QueryCommand::Cycles { target: None } => Query::new(QueryType::FindAllCycles),
        QueryCommand::Find { fragment, limit } => Query::search(fragment.clone(), *limit),
        QueryCommand::Lookup { name } => Query::lookup(name.clone()),
    };
    if include_low_confidence {
        query.low_confidence()
    } else {
        query
    }
}

/// Execute a query.
pub fn cmd_query(
    ctx: &Context,
    kind: &QueryCommand,
    include_low_confidence: bool,
) -> Result<(), IsgError> {
    let (engine, _) = ctx.open()?;
    let query = build_query(kind, include_low_confidence);
    tracing::debug!(?query, "executing query");

    let snapshot = engine.snapshot();
    let output = snapshot.query(engine.query_config()).execute(&query)?;

    if ctx.json_mode {
        print_json(&output_json(&snapshot, &output));
        return Ok(());
    }

    match &output {
        QueryOutput::Entities(ids) => print_entities(&snapshot, ids),
        QueryOutput::Matches(found) => print_suggestions(found),
        QueryOutput::Impact(radius) => print_impact(&snapshot, radius),
        QueryOutput::Cycles(cycles) => {
            if cycles.is_empty() {
                println!("No cycles");
            }
            for (i, cycle) in cycles.iter().enumerate() {
                println!("Cycle {} ({} entities):", i + 1, cycle.len());
                for id in cycle {
                    println!("  {}", describe(&snapshot, *id));
                }
            }
        }
    }
    Ok(())
}

fn describe(snapshot: &Snapshot, id: EntityId) -> String {
    snapshot
        .describe(id)
        .map_or_else(|| format!("id:{}", id), |s| s.to_string())
}

fn print_entities(snapshot: &Snapshot, ids: &[EntityId]) {
    if ids.is_empty() {
        println!("No results");
    }
    for id in ids {
        println!("{}", describe(snapshot, *id));
    }
}

fn print_suggestions(found: &[Suggestion]) {
    if found.is_empty() {
        println!("No matches");
    }
    for suggestion in found {
        println!("{}", suggestion);
    }
}

fn print_impact(snapshot: &Snapshot, radius: &BlastRadius) {
    println!(
        "Blast radius of {} ({}): {} affected",
        describe(snapshot, radius.origin),
        radius.direction,
        radius.affected()
    );
    for depth in 1..=radius.reached_depth() {
        let ids = radius.at_depth(depth);
        let severity = radius
            .severity(ids.first().copied().unwrap_or(radius.origin))
            .map_or("", |s| s.as_str());
        println!("Depth {} ({}):", depth, severity);
        for id in ids {
            println!("  {}", describe(snapshot, id));
        }
    }
    if radius.truncated {
        println!("(truncated: timeout reached)");
    }
}

fn output_json(snapshot: &Snapshot, output: &QueryOutput) -> serde_json::Value {
    let described = |ids: &[EntityId]| -> Vec<Option<Suggestion>> {
        ids.iter().map(|id| snapshot.describe(*id)).collect()
    };
    match output {
        QueryOutput::Entities(ids) => serde_json::json!({ "results": described(ids) }),
        QueryOutput::Matches(found) => serde_json::json!({ "results": found }),
        QueryOutput::Cycles(cycles) => serde_json::json!({
            "cycles": cycles.iter().map(|c| described(c)).collect::<Vec<_>>(),
        }),
        QueryOutput::Impact(radius) => {
            let affected: Vec<_> = radius
                .depths
                .iter()
                .map(|(id, depth)| {
                    serde_json::json!({
                        "entity": snapshot.describe(*id),
                        "depth": depth,
                        "severity": radius.severity(*id).map(|s| s.as_str()),
                    })
                })
                .collect();
            serde_json::json!({
                "origin": snapshot.describe(radius.origin),
                "direction": radius.direction,
                "truncated": radius.truncated,
                "affected": affected,
            })
        }
    }
}

// =============================================================================
// EXPORT / IMPORT / HASH COMMANDS
// =============================================================================

/// Export the graph in canonical format.
pub fn cmd_export(ctx: &Context, output: &Path) -> Result<(), IsgError> {
    let (engine, _) = ctx.open()?;
    let validated_path = validate_output_path(output)?;

    let bytes = engine.export()?;
    std::fs::write(&validated_path, &bytes)
        .map_err(|e| IsgError::IoError(format!("Write {}: {}", validated_path.display(), e)))?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "output": validated_path.to_string_lossy(),
            "bytes": bytes.len(),
            "version": engine.version(),
        }));
    } else {
        println!("Exported {} bytes to {:?}", bytes.len(), validated_path);
    }
    Ok(())
}

/// Replace the stored graph with a canonical snapshot file.
pub fn cmd_import(ctx: &Context, input: &Path) -> Result<(), IsgError> {
    let bytes = read_input(input, ctx.config.ingest.max_snapshot_bytes)?;
    let (engine, store) = ctx.open()?;
    engine.load(&bytes)?;
    engine.save(&store)?;

    let stats = engine.stats();
    if ctx.json_mode {
        print_json(&serde_json::json!({ "stats": stats }));
    } else {
        println!(
            "Imported {} files, {} entities, {} edges (version {})",
            stats.files, stats.entities, stats.edges, stats.version
        );
    }
    Ok(())
}

/// Print the BLAKE3 checksum of the canonical graph.
pub fn cmd_hash(ctx: &Context) -> Result<(), IsgError> {
    let (engine, _) = ctx.open()?;
    let hash = canonical_checksum(engine.snapshot().graph())?;
    let hex: String = hash.iter().map(|b| format!("{:02x}", b)).collect();

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "version": engine.version(),
            "blake3": hex,
        }));
    } else {
        println!("{}", hex);
    }
    Ok(())
}
