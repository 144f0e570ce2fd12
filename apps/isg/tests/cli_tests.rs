//! Integration tests for the isg CLI.
//!
//! Commands run in-process against a temporary redb store; results are
//! checked by restoring the engine from that store.

#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use isg::cli::{Cli, Commands, QueryCommand, build_query, execute, parse_batches, parse_checksums};
use isg_core::{
    Checksum, Engine, EngineConfig, EntityRef, FileUpdate, ImpactDirection, QueryType,
    RedbSnapshotStore, RestoreOutcome,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

const BATCHES: &str = r#"[
  {
    "path": "src/handler.rs",
    "checksum": 1,
    "entities": [
      { "name": "handle", "qualified_name": "handler::handle", "kind": "fn", "line_start": 3 }
    ],
    "relationships": [
      { "source": "handle", "kind": "calls", "target": "parser::parse" }
    ]
  },
  {
    "path": "src/parser.rs",
    "checksum": 2,
    "entities": [
      { "name": "parse", "qualified_name": "parser::parse", "kind": "fn", "line_start": 1 },
      { "name": "Token", "qualified_name": "parser::Token", "kind": "struct", "line_start": 9 }
    ],
    "relationships": [
      { "source": "parse", "kind": "uses", "target": "Token" }
    ]
  }
]"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("isg.redb")
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn run(&self, args: &[&str]) -> Result<(), isg_core::IsgError> {
        let db = self.db();
        let mut argv = vec!["isg", "--quiet", "-D", db.to_str().unwrap()];
        argv.extend_from_slice(args);
        execute(Cli::parse_from(argv))
    }

    fn engine(&self) -> (Engine, RestoreOutcome) {
        let store = RedbSnapshotStore::open(self.db()).unwrap();
        Engine::restore(&store, EngineConfig::default()).unwrap()
    }
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

// =============================================================================
// INPUT PARSING
// =============================================================================

#[test]
fn batches_parse_with_failures() {
    let json = r#"[
      { "path": "src/a.rs", "checksum": 5, "entities": [ { "name": "a", "kind": "fn", "line_start": 1 } ] },
      { "path": "src/b.rs", "error": "unexpected token" }
    ]"#;
    let updates = parse_batches(json.as_bytes()).unwrap();

    assert_eq!(updates.len(), 2);
    assert!(matches!(&updates[0], FileUpdate::Parsed(batch) if batch.checksum == Checksum(5)));
    assert!(matches!(&updates[1], FileUpdate::Failed { reason, .. } if reason == "unexpected token"));
}

#[test]
fn invalid_json_is_a_serialization_error() {
    let err = parse_batches(b"{ not json").unwrap_err();
    assert!(matches!(err, isg_core::IsgError::SerializationError(_)));
}

#[test]
fn checksums_parse() {
    let map = parse_checksums(br#"{ "src/a.rs": 7, "src/b.rs": 9 }"#).unwrap();
    assert_eq!(map.get("src/a.rs"), Some(&Checksum(7)));
    assert_eq!(map.len(), 2);
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn blast_query_arguments() {
    let cli = Cli::parse_from([
        "isg",
        "query",
        "blast",
        "parser::Token",
        "--depth",
        "2",
        "--downstream",
        "--timeout-ms",
        "50",
        "--include-low-confidence",
    ]);
    let Some(Commands::Query {
        include_low_confidence,
        kind,
    }) = cli.command
    else {
        panic!("expected query command");
    };
    let query = build_query(&kind, include_low_confidence);

    assert!(query.include_low_confidence);
    assert_eq!(query.timeout_ms, Some(50));
    assert_eq!(
        query.query_type,
        QueryType::BlastRadius {
            target: EntityRef::Name("parser::Token".to_string()),
            max_depth: Some(2),
            direction: ImpactDirection::Downstream,
        }
    );
}

#[test]
fn cycles_without_target_covers_all() {
    let query = build_query(&QueryCommand::Cycles { target: None }, false);
    assert_eq!(query.query_type, QueryType::FindAllCycles);
}

#[test]
fn global_flags() {
    let cli = Cli::parse_from(["isg", "--json-mode", "-D", "other.redb", "status"]);
    assert!(cli.json_mode);
    assert_eq!(cli.database, PathBuf::from("other.redb"));
    assert!(matches!(cli.command, Some(Commands::Status)));
}

// =============================================================================
// COMMANDS
// =============================================================================

#[test]
fn ingest_persists_graph() {
    let ws = Workspace::new();
    let batches = ws.write("batches.json", BATCHES);
    ws.run(&["ingest", "-f", arg(&batches)]).unwrap();

    let (engine, outcome) = ws.engine();
    assert_eq!(outcome, RestoreOutcome::Restored { version: 1 });
    assert_eq!(engine.stats().files, 2);
    assert_eq!(engine.stats().entities, 3);
    assert_eq!(engine.stats().external_stubs, 0);
}

#[test]
fn queries_run_against_store() {
    let ws = Workspace::new();
    let batches = ws.write("batches.json", BATCHES);
    ws.run(&["ingest", "-f", arg(&batches)]).unwrap();

    ws.run(&["query", "callers", "parser::parse"]).unwrap();
    ws.run(&["--json-mode", "query", "blast", "Token", "--depth", "2"]).unwrap();
    ws.run(&["query", "cycles"]).unwrap();
    ws.run(&["query", "find", "pars"]).unwrap();
    ws.run(&["query", "lookup", "handle"]).unwrap();

    let err = ws.run(&["query", "callers", "nope"]).unwrap_err();
    assert!(matches!(err, isg_core::IsgError::EntityNotFound { .. }));
}

#[test]
fn update_with_checksums_removes_missing_files() {
    let ws = Workspace::new();
    let batches = ws.write("batches.json", BATCHES);
    ws.run(&["ingest", "-f", arg(&batches)]).unwrap();

    let changed = ws.write(
        "changed.json",
        r#"[{ "path": "src/handler.rs", "checksum": 3,
              "entities": [ { "name": "serve", "kind": "fn", "line_start": 1 } ] }]"#,
    );
    let current = ws.write("current.json", r#"{ "src/handler.rs": 3 }"#);
    ws.run(&["changes", "--checksums", arg(&current)]).unwrap();
    ws.run(&[
        "update",
        "-f",
        arg(&changed),
        "--checksums",
        arg(&current),
    ])
    .unwrap();

    let (engine, _) = ws.engine();
    let snapshot = engine.snapshot();
    assert_eq!(engine.version(), 2);
    assert_eq!(snapshot.by_name("serve").len(), 1);
    assert!(snapshot.by_name("handle").is_empty());
    assert!(snapshot.by_file_path("src/parser.rs").is_empty());
}

#[test]
fn failed_parse_keeps_previous_contribution() {
    let ws = Workspace::new();
    let batches = ws.write("batches.json", BATCHES);
    ws.run(&["ingest", "-f", arg(&batches)]).unwrap();

    let failed = ws.write(
        "failed.json",
        r#"[{ "path": "src/parser.rs", "checksum": 4, "error": "syntax error" }]"#,
    );
    let current = ws.write(
        "current.json",
        r#"{ "src/handler.rs": 1, "src/parser.rs": 4 }"#,
    );
    ws.run(&["update", "-f", arg(&failed), "--checksums", arg(&current)])
        .unwrap();

    let (engine, _) = ws.engine();
    assert_eq!(engine.snapshot().by_qualified_name("parser::parse").len(), 1);
}

#[test]
fn failed_parse_without_checksums_keeps_previous_contribution() {
    let ws = Workspace::new();
    let batches = ws.write("batches.json", BATCHES);
    ws.run(&["ingest", "-f", arg(&batches)]).unwrap();

    let failed = ws.write(
        "failed.json",
        r#"[{ "path": "src/parser.rs", "error": "syntax error" }]"#,
    );
    ws.run(&["update", "-f", arg(&failed)]).unwrap();

    let (engine, _) = ws.engine();
    assert_eq!(engine.snapshot().by_qualified_name("parser::parse").len(), 1);

    let updates = parse_batches(std::fs::read(&failed).unwrap().as_slice()).unwrap();
    let (_, report) = engine.update(&[], &updates);
    assert_eq!(report.files_failed, 1);
    assert!(matches!(
        &report.warnings[0],
        isg_core::IsgError::ReparseFailed { file, reason }
            if file == "src/parser.rs" && reason == "syntax error"
    ));
}

#[test]
fn remove_and_status() {
    let ws = Workspace::new();
    let batches = ws.write("batches.json", BATCHES);
    ws.run(&["ingest", "-f", arg(&batches)]).unwrap();
    ws.run(&["remove", "src/parser.rs"]).unwrap();
    ws.run(&["--json-mode", "status"]).unwrap();

    let (engine, _) = ws.engine();
    assert_eq!(engine.stats().files, 1);
    assert_eq!(engine.stats().external_stubs, 1);
}

#[test]
fn export_import_and_hash() {
    let ws = Workspace::new();
    let batches = ws.write("batches.json", BATCHES);
    ws.run(&["ingest", "-f", arg(&batches)]).unwrap();

    let snapshot_path = ws.dir.path().join("graph.isgs");
    ws.run(&["export", "-o", arg(&snapshot_path)]).unwrap();
    ws.run(&["hash"]).unwrap();
    let exported = std::fs::read(&snapshot_path).unwrap();

    let other = Workspace::new();
    other.run(&["import", "-i", arg(&snapshot_path)]).unwrap();
    let (engine, _) = other.engine();
    assert_eq!(engine.export().unwrap(), exported);
}

#[test]
fn import_rejects_garbage() {
    let ws = Workspace::new();
    let garbage = ws.write("garbage.isgs", "definitely not a snapshot");
    assert!(ws.run(&["import", "-i", arg(&garbage)]).is_err());
}

#[test]
fn missing_input_file_is_an_io_error() {
    let ws = Workspace::new();
    let err = ws
        .run(&["ingest", "-f", "/nonexistent/batches.json"])
        .unwrap_err();
    assert!(matches!(err, isg_core::IsgError::IoError(_)));
}

#[test]
fn config_file_is_loaded() {
    let ws = Workspace::new();
    let config = ws.write("isg.toml", "[query]\nsuggestion_limit = 2\n");
    let batches = ws.write("batches.json", BATCHES);
    ws.run(&["--config", arg(&config), "ingest", "-f", arg(&batches)])
        .unwrap();

    let bad = ws.write("bad.toml", "[query]\nno_such_key = 1\n");
    let err = ws.run(&["--config", arg(&bad), "status"]).unwrap_err();
    assert!(matches!(err, isg_core::IsgError::ConfigError(_)));
}
