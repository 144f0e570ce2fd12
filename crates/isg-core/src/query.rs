//! # Query Engine
//!
//! Architectural questions answered against one immutable [`Snapshot`]:
//!
//! - `what_implements`, `callers`, `callees`, `users`: single-hop lookups
//! - `blast_radius`, `dependencies`: bounded BFS (see [`crate::impact`])
//! - `find_cycles`, `find_all_cycles`: Tarjan SCCs (see [`crate::cycles`])
//! - `search`, `lookup`: discovery with file context
//!
//! Every result is ordered ascending by entity id. Unknown references fail
//! with `EntityNotFound` carrying fuzzy suggestions; names matching several
//! entities fail with `AmbiguousName`.
//!
//! Queries can also be expressed as data ([`Query`]) and run with
//! [`QueryEngine::execute`].

use crate::config::QueryConfig;
use crate::cycles;
use crate::impact::{self, BlastRadius, ImpactDirection, ImpactOptions};
use crate::snapshot::Snapshot;
use crate::types::{Confidence, EdgeKind, EdgeKindSet, EntityId, IsgError, Suggestion};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

// =============================================================================
// ENTITY REFERENCES
// =============================================================================

/// How a query names its subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Id(EntityId),
    /// Qualified name, or a simple name that is unique in the graph.
    Name(String),
}

impl EntityRef {
    /// Parse user input: `id:<hex>` is an id, anything else a name.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.strip_prefix("id:").map(str::parse::<EntityId>) {
            Some(Ok(id)) => Self::Id(id),
            _ => Self::Name(text.to_string()),
        }
    }
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for EntityRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for EntityRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{}", id),
            Self::Name(name) => f.write_str(name),
        }
    }
}

// =============================================================================
// STRUCTURED QUERIES
// =============================================================================

/// Query operations supported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryType {
    /// Implementors of a trait.
    WhatImplements(EntityRef),
    Callers(EntityRef),
    Callees(EntityRef),
    Users(EntityRef),
    /// Transitive impact with minimal depths.
    BlastRadius {
        target: EntityRef,
        max_depth: Option<usize>,
        direction: ImpactDirection,
    },
    /// Cycles reachable from an entity.
    FindCycles(EntityRef),
    FindAllCycles,
    /// Ranked case-insensitive name search.
    Search { fragment: String, limit: usize },
    /// Exact name lookup with file context.
    Lookup(String),
}

/// A structured query with optional timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub query_type: QueryType,
    /// Optional timeout in milliseconds (blast radius only).
    pub timeout_ms: Option<u64>,
    /// Follow low-confidence edges.
    pub include_low_confidence: bool,
}

impl Query {
    #[must_use]
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            timeout_ms: None,
            include_low_confidence: false,
        }
    }

    #[must_use]
    pub fn with_timeout(query_type: QueryType, timeout_ms: u64) -> Self {
        Self {
            timeout_ms: Some(timeout_ms),
            ..Self::new(query_type)
        }
    }

    /// Opt in to low-confidence edges.
    #[must_use]
    pub fn low_confidence(mut self) -> Self {
        self.include_low_confidence = true;
        self
    }

    #[must_use]
    pub fn callers(target: impl Into<EntityRef>) -> Self {
        Self::new(QueryType::Callers(target.into()))
    }

    #[must_use]
    pub fn callees(target: impl Into<EntityRef>) -> Self {
        Self::new(QueryType::Callees(target.into()))
    }

    #[must_use]
    pub fn users(target: impl Into<EntityRef>) -> Self {
        Self::new(QueryType::Users(target.into()))
    }

    #[must_use]
    pub fn what_implements(target: impl Into<EntityRef>) -> Self {
        Self::new(QueryType::WhatImplements(target.into()))
    }

    #[must_use]
    pub fn blast_radius(target: impl Into<EntityRef>, max_depth: Option<usize>) -> Self {
        Self::new(QueryType::BlastRadius {
            target: target.into(),
            max_depth,
            direction: ImpactDirection::Upstream,
        })
    }

    #[must_use]
    pub fn cycles(target: impl Into<EntityRef>) -> Self {
        Self::new(QueryType::FindCycles(target.into()))
    }

    #[must_use]
    pub fn search(fragment: impl Into<String>, limit: usize) -> Self {
        Self::new(QueryType::Search {
            fragment: fragment.into(),
            limit,
        })
    }

    #[must_use]
    pub fn lookup(name: impl Into<String>) -> Self {
        Self::new(QueryType::Lookup(name.into()))
    }
}

/// Result of [`QueryEngine::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutput {
    Entities(Vec<EntityId>),
    Impact(BlastRadius),
    Cycles(Vec<Vec<EntityId>>),
    Matches(Vec<Suggestion>),
}

// =============================================================================
// ENGINE
// =============================================================================

/// Stateless query evaluator borrowing a snapshot.
pub struct QueryEngine<'a> {
    snapshot: &'a Snapshot,
    config: QueryConfig,
    threshold: Confidence,
    include_low_confidence: bool,
}

impl<'a> QueryEngine<'a> {
    #[must_use]
    pub fn new(snapshot: &'a Snapshot, config: &QueryConfig) -> Self {
        Self {
            snapshot,
            config: config.clone(),
            threshold: config.threshold(),
            include_low_confidence: config.include_low_confidence,
        }
    }

    /// Follow low-confidence edges in every query of this engine.
    #[must_use]
    pub fn with_low_confidence(mut self, include: bool) -> Self {
        self.include_low_confidence = include;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    fn admits(&self, confidence: Confidence, opt_in: bool) -> bool {
        self.include_low_confidence || opt_in || confidence > self.threshold
    }

    /// Resolve a reference to exactly one live entity.
    pub fn resolve(&self, target: &EntityRef) -> Result<EntityId, IsgError> {
        match target {
            EntityRef::Id(id) => {
                if self.snapshot.graph().contains(*id) {
                    Ok(*id)
                } else {
                    Err(IsgError::EntityNotFound {
                        query: EntityRef::Id(*id).to_string(),
                        suggestions: self.nearest(*id),
                    })
                }
            }
            EntityRef::Name(name) => self.resolve_name(name),
        }
    }

    fn resolve_name(&self, name: &str) -> Result<EntityId, IsgError> {
        let name = name.trim();
        let (qualified, qualified_stubs) = self.split_stubs(self.snapshot.by_qualified_name(name));
        let (simple, simple_stubs) = self.split_stubs(self.snapshot.by_name(name));
        let candidates = if !qualified.is_empty() {
            qualified
        } else if !simple.is_empty() {
            simple
        } else {
            let stubs: BTreeSet<EntityId> = qualified_stubs.into_iter().chain(simple_stubs).collect();
            stubs.into_iter().collect()
        };
        match candidates.as_slice() {
            [single] => Ok(*single),
            [] => Err(IsgError::EntityNotFound {
                query: name.to_string(),
                suggestions: self.suggestions(name),
            }),
            many => Err(IsgError::AmbiguousName {
                name: name.to_string(),
                candidates: many
                    .iter()
                    .filter_map(|id| self.snapshot.describe(*id))
                    .collect(),
            }),
        }
    }

    /// Partition into (defined, external stubs). Defined entities win.
    fn split_stubs(&self, ids: Vec<EntityId>) -> (Vec<EntityId>, Vec<EntityId>) {
        let graph = self.snapshot.graph();
        ids.into_iter()
            .partition(|id| graph.entity(*id).is_some_and(|e| !e.kind.is_external_stub()))
    }

    /// Live entities whose ids are closest to an unknown one.
    fn nearest(&self, id: EntityId) -> Vec<Suggestion> {
        self.snapshot
            .graph()
            .nearest_ids(id, self.config.suggestion_limit)
            .into_iter()
            .filter_map(|id| self.snapshot.describe(id))
            .collect()
    }

    /// Nearest fuzzy matches for a failed lookup.
    #[must_use]
    pub fn suggestions(&self, text: &str) -> Vec<Suggestion> {
        self.snapshot
            .fuzzy(text, self.config.suggestion_limit)
            .into_iter()
            .filter_map(|id| self.snapshot.describe(id))
            .collect()
    }

    fn reverse(&self, target: &EntityRef, kind: EdgeKind) -> Result<Vec<EntityId>, IsgError> {
        let id = self.resolve(target)?;
        Ok(self
            .snapshot
            .graph()
            .predecessors(id, kind)
            .filter(|(_, c)| self.admits(*c, false))
            .map(|(source, _)| source)
            .collect())
    }

    pub fn what_implements(&self, target: &EntityRef) -> Result<Vec<EntityId>, IsgError> {
        self.reverse(target, EdgeKind::Implements)
    }

    pub fn callers(&self, target: &EntityRef) -> Result<Vec<EntityId>, IsgError> {
        self.reverse(target, EdgeKind::Calls)
    }

    pub fn users(&self, target: &EntityRef) -> Result<Vec<EntityId>, IsgError> {
        self.reverse(target, EdgeKind::Uses)
    }

    pub fn callees(&self, target: &EntityRef) -> Result<Vec<EntityId>, IsgError> {
        let id = self.resolve(target)?;
        Ok(self
            .snapshot
            .graph()
            .successors(id, EdgeKind::Calls)
            .filter(|(_, c)| self.admits(*c, false))
            .map(|(callee, _)| callee)
            .collect())
    }

    /// Impact options seeded from the configuration.
    #[must_use]
    pub fn default_impact_options(&self) -> ImpactOptions {
        ImpactOptions {
            max_depth: self.config.default_max_depth,
            timeout: self.config.blast_radius_timeout_ms.map(Duration::from_millis),
            direction: ImpactDirection::Upstream,
            include_low_confidence: false,
        }
    }

    pub fn blast_radius(
        &self,
        target: &EntityRef,
        options: &ImpactOptions,
    ) -> Result<BlastRadius, IsgError> {
        let origin = self.resolve(target)?;
        Ok(impact::blast_radius(
            self.snapshot.graph(),
            origin,
            options,
            |c| self.admits(c, options.include_low_confidence),
        ))
    }

    /// Everything the target transitively depends on.
    pub fn dependencies(
        &self,
        target: &EntityRef,
        options: &ImpactOptions,
    ) -> Result<BlastRadius, IsgError> {
        let options = ImpactOptions {
            direction: ImpactDirection::Downstream,
            ..*options
        };
        self.blast_radius(target, &options)
    }

    pub fn find_cycles(&self, scope: &EntityRef) -> Result<Vec<Vec<EntityId>>, IsgError> {
        let origin = self.resolve(scope)?;
        Ok(cycles::cycles_from(
            self.snapshot.graph(),
            origin,
            EdgeKindSet::DEPENDENCY,
            |c| self.admits(c, false),
        ))
    }

    #[must_use]
    pub fn find_all_cycles(&self) -> Vec<Vec<EntityId>> {
        cycles::all_cycles(self.snapshot.graph(), EdgeKindSet::DEPENDENCY, |c| {
            self.admits(c, false)
        })
    }

    /// Ranked fuzzy search; `limit` of 0 uses the configured default.
    #[must_use]
    pub fn search(&self, fragment: &str, limit: usize) -> Vec<EntityId> {
        let limit = if limit == 0 { self.config.fuzzy_limit } else { limit };
        self.snapshot.fuzzy(fragment, limit)
    }

    /// Exact lookup by simple or qualified name with file context.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Vec<Suggestion> {
        self.snapshot.lookup_name(name)
    }

    /// Run a structured query.
    pub fn execute(&self, query: &Query) -> Result<QueryOutput, IsgError> {
        let engine = QueryEngine {
            include_low_confidence: self.include_low_confidence || query.include_low_confidence,
            snapshot: self.snapshot,
            config: self.config.clone(),
            threshold: self.threshold,
        };
        let output = match &query.query_type {
            QueryType::WhatImplements(target) => {
                QueryOutput::Entities(engine.what_implements(target)?)
            }
            QueryType::Callers(target) => QueryOutput::Entities(engine.callers(target)?),
            QueryType::Callees(target) => QueryOutput::Entities(engine.callees(target)?),
            QueryType::Users(target) => QueryOutput::Entities(engine.users(target)?),
            QueryType::BlastRadius {
                target,
                max_depth,
                direction,
            } => {
                let defaults = engine.default_impact_options();
                let options = ImpactOptions {
                    max_depth: max_depth.or(defaults.max_depth),
                    timeout: query.timeout_ms.map(Duration::from_millis).or(defaults.timeout),
                    direction: *direction,
                    include_low_confidence: false,
                };
                QueryOutput::Impact(engine.blast_radius(target, &options)?)
            }
            QueryType::FindCycles(target) => QueryOutput::Cycles(engine.find_cycles(target)?),
            QueryType::FindAllCycles => QueryOutput::Cycles(engine.find_all_cycles()),
            QueryType::Search { fragment, limit } => {
                QueryOutput::Entities(engine.search(fragment, *limit))
            }
            QueryType::Lookup(name) => QueryOutput::Matches(engine.lookup(name)),
        };
        Ok(output)
    }
}

/// Entity ids of a suggestion list, deduplicated, ascending.
#[must_use]
pub fn ids_of(suggestions: &[Suggestion]) -> Vec<EntityId> {
    suggestions
        .iter()
        .map(|s| s.id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::signature::{FileBatch, RawEntity, RawRelationship, SignatureModel, stub_id};
    use crate::types::Checksum;

    fn snapshot_of(batches: &[FileBatch]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        let contributions: Vec<_> = batches
            .iter()
            .map(|b| {
                SignatureModel::normalize(b, &IngestConfig::default())
                    .expect("normalize")
                    .contribution
            })
            .collect();
        snapshot.apply_batch(&BTreeSet::new(), &contributions);
        snapshot
    }

    fn id(snapshot: &Snapshot, qualified: &str) -> EntityId {
        snapshot.by_qualified_name(qualified)[0]
    }

    fn sorted(mut ids: Vec<EntityId>) -> Vec<EntityId> {
        ids.sort();
        ids
    }

    /// `main -> handle -> parse -> Token`, `Lexer: Tokenize`, a call cycle
    /// `ping <-> pong`, and a low-confidence call `guess -> parse`.
    fn workspace() -> Snapshot {
        snapshot_of(&[
            FileBatch::new("src/main.rs", Checksum(1))
                .entity(RawEntity::new("main", "fn", 1).qualified("app::main"))
                .entity(RawEntity::new("guess", "fn", 9).qualified("app::guess"))
                .relationship(RawRelationship::new("main", "calls", "handle"))
                .relationship(RawRelationship::new("guess", "calls", "parser::parse").confidence(0.0)),
            FileBatch::new("src/handler.rs", Checksum(2))
                .entity(RawEntity::new("handle", "fn", 1).qualified("handler::handle"))
                .relationship(RawRelationship::new("handle", "calls", "parser::parse"))
                .relationship(RawRelationship::new("handle", "calls", "log::info")),
            FileBatch::new("src/parser.rs", Checksum(3))
                .entity(RawEntity::new("parse", "fn", 1).qualified("parser::parse"))
                .entity(RawEntity::new("Token", "struct", 20).qualified("parser::Token"))
                .entity(RawEntity::new("Tokenize", "trait", 30).qualified("parser::Tokenize"))
                .entity(RawEntity::new("Lexer", "struct", 40).qualified("parser::Lexer"))
                .relationship(RawRelationship::new("parse", "uses", "Token"))
                .relationship(RawRelationship::new("Lexer", "implements", "Tokenize")),
            FileBatch::new("src/net.rs", Checksum(4))
                .entity(RawEntity::new("ping", "fn", 1).qualified("net::ping"))
                .entity(RawEntity::new("pong", "fn", 5).qualified("net::pong"))
                .entity(RawEntity::new("parse", "fn", 9).qualified("net::parse"))
                .relationship(RawRelationship::new("ping", "calls", "pong"))
                .relationship(RawRelationship::new("pong", "calls", "ping")),
        ])
    }

    #[test]
    fn single_hop_queries() {
        let snapshot = workspace();
        let engine = snapshot.query(&QueryConfig::default());
        let parse = id(&snapshot, "parser::parse");
        let handle = id(&snapshot, "handler::handle");

        assert_eq!(
            engine.callers(&"parser::parse".into()).expect("callers"),
            vec![handle]
        );
        assert_eq!(
            engine.users(&"parser::Token".into()).expect("users"),
            vec![parse]
        );
        assert_eq!(
            engine.what_implements(&"Tokenize".into()).expect("implements"),
            vec![id(&snapshot, "parser::Lexer")]
        );
        assert_eq!(
            engine.callees(&EntityRef::Id(handle)).expect("callees"),
            sorted(vec![stub_id("log::info"), parse])
        );
    }

    #[test]
    fn low_confidence_edges_are_opt_in() {
        let snapshot = workspace();
        let parse: EntityRef = "parser::parse".into();
        let guess = id(&snapshot, "app::guess");

        let strict = snapshot.query(&QueryConfig::default());
        assert!(!strict.callers(&parse).expect("callers").contains(&guess));

        let lenient = snapshot
            .query(&QueryConfig::default())
            .with_low_confidence(true);
        assert!(lenient.callers(&parse).expect("callers").contains(&guess));

        let out = strict
            .execute(&Query::callers(parse).low_confidence())
            .expect("execute");
        assert!(matches!(out, QueryOutput::Entities(ids) if ids.contains(&guess)));
    }

    #[test]
    fn names_resolve_or_explain() {
        let snapshot = workspace();
        let engine = snapshot.query(&QueryConfig::default());

        let err = engine.callers(&"parse".into()).expect_err("two parse functions");
        assert!(matches!(&err, IsgError::AmbiguousName { candidates, .. } if candidates.len() == 2));

        let err = engine.callers(&"handl".into()).expect_err("typo");
        assert!(matches!(
            &err,
            IsgError::EntityNotFound { suggestions, .. }
                if suggestions.iter().any(|s| s.name == "handle")
        ));
        assert!(err.to_string().contains("did you mean"));

        let err = engine.callers(&EntityRef::Id(EntityId(7))).expect_err("bogus id");
        let nearest = snapshot.graph().entities().map(|e| e.id).min();
        assert!(matches!(
            &err,
            IsgError::EntityNotFound { query, suggestions }
                if query == "id:0000000000000007"
                    && suggestions.len() == 5
                    && suggestions.first().map(|s| s.id) == nearest
        ));

        assert_eq!(
            engine.resolve(&"handle".into()).expect("unique simple name"),
            id(&snapshot, "handler::handle")
        );
    }

    #[test]
    fn blast_radius_depths_and_bounds() {
        let snapshot = workspace();
        let engine = snapshot.query(&QueryConfig::default());
        let token: EntityRef = "parser::Token".into();

        let radius = engine
            .blast_radius(&token, &ImpactOptions::default())
            .expect("blast radius");
        assert_eq!(radius.depth_of(id(&snapshot, "parser::parse")), Some(1));
        assert_eq!(radius.depth_of(id(&snapshot, "handler::handle")), Some(2));
        assert_eq!(radius.depth_of(id(&snapshot, "app::main")), Some(3));
        assert_eq!(radius.depth_of(id(&snapshot, "app::guess")), None);
        assert_eq!(radius.affected(), 3);

        let origin_only = engine
            .blast_radius(&token, &ImpactOptions::default().depth(0))
            .expect("blast radius");
        assert_eq!(origin_only.entities(), vec![id(&snapshot, "parser::Token")]);

        let bounded = engine
            .blast_radius(&token, &ImpactOptions::default().depth(1))
            .expect("blast radius");
        assert_eq!(bounded.affected(), 1);

        let with_guess = engine
            .blast_radius(&token, &ImpactOptions::default().low_confidence())
            .expect("blast radius");
        assert_eq!(with_guess.depth_of(id(&snapshot, "app::guess")), Some(2));
    }

    #[test]
    fn dependencies_walk_forward() {
        let snapshot = workspace();
        let engine = snapshot.query(&QueryConfig::default());
        let deps = engine
            .dependencies(&"app::main".into(), &ImpactOptions::default())
            .expect("dependencies");
        assert_eq!(deps.direction, ImpactDirection::Downstream);
        assert_eq!(deps.depth_of(id(&snapshot, "parser::Token")), Some(3));
        assert_eq!(deps.depth_of(stub_id("log::info")), Some(2));
    }

    #[test]
    fn cycles_scoped_and_global() {
        let snapshot = workspace();
        let engine = snapshot.query(&QueryConfig::default());
        let expected = sorted(vec![id(&snapshot, "net::ping"), id(&snapshot, "net::pong")]);
        assert_eq!(
            engine.find_cycles(&"net::ping".into()).expect("cycles"),
            vec![expected.clone()]
        );
        assert!(engine.find_cycles(&"app::main".into()).expect("cycles").is_empty());
        assert_eq!(engine.find_all_cycles(), vec![expected]);
    }

    #[test]
    fn execute_dispatches() {
        let snapshot = workspace();
        let engine = snapshot.query(&QueryConfig::default());

        let out = engine
            .execute(&Query::with_timeout(
                QueryType::BlastRadius {
                    target: "parser::Token".into(),
                    max_depth: Some(2),
                    direction: ImpactDirection::Upstream,
                },
                1_000,
            ))
            .expect("execute");
        assert!(matches!(out, QueryOutput::Impact(r) if r.affected() == 2 && !r.truncated));

        let out = engine.execute(&Query::lookup("parse")).expect("execute");
        assert!(matches!(&out, QueryOutput::Matches(m) if m.len() == 2));
        if let QueryOutput::Matches(matches) = out {
            assert_eq!(ids_of(&matches).len(), 2);
        }

        let out = engine.execute(&Query::search("toke", 0)).expect("execute");
        assert!(matches!(out, QueryOutput::Entities(ids) if ids.len() == 2));

        let out = engine
            .execute(&Query::new(QueryType::FindAllCycles))
            .expect("execute");
        assert!(matches!(out, QueryOutput::Cycles(c) if c.len() == 1));

        assert!(engine.execute(&Query::cycles("nope_nothing")).is_err());
    }

    #[test]
    fn entity_ref_parsing() {
        assert_eq!(EntityRef::parse("id:00000000000000ff"), EntityRef::Id(EntityId(255)));
        assert_eq!(EntityRef::parse(" a::b "), EntityRef::Name("a::b".to_string()));
        assert_eq!(EntityRef::parse("id:zz"), EntityRef::Name("id:zz".to_string()));
        assert_eq!(EntityRef::Id(EntityId(255)).to_string(), "id:00000000000000ff");
    }
}
