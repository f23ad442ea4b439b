//! Compositional queries over the engine.
//!
//! A [`QueryPlanner`] borrows an [`Engine`] and runs [`QueryPlan`]s against
//! it. The planner holds no state between runs.
//!
//! Every `store` step of a plan lands in a single WAL transaction that is
//! begun at the first write and ended after the last step. If any step fails
//! the transaction is abandoned, so a failed plan leaves nothing behind.
//! Plans without `store` steps never touch the WAL.

pub mod plan;

use std::collections::HashMap;

use crate::cleanup::CleanupMatch;
use crate::concept::Metadata;
use crate::engine::Engine;
use crate::error::{QueryError, StoreError};
use crate::vsa::HyperVec;
use crate::wal::{Operation, TxHandle};

pub use plan::{QueryPlan, QueryStep};

/// Result type for query operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Supplies vectors for names that are not stored concepts.
pub trait ConceptResolver: Send + Sync {
    fn resolve(&self, engine: &Engine, name: &str) -> Option<HyperVec>;
}

/// Resolves any name to its deterministic token vector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenResolver;

impl ConceptResolver for TokenResolver {
    fn resolve(&self, engine: &Engine, name: &str) -> Option<HyperVec> {
        Some(engine.encode_token(name))
    }
}

/// Resolves nothing: only stored concepts may be referenced.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolver;

impl ConceptResolver for NoResolver {
    fn resolve(&self, _engine: &Engine, _name: &str) -> Option<HyperVec> {
        None
    }
}

static TOKEN_RESOLVER: TokenResolver = TokenResolver;

/// What a plan produced.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    /// Top of the stack when the plan finished.
    pub result: Option<HyperVec>,
    /// Ranked matches from the last `cleanup` step.
    pub matches: Vec<CleanupMatch>,
    /// Ids written by `store` steps, in order.
    pub stored: Vec<String>,
    /// END sequence number of the plan's transaction, if it wrote.
    pub commit_seq: Option<u64>,
}

impl QueryOutcome {
    /// Best match of the last cleanup.
    pub fn best(&self) -> Option<&CleanupMatch> {
        self.matches.first()
    }
}

/// Runs plans against an engine.
pub struct QueryPlanner<'e> {
    engine: &'e Engine,
    resolver: &'e dyn ConceptResolver,
}

/// Mutable state of one plan run.
struct Run<'p> {
    stack: Vec<HyperVec>,
    /// Vectors stored earlier in this plan; not yet visible in the store.
    written: HashMap<String, HyperVec>,
    tx: Option<TxHandle>,
    outcome: QueryOutcome,
    metadata: &'p Metadata,
}

impl<'e> QueryPlanner<'e> {
    /// Planner that falls back to token vectors for unknown names.
    pub fn new(engine: &'e Engine) -> Self {
        Self::with_resolver(engine, &TOKEN_RESOLVER)
    }

    pub fn with_resolver(engine: &'e Engine, resolver: &'e dyn ConceptResolver) -> Self {
        Self { engine, resolver }
    }

    /// Parse and run a text plan.
    pub fn run(&self, text: &str) -> QueryResult<QueryOutcome> {
        self.execute(&QueryPlan::parse(text)?)
    }

    /// Run a plan; stored concepts get empty metadata.
    pub fn execute(&self, plan: &QueryPlan) -> QueryResult<QueryOutcome> {
        self.execute_with_metadata(plan, &Metadata::new())
    }

    /// Run a plan, attaching `metadata` to every concept it stores.
    pub fn execute_with_metadata(
        &self,
        plan: &QueryPlan,
        metadata: &Metadata,
    ) -> QueryResult<QueryOutcome> {
        tracing::debug!(steps = plan.len(), writes = plan.writes(), "running plan");
        let mut run = Run {
            stack: Vec::new(),
            written: HashMap::new(),
            tx: None,
            outcome: QueryOutcome::default(),
            metadata,
        };

        let steps = plan.steps();
        let result = steps
            .iter()
            .enumerate()
            .try_for_each(|(index, step)| {
                let last = index + 1 == steps.len();
                self.step(&mut run, index, step, last)
            });

        match (result, run.tx.take()) {
            (Ok(()), Some(tx)) => {
                let commit = self.engine.wal_end(tx).map_err(into_query_error)?;
                run.outcome.commit_seq = Some(commit.end_seq);
            }
            (Ok(()), None) => {}
            (Err(e), tx) => {
                if let Some(tx) = tx
                    && let Err(abandon) = self.engine.wal_abandon(tx)
                {
                    tracing::warn!(%abandon, "failed to abandon plan transaction");
                }
                tracing::debug!(plan = %plan, error = %e, "plan failed");
                return Err(e);
            }
        }

        run.outcome.result = run.stack.pop();
        Ok(run.outcome)
    }

    fn step(&self, run: &mut Run<'_>, index: usize, step: &QueryStep, last: bool) -> QueryResult<()> {
        let needed = step.arity();
        if run.stack.len() < needed {
            return Err(QueryError::StackUnderflow {
                index,
                step: step.name().to_string(),
                needed,
                available: run.stack.len(),
            });
        }
        let ops = self.engine.ops();

        match step {
            QueryStep::Load(id) => {
                let v = match run.written.get(id) {
                    Some(v) => v.clone(),
                    None => self.engine.get(id).map_err(into_query_error)?.vector,
                };
                run.stack.push(v);
            }
            QueryStep::Resolve(name) => {
                let v = self.resolve(run, name)?;
                run.stack.push(v);
            }
            QueryStep::Bind => {
                if let Some((a, b)) = pop_pair(&mut run.stack) {
                    run.stack.push(ops.bind(&a, &b)?);
                }
            }
            QueryStep::Unbind => {
                if let Some((bound, key)) = pop_pair(&mut run.stack) {
                    run.stack.push(ops.unbind(&bound, &key)?);
                }
            }
            QueryStep::Bundle(n) => {
                let operands = run.stack.split_off(run.stack.len() - n);
                let refs: Vec<&HyperVec> = operands.iter().collect();
                run.stack.push(ops.bundle(&refs)?);
            }
            QueryStep::Permute(shift) => {
                if let Some(v) = run.stack.pop() {
                    ops.check_dim(&v)?;
                    run.stack.push(ops.permute(&v, *shift));
                }
            }
            QueryStep::Cleanup(k) => {
                if let Some(v) = run.stack.pop() {
                    let matches = self.engine.cleanup(&v, *k).map_err(into_query_error)?;
                    match matches.first() {
                        Some(best) => run.stack.push(best.concept.vector.clone()),
                        None if !last => {
                            return Err(QueryError::NoMatch {
                                index,
                                threshold: self.engine.config().min_similarity,
                            });
                        }
                        None => {}
                    }
                    run.outcome.matches = matches;
                }
            }
            QueryStep::Store(id) => {
                if let Some(v) = run.stack.last().cloned() {
                    let tx = match run.tx.take() {
                        Some(tx) => tx,
                        None => {
                            let label = self.engine.internal_label("plan");
                            self.engine.wal_begin(&label).map_err(into_query_error)?
                        }
                    };
                    let op = Operation::put(id.as_str(), v.clone(), run.metadata.clone());
                    let appended = self.engine.wal_append(&tx, op);
                    run.tx = Some(tx);
                    appended.map_err(into_query_error)?;
                    run.written.insert(id.clone(), v);
                    run.outcome.stored.push(id.clone());
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, run: &Run<'_>, name: &str) -> QueryResult<HyperVec> {
        if let Some(v) = run.written.get(name) {
            return Ok(v.clone());
        }
        match self.engine.get(name) {
            Ok(concept) => return Ok(concept.vector),
            Err(crate::error::MnemosError::Store(StoreError::UnknownConcept { .. })) => {}
            Err(e) => return Err(into_query_error(e)),
        }
        self.resolver
            .resolve(self.engine, name)
            .ok_or_else(|| QueryError::Unresolved {
                name: name.to_string(),
            })
    }

    // -------------------------------------------------------------------
    // Convenience operations
    // -------------------------------------------------------------------

    /// Recover the filler bound to `role` in a stored record.
    pub fn recover_filler(&self, record: &str, role: &str, k: usize) -> QueryResult<Vec<CleanupMatch>> {
        let plan = QueryPlan::new().load(record).resolve(role).unbind().cleanup(k);
        Ok(self.execute(&plan)?.matches)
    }

    /// `a` is to `b` as `c` is to ?: cleans up `bind(c, unbind(b, a))`.
    pub fn analogy(&self, a: &str, b: &str, c: &str, k: usize) -> QueryResult<Vec<CleanupMatch>> {
        let plan = QueryPlan::new()
            .resolve(b)
            .resolve(a)
            .unbind()
            .resolve(c)
            .bind()
            .cleanup(k);
        Ok(self.execute(&plan)?.matches)
    }

    /// Store `bind(a, b)` under `id`.
    pub fn bind_and_store(
        &self,
        id: &str,
        a: &str,
        b: &str,
        metadata: Metadata,
    ) -> QueryResult<HyperVec> {
        let plan = QueryPlan::new().resolve(a).resolve(b).bind().store(id);
        self.execute_with_metadata(&plan, &metadata)?
            .result
            .ok_or_else(|| QueryError::InvalidArgument {
                step: "store".into(),
                message: "plan produced no vector".into(),
            })
    }

    /// Store the bundle of `role ⊗ filler` pairs under `id`.
    pub fn compose_record(
        &self,
        id: &str,
        pairs: &[(&str, &str)],
        metadata: Metadata,
    ) -> QueryResult<HyperVec> {
        if pairs.is_empty() {
            return Err(QueryError::InvalidArgument {
                step: "bundle".into(),
                message: "a record needs at least one role/filler pair".into(),
            });
        }
        let plan = pairs
            .iter()
            .fold(QueryPlan::new(), |plan, (role, filler)| {
                plan.resolve(*role).resolve(*filler).bind()
            })
            .bundle(pairs.len())
            .store(id);
        self.execute_with_metadata(&plan, &metadata)?
            .result
            .ok_or_else(|| QueryError::InvalidArgument {
                step: "store".into(),
                message: "plan produced no vector".into(),
            })
    }
}

impl std::fmt::Debug for QueryPlanner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlanner").field("engine", self.engine).finish()
    }
}

/// Pop the top two vectors as `(second, top)`.
fn pop_pair(stack: &mut Vec<HyperVec>) -> Option<(HyperVec, HyperVec)> {
    let top = stack.pop()?;
    let second = stack.pop()?;
    Some((second, top))
}

/// Narrow an engine error to the query taxonomy.
fn into_query_error(e: crate::error::MnemosError) -> QueryError {
    use crate::error::MnemosError;
    match e {
        MnemosError::Vsa(e) => QueryError::Vsa(e),
        MnemosError::Store(e) => QueryError::Store(e),
        MnemosError::Wal(e) => QueryError::Wal(e),
        MnemosError::Engine(e) => QueryError::Engine(e),
        MnemosError::Query(e) => e,
        other => QueryError::InvalidArgument {
            step: "engine".into(),
            message: other.to_string(),
        },
    }
}
