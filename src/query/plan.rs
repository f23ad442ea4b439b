//! Query plans: ordered steps over a vector stack.
//!
//! Plans can be built in code or parsed from text, one step per `;` or line:
//!
//! ```text
//! load red; load apple; bind; store red_apple
//! load red_apple; resolve color; unbind; cleanup 3
//! ```

use super::QueryResult;
use crate::error::QueryError;

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStep {
    /// Push a stored concept's vector.
    Load(String),
    /// Push a stored concept's vector, or ask the resolver for one.
    Resolve(String),
    /// Pop `b`, pop `a`, push `bind(a, b)`.
    Bind,
    /// Pop `key`, pop `bound`, push `unbind(bound, key)`.
    Unbind,
    /// Pop `n` vectors, push their bundle.
    Bundle(usize),
    /// Pop a vector, push it rotated by `n`.
    Permute(usize),
    /// Pop a vector, push the vector of its best stored match; reports the top `k`.
    Cleanup(usize),
    /// Store the top of the stack under an id (the stack is unchanged).
    Store(String),
}

impl QueryStep {
    /// The step's name in the dispatch table.
    pub fn name(&self) -> &'static str {
        match self {
            QueryStep::Load(_) => "load",
            QueryStep::Resolve(_) => "resolve",
            QueryStep::Bind => "bind",
            QueryStep::Unbind => "unbind",
            QueryStep::Bundle(_) => "bundle",
            QueryStep::Permute(_) => "permute",
            QueryStep::Cleanup(_) => "cleanup",
            QueryStep::Store(_) => "store",
        }
    }

    /// Vectors the step pops (or reads) from the stack.
    pub fn arity(&self) -> usize {
        match self {
            QueryStep::Load(_) | QueryStep::Resolve(_) => 0,
            QueryStep::Bind | QueryStep::Unbind => 2,
            QueryStep::Bundle(n) => *n,
            QueryStep::Permute(_) | QueryStep::Cleanup(_) | QueryStep::Store(_) => 1,
        }
    }

    /// Whether the step writes to the store.
    pub fn is_write(&self) -> bool {
        matches!(self, QueryStep::Store(_))
    }

    /// Parse one step, e.g. `bundle 3`.
    pub fn parse(text: &str) -> QueryResult<Self> {
        let mut words = text.split_whitespace();
        let name = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();
        let parser = STEP_PARSERS
            .iter()
            .find(|(step, _)| *step == name)
            .map(|(_, parser)| parser)
            .ok_or_else(|| QueryError::UnknownStep { name: name.clone() })?;
        parser(&name, &args)
    }
}

impl std::fmt::Display for QueryStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryStep::Load(id) | QueryStep::Resolve(id) | QueryStep::Store(id) => {
                write!(f, "{} {id}", self.name())
            }
            QueryStep::Bind | QueryStep::Unbind => write!(f, "{}", self.name()),
            QueryStep::Bundle(n) | QueryStep::Permute(n) | QueryStep::Cleanup(n) => {
                write!(f, "{} {n}", self.name())
            }
        }
    }
}

type StepParser = fn(&str, &[&str]) -> QueryResult<QueryStep>;

/// Step name → parser.
const STEP_PARSERS: &[(&str, StepParser)] = &[
    ("load", parse_load),
    ("resolve", parse_resolve),
    ("bind", parse_bind),
    ("unbind", parse_unbind),
    ("bundle", parse_bundle),
    ("permute", parse_permute),
    ("cleanup", parse_cleanup),
    ("store", parse_store),
];

fn parse_load(step: &str, args: &[&str]) -> QueryResult<QueryStep> {
    Ok(QueryStep::Load(one_id(step, args)?))
}

fn parse_resolve(step: &str, args: &[&str]) -> QueryResult<QueryStep> {
    Ok(QueryStep::Resolve(one_id(step, args)?))
}

fn parse_bind(step: &str, args: &[&str]) -> QueryResult<QueryStep> {
    no_args(step, args)?;
    Ok(QueryStep::Bind)
}

fn parse_unbind(step: &str, args: &[&str]) -> QueryResult<QueryStep> {
    no_args(step, args)?;
    Ok(QueryStep::Unbind)
}

fn parse_bundle(step: &str, args: &[&str]) -> QueryResult<QueryStep> {
    match count(step, args, None)? {
        0 => Err(invalid(step, "bundle needs at least one vector")),
        n => Ok(QueryStep::Bundle(n)),
    }
}

fn parse_permute(step: &str, args: &[&str]) -> QueryResult<QueryStep> {
    Ok(QueryStep::Permute(count(step, args, Some(1))?))
}

fn parse_cleanup(step: &str, args: &[&str]) -> QueryResult<QueryStep> {
    Ok(QueryStep::Cleanup(count(step, args, Some(1))?))
}

fn parse_store(step: &str, args: &[&str]) -> QueryResult<QueryStep> {
    Ok(QueryStep::Store(one_id(step, args)?))
}

/// Names accepted by [`QueryStep::parse`].
pub fn step_names() -> impl Iterator<Item = &'static str> {
    STEP_PARSERS.iter().map(|(name, _)| *name)
}

fn invalid(step: &str, message: impl Into<String>) -> QueryError {
    QueryError::InvalidArgument {
        step: step.to_string(),
        message: message.into(),
    }
}

fn one_id(step: &str, args: &[&str]) -> QueryResult<String> {
    match args {
        [id] => Ok((*id).to_string()),
        [] => Err(invalid(step, "missing concept id")),
        _ => Err(invalid(step, format!("expected one id, got {}", args.len()))),
    }
}

fn no_args(step: &str, args: &[&str]) -> QueryResult<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(invalid(step, "takes no arguments"))
    }
}

fn count(step: &str, args: &[&str], default: Option<usize>) -> QueryResult<usize> {
    match (args, default) {
        ([], Some(n)) => Ok(n),
        ([], None) => Err(invalid(step, "missing count")),
        ([n], _) => n
            .parse()
            .map_err(|_| invalid(step, format!("\"{n}\" is not a non-negative integer"))),
        _ => Err(invalid(step, "expected a single count")),
    }
}

/// An ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    steps: Vec<QueryStep>,
}

impl QueryPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `step; step; ...` (newlines also separate steps).
    pub fn parse(text: &str) -> QueryResult<Self> {
        let steps = text
            .split([';', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(QueryStep::parse)
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[QueryStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether any step writes.
    pub fn writes(&self) -> bool {
        self.steps.iter().any(QueryStep::is_write)
    }

    pub fn push(mut self, step: QueryStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn load(self, id: impl Into<String>) -> Self {
        self.push(QueryStep::Load(id.into()))
    }

    pub fn resolve(self, name: impl Into<String>) -> Self {
        self.push(QueryStep::Resolve(name.into()))
    }

    pub fn bind(self) -> Self {
        self.push(QueryStep::Bind)
    }

    pub fn unbind(self) -> Self {
        self.push(QueryStep::Unbind)
    }

    pub fn bundle(self, n: usize) -> Self {
        self.push(QueryStep::Bundle(n))
    }

    pub fn permute(self, shift: usize) -> Self {
        self.push(QueryStep::Permute(shift))
    }

    pub fn cleanup(self, k: usize) -> Self {
        self.push(QueryStep::Cleanup(k))
    }

    pub fn store(self, id: impl Into<String>) -> Self {
        self.push(QueryStep::Store(id.into()))
    }
}

impl std::fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for QueryPlan {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
