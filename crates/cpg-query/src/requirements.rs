//! Named requirements, evaluated as a set.
//!
//! ```
//! use cpg_query::{algo::FlowQuery, Config, Context, Requirements, Suppressions};
//! use cpg_query::cpg_facade::{NodeKind, ProgramGraph};
//!
//! let mut graph = ProgramGraph::new();
//! let secret = graph.add_named("secret", NodeKind::Variable);
//! let print = graph.add_named("print", NodeKind::Call);
//! graph.add_data_flow(secret, print);
//! graph.add_label(secret, "Secret");
//! graph.add_label(print, "Log");
//! let ctx = Context::new(graph, Config::default());
//!
//! let results = Requirements::new()
//!     .requirement("secrets are not logged", |ctx| {
//!         ctx.all("Secret", |s| {
//!             let leaks = ctx.data_flow(s, FlowQuery::may(), |n| ctx.has_label(n, "Log"))?;
//!             Ok(!leaks)
//!         })
//!     })
//!     .evaluate(&ctx, &Suppressions::new())
//!     .unwrap();
//! assert!(!results.all_hold());
//! ```

use std::{fmt, io::Write, sync::Arc};

use cpg_facade::Identifier;
use indexmap::IndexMap;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;

use crate::{Context, QueryError, QueryTree, SuppressionReport, Suppressions};

type RequirementFn = Box<dyn Fn(&Context) -> Result<QueryTree<bool>, QueryError> + Send + Sync>;

/// An ordered set of named requirements.
#[derive(Default)]
pub struct Requirements {
    entries: Vec<(Identifier, RequirementFn)>,
}

impl fmt::Debug for Requirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

impl Requirements {
    /// No requirements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a requirement. Names must be unique, which is checked by
    /// [`Self::evaluate`].
    pub fn requirement(
        mut self,
        name: impl Into<Identifier>,
        check: impl Fn(&Context) -> Result<QueryTree<bool>, QueryError> + Send + Sync + 'static,
    ) -> Self {
        self.entries.push((name.into(), Box::new(check)));
        self
    }

    /// Number of registered requirements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Are there no requirements?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluate every requirement, then apply `suppressions` to each result.
    ///
    /// Requirements are independent so they run in parallel. Results are in
    /// the order the requirements were added. The first requirement (in that
    /// order) that returned an error aborts the evaluation.
    pub fn evaluate(
        &self,
        ctx: &Context,
        suppressions: &Suppressions,
    ) -> Result<RequirementsResults, QueryError> {
        if let Some(name) = self.entries.iter().map(|(name, _)| *name).duplicates().next() {
            return Err(QueryError::DuplicateRequirement(name));
        }
        let evaluated = self
            .entries
            .par_iter()
            .map(|(name, check)| {
                log::debug!("Evaluating requirement {name}");
                (*name, check(ctx))
            })
            .collect::<Vec<_>>();

        let mut results = IndexMap::with_capacity(evaluated.len());
        for (name, tree) in evaluated {
            let mut tree = tree?;
            let suppression = suppressions.apply(&mut tree);
            log::info!(
                "Requirement {name} {}",
                if tree.holds() { "holds" } else { "does not hold" }
            );
            results.insert(name, RequirementResult { tree, suppression });
        }
        Ok(RequirementsResults(results))
    }
}

/// The outcome of one requirement.
#[derive(Debug, Clone, Serialize)]
pub struct RequirementResult {
    /// The result tree, after suppressions
    pub tree: QueryTree<bool>,
    /// Which suppressions changed the tree
    pub suppression: SuppressionReport,
}

/// Outcomes of a [`Requirements`] set, in insertion order.
#[derive(Debug, Clone, Serialize)]
pub struct RequirementsResults(IndexMap<Identifier, RequirementResult>);

impl RequirementsResults {
    /// Does every requirement hold?
    pub fn all_hold(&self) -> bool {
        self.0.values().all(|r| r.tree.holds())
    }

    /// The outcome of the requirement with this name.
    pub fn get(&self, name: impl Into<Identifier>) -> Option<&RequirementResult> {
        self.0.get(&name.into())
    }

    /// All outcomes, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Identifier, &RequirementResult)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    /// Number of evaluated requirements
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Was nothing evaluated?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dump all result trees as a JSON object keyed by requirement name.
    pub fn write_json(&self, w: impl Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(w, self)
    }

    /// Record diagnostics for every requirement, scoped by its name.
    pub fn report(&self, ctx: Arc<Context>) {
        for (name, result) in self.iter() {
            ctx.clone()
                .named_requirement(name, |ctx| result.tree.report(&ctx));
        }
    }
}

impl fmt::Display for RequirementsResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, result) in self.iter() {
            writeln!(f, "{name}:")?;
            write!(f, "{}", result.tree)?;
        }
        Ok(())
    }
}
