//! The query engine for writing explainable requirements over code property
//! graphs.
//!
//! A requirement is a function from a [`Context`] to a [`QueryTree<bool>`].
//! The tree is the verdict together with everything that went into it: the
//! results it was combined from, the explored paths, the caveats it relies
//! on and the suppressions that changed it.
//!
//! Next we show you the most common workflow, then explain the steps.
//!
//! ```no_run
//! use cpg_query::{algo::FlowQuery, GraphLocation, Requirements, Suppressions};
//!
//! GraphLocation::std("project/dir").with_context(|ctx| {
//!     let results = Requirements::new()
//!         .requirement("secrets are cleared", |ctx| {
//!             ctx.all("Secret", |s| {
//!                 let q = ctx.flow_query(cpg_query::algo::AnalysisType::Must);
//!                 ctx.data_flow(s, q, |n| ctx.has_label(n, "Clear"))
//!             })
//!         })
//!         .evaluate(&ctx, &Suppressions::new())?;
//!     results.report(ctx.clone());
//!     Ok(results.all_hold())
//! })?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! 1. The graph is produced elsewhere and written to a file. [`GraphLocation`]
//!    points at it, either with the default file name in a directory
//!    ([`GraphLocation::std`]) or with a custom path
//!    ([`GraphLocation::custom`]).
//! 2. [`.with_context()`](GraphLocation::with_context) reads the graph,
//!    indexes its labels and invokes the closure with a [`Context`]. After the
//!    closure returns it emits the recorded diagnostics.
//! 3. Requirements use the predicates on [`Context`]
//!    ([`data_flow`](Context::data_flow),
//!    [`execution_path`](Context::execution_path),
//!    [`always_flows_to`](Context::always_flows_to)), the quantifiers
//!    ([`all`](Context::all), [`exists`](Context::exists)) and the
//!    combinators ([`and`], [`or`], [`not`], comparisons) to build trees.
//! 4. [`Requirements`] evaluates a named set, [`Suppressions`] overrides known
//!    false positives and [`RequirementsResults::report`] turns failures into
//!    diagnostics.

#![warn(missing_docs)]

use anyhow::{Context as _, Result};
pub use cpg_facade;
use cpg_facade::ProgramGraph;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

pub mod algo;
mod assumption;
mod combinators;
mod context;
#[macro_use]
pub mod diagnostics;
mod error;
mod quantify;
mod query_tree;
mod report;
mod requirements;
mod suppression;
#[cfg(test)]
mod test_utils;

pub use self::{
    assumption::{Assumption, AssumptionKind},
    combinators::{all_of, and, any_of, constant, not, or, MergeTrees},
    context::{Context, SharedGraph},
    error::QueryError,
    query_tree::{CompareOp, Operator, QueryNodeRef, QueryTree, TreeValue, Value},
    requirements::{RequirementResult, Requirements, RequirementsResults},
    suppression::{AppliedOverride, OverrideRecord, Suppression, SuppressionReport, Suppressions},
};

use algo::{AnalysisScope, Sensitivities};

/// Default name of the graph file inside an analyzed project.
pub const GRAPH_FILE_NAME: &str = "cpg.json";

/// Default name of the configuration file next to the graph.
pub const CONFIG_FILE_NAME: &str = "cpg-query.toml";

/// How much of each explored path is kept as evidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    /// Every node on the path
    #[default]
    Full,
    /// Only the first and the last node
    StartAndEnd,
    /// No nodes. Outcomes and counts are still reported.
    None,
}

/// Configuration of a [`Context`].
///
/// Usually read from a TOML file, every field is optional:
///
/// ```
/// let config = cpg_query::Config::from_toml_str(r#"
///     path_tracing = "start_and_end"
///     default_sensitivities = ["context_sensitive"]
///     [default_scope.interprocedural]
///     max_steps = 4
/// "#).unwrap();
/// assert_eq!(config.path_tracing, cpg_query::TraceLevel::StartAndEnd);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// How much of each path reachability results keep
    pub path_tracing: TraceLevel,
    /// Scope used by [`Context::flow_query`]
    pub default_scope: AnalysisScope,
    /// Sensitivities used by [`Context::flow_query`]
    pub default_sensitivities: Sensitivities,
    /// Emit a warning when a quantifier ranges over no nodes
    pub warn_on_vacuous: bool,
    /// Bound of the field access stack under field sensitivity
    pub max_field_depth: usize,
    /// Bound of the call stack under context sensitivity
    pub max_context_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path_tracing: TraceLevel::default(),
            default_scope: AnalysisScope::default(),
            default_sensitivities: Sensitivities::empty(),
            warn_on_vacuous: true,
            max_field_depth: 8,
            max_context_depth: 8,
        }
    }
}

impl Config {
    /// Parse and validate a configuration.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("Parsing query configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Reading configuration from {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("In {}", path.display()))
    }

    /// Read [`CONFIG_FILE_NAME`] from `dir` if it exists, otherwise use the
    /// defaults. A file that exists but is malformed is an error.
    pub fn load_or_default(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::from_toml_file(&path)
        } else {
            log::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Check the ranges of the numeric settings.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.max_field_depth == 0 {
            return Err(QueryError::InvalidConfig(
                "`max_field_depth` must be at least 1".to_owned(),
            ));
        }
        if self.max_context_depth == 0 {
            return Err(QueryError::InvalidConfig(
                "`max_context_depth` must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A path to a graph file from which a [`Context`] can be created.
///
/// Use [`Self::std`] for the default file name in a project directory or
/// [`Self::custom`] for any other file.
#[derive(Debug, Clone)]
pub struct GraphLocation(PathBuf);

impl GraphLocation {
    /// Use the default graph file name in the specified directory.
    pub fn std(dir: impl AsRef<Path>) -> Self {
        Self(dir.as_ref().join(GRAPH_FILE_NAME))
    }

    /// Use a completely custom path (directory and file name).
    pub fn custom(path: PathBuf) -> Self {
        Self(path)
    }

    /// The graph file.
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Builds a context with the configuration found next to the graph
    /// file (or the defaults), then runs the requirements.
    ///
    /// Emits any recorded diagnostic messages to stdout afterwards.
    pub fn with_context<A>(&self, prop: impl FnOnce(Arc<Context>) -> Result<A>) -> Result<A> {
        let dir = self.0.parent().unwrap_or_else(|| Path::new("."));
        self.with_context_configured(Config::load_or_default(dir)?, prop)
    }

    /// Like [`Self::with_context`] with an explicit configuration.
    pub fn with_context_configured<A>(
        &self,
        config: Config,
        prop: impl FnOnce(Arc<Context>) -> Result<A>,
    ) -> Result<A> {
        let ctx = Arc::new(self.build_context(config)?);
        let result = prop(ctx.clone())?;
        ctx.emit_diagnostics(std::io::stdout())?;
        Ok(result)
    }

    /// Read and parse this graph file, returning a [`Context`] suitable for
    /// evaluating requirements.
    ///
    /// Prefer using [`Self::with_context`] which takes care of emitting any
    /// diagnostic messages after the requirements are done.
    pub fn build_context(&self, config: Config) -> Result<Context> {
        // Only the first context installs the logger
        let _ = simple_logger::init_with_env();
        config.validate()?;
        let graph = ProgramGraph::canonical_read(&self.0)?;
        log::info!(
            "Loaded graph with {} nodes and {} edges from {}",
            graph.node_count(),
            graph.edge_count(),
            self.0.display()
        );
        Ok(Context::new(graph, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_validation() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.path_tracing, TraceLevel::Full);
        assert!(config.warn_on_vacuous);
        assert_eq!(config.default_scope, AnalysisScope::default());

        let config = Config::from_toml_str("default_scope = \"intraprocedural\"").unwrap();
        assert_eq!(config.default_scope, AnalysisScope::Intraprocedural);

        assert!(Config::from_toml_str("max_field_depth = 0").is_err());
        assert!(Config::from_toml_str(
            "[default_scope.interprocedural]\nmax_steps = -1"
        )
        .is_err());
        assert!(Config::from_toml_str("no_such_setting = true").is_err());
    }
}
