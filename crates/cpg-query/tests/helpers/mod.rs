#![allow(dead_code)]

use std::{
    collections::hash_map::DefaultHasher,
    env, fs,
    hash::{Hash, Hasher},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::SystemTime,
};

pub use anyhow::{ensure, Result};

use cpg_query::{
    cpg_facade::{NodeId, NodeKind, ProgramGraph},
    Config, Context, GraphLocation, CONFIG_FILE_NAME,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temporary_directory() -> Result<PathBuf> {
    let secs = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;
    let mut hasher = DefaultHasher::new();
    secs.hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    COUNTER.fetch_add(1, Ordering::SeqCst).hash(&mut hasher);
    let short_hash = hasher.finish() % 0x1_000_000;
    Ok(env::temp_dir().join(format!("cpg-query-test-{short_hash:06x}")))
}

/// A builder for integration tests.
///
/// The graph is written to a fresh directory and read back through
/// [`GraphLocation`], the same way an analysis run would load it.
pub struct Test {
    graph: ProgramGraph,
    tempdir: PathBuf,
    context_config: Option<Config>,
    config_file: Option<String>,
}

impl Test {
    pub fn new(graph: ProgramGraph) -> Result<Self> {
        Ok(Self {
            graph,
            tempdir: temporary_directory()?,
            context_config: None,
            config_file: None,
        })
    }

    /// Use this configuration instead of looking for a file.
    pub fn context_config(&mut self) -> &mut Config {
        self.context_config.get_or_insert_with(Config::default)
    }

    /// Write a configuration file next to the graph.
    pub fn with_config_file(&mut self, toml: impl Into<String>) -> &mut Self {
        let res = self.config_file.replace(toml.into());
        if let Some(prior) = res {
            panic!("Duplicate setting of the configuration file. Found prior:\n{prior}");
        }
        self
    }

    fn populate(&self) -> Result<GraphLocation> {
        fs::create_dir_all(&self.tempdir)?;
        let location = GraphLocation::std(&self.tempdir);
        self.graph.canonical_write(location.path())?;
        if let Some(config) = &self.config_file {
            fs::write(self.tempdir.join(CONFIG_FILE_NAME), config)?;
        }
        Ok(location)
    }

    pub fn run<A>(self, test_function: impl FnOnce(Arc<Context>) -> Result<A>) -> Result<A> {
        let location = self.populate()?;
        let ret = match self.context_config {
            Some(config) => location.with_context_configured(config, test_function),
            None => location.with_context(test_function),
        };
        let _ = fs::remove_dir_all(&self.tempdir);
        ret
    }
}

/// Add a variable node for each name.
pub fn vars<const N: usize>(g: &mut ProgramGraph, names: [&str; N]) -> [NodeId; N] {
    names.map(|n| g.add_named(n, NodeKind::Variable))
}

/// The unique node with this name.
pub fn node(ctx: &Context, name: &str) -> NodeId {
    let mut found = ctx.nodes_named(name);
    let n = found.next().unwrap_or_else(|| panic!("no node named {name}"));
    assert!(found.next().is_none(), "more than one node named {name}");
    n
}

/// Drain the diagnostics into a string, returning whether the run may
/// continue.
pub fn emitted(ctx: &Context) -> Result<(bool, String)> {
    let mut out = vec![];
    let ok = ctx.emit_diagnostics(&mut out)?;
    Ok((ok, String::from_utf8(out)?))
}
