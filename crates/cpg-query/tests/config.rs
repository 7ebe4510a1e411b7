use cpg_query::{
    algo::{AnalysisScope, AnalysisType, FlowQuery},
    cpg_facade::ProgramGraph,
    GraphLocation, TraceLevel,
};
use helpers::{ensure, node, vars, Result, Test};

mod helpers;

fn long_chain() -> ProgramGraph {
    let mut g = ProgramGraph::new();
    let nodes = vars(&mut g, ["a", "b", "c", "d", "e"]);
    for w in nodes.windows(2) {
        g.add_data_flow(w[0], w[1]);
    }
    g
}

#[test]
fn tracing_level_from_file() -> Result<()> {
    let mut test = Test::new(long_chain())?;
    test.with_config_file("path_tracing = \"start_and_end\"");
    test.run(|ctx| {
        ensure!(ctx.config().path_tracing == TraceLevel::StartAndEnd);
        let [a, e] = ["a", "e"].map(|n| node(&ctx, n));
        let tree = ctx.data_flow(a, FlowQuery::may(), |n| n == e)?;
        ensure!(tree.holds());
        ensure!(tree.children()[0].path() == [a, e]);
        // The explanation still names the whole path
        ensure!(tree.children()[0]
            .explanation()
            .is_some_and(|x| x.contains("a -> b -> c -> d -> e")));
        Ok(())
    })
}

#[test]
fn default_scope_from_file() -> Result<()> {
    let mut test = Test::new(long_chain())?;
    test.with_config_file("default_scope = \"intraprocedural\"");
    test.run(|ctx| {
        let q = ctx.flow_query(AnalysisType::Must);
        ensure!(q == FlowQuery::must().intraprocedural());
        ensure!(q.scope == AnalysisScope::Intraprocedural);
        Ok(())
    })
}

#[test]
fn malformed_configuration_is_rejected() -> Result<()> {
    for bad in [
        "[default_scope.interprocedural]\nmax_steps = -3",
        "max_context_depth = 0",
        "path_tracing = \"verbose\"",
    ] {
        let mut test = Test::new(long_chain())?;
        test.with_config_file(bad);
        ensure!(test.run(|_| Ok(())).is_err(), "accepted {bad:?}");
    }
    Ok(())
}

#[test]
fn missing_graph_is_an_error() {
    let location = GraphLocation::custom("/nonexistent/cpg.json".into());
    assert!(location.with_context(|_| Ok(())).is_err());
}
