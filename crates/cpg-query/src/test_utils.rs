use cpg_facade::{NodeId, NodeInfo, NodeKind, ProgramGraph, SourceLocation};

use crate::{Config, Context};

/// `secret -> tmp -> send`, with `secret` labeled `Secret` and `send`
/// labeled `Sink`.
pub fn linear_chain_graph() -> ProgramGraph {
    let mut g = ProgramGraph::new();
    let a = g.add_node(
        NodeInfo::new("secret", NodeKind::Variable)
            .with_code("secret = load()")
            .with_location(SourceLocation {
                file: "main.py".to_owned(),
                line: 1,
                col: 5,
            }),
    );
    let b = g.add_named("tmp", NodeKind::Variable);
    let c = g.add_named("send", NodeKind::Call);
    g.add_data_flow(a, b);
    g.add_data_flow(b, c);
    g.add_label(a, "Secret");
    g.add_label(c, "Sink");
    g
}

pub fn linear_chain() -> (Context, [NodeId; 3]) {
    let g = linear_chain_graph();
    let nodes = ["secret", "tmp", "send"].map(|n| g.nodes_named(n).next().unwrap());
    (Context::new(g, Config::default()), nodes)
}

/// `a -> b -> c` and `a -> d`, every node labeled `Value`.
pub fn branching_graph() -> ProgramGraph {
    let mut g = ProgramGraph::new();
    let [a, b, c, d] = ["a", "b", "c", "d"].map(|n| g.add_named(n, NodeKind::Variable));
    g.add_data_flow(a, b);
    g.add_data_flow(b, c);
    g.add_data_flow(a, d);
    for n in [a, b, c, d] {
        g.add_label(n, "Value");
    }
    g
}

pub fn branching() -> (Context, [NodeId; 4]) {
    let g = branching_graph();
    let nodes = ["a", "b", "c", "d"].map(|n| g.nodes_named(n).next().unwrap());
    (Context::new(g, Config::default()), nodes)
}
