use cpg_query::{
    algo::{AnalysisType, FlowQuery},
    and, any_of, constant,
    cpg_facade::{GraphToFollow, NodeKind, ProgramGraph},
    not, AssumptionKind, Operator, Requirements, Suppression, Suppressions, Value,
};
use helpers::{emitted, ensure, node, vars, Result, Test};

mod helpers;

/// Two secrets, one encrypted before it is logged and one logged in the
/// clear.
fn logging_program() -> ProgramGraph {
    let mut g = ProgramGraph::new();
    let [secret1, secret2, log1, log2] = vars(&mut g, ["secret1", "secret2", "log1", "log2"]);
    let encrypt = g.add_named("encrypt", NodeKind::Call);
    g.add_data_flow(secret1, encrypt);
    g.add_data_flow(encrypt, log1);
    g.add_data_flow(secret2, log2);
    for s in [secret1, secret2] {
        g.add_label(s, "Secret");
    }
    for l in [log1, log2] {
        g.add_label(l, "Log");
    }
    g.add_label(encrypt, "Encrypt");
    g
}

fn no_plaintext_logging() -> Requirements {
    Requirements::new().requirement("no_plaintext_logging", |ctx| {
        ctx.all("Secret", |secret| {
            let leak = ctx.data_flow_until(
                secret,
                FlowQuery::may(),
                |n| ctx.has_label(n, "Log"),
                |n| ctx.has_label(n, "Encrypt"),
            )?;
            Ok(not(leak))
        })
    })
}

#[test]
fn quantified_requirement_names_the_leak() -> Result<()> {
    Test::new(logging_program())?.run(|ctx| {
        let results = no_plaintext_logging().evaluate(&ctx, &Suppressions::new())?;
        ensure!(!results.all_hold());
        let tree = &results
            .get("no_plaintext_logging")
            .expect("evaluated")
            .tree;
        // One branch per secret, in graph order
        let branches = tree
            .children()
            .iter()
            .map(|c| (c.value().clone(), c.node()))
            .collect::<Vec<_>>();
        let [secret1, secret2] = ["secret1", "secret2"].map(|n| node(&ctx, n));
        ensure!(
            branches == [(Value::Bool(true), Some(secret1)), (Value::Bool(false), Some(secret2))]
        );
        ensure!(tree
            .all_assumptions()
            .iter()
            .any(|a| a.kind == AssumptionKind::ExhaustiveEnumeration));

        results.report(ctx.clone());
        let (ok, out) = emitted(&ctx)?;
        ensure!(!ok);
        ensure!(out.contains("[requirement: no_plaintext_logging]"));
        ensure!(out.contains("secret2 -> log2"), "{out}");
        ensure!(!out.contains("secret1 -> encrypt"), "{out}");
        ensure!(out.contains("assuming"));
        Ok(())
    })
}

#[test]
fn suppressing_a_reviewed_secret() -> Result<()> {
    Test::new(logging_program())?.run(|ctx| {
        let secret2 = node(&ctx, "secret2");
        let suppressions = Suppressions::new().with(Suppression::new(
            move |n| n.node == Some(secret2) && n.operator == Operator::Not,
            true,
            "log2 is a debug build only sink",
        ));
        let results = no_plaintext_logging().evaluate(&ctx, &suppressions)?;
        ensure!(results.all_hold());

        let result = results.get("no_plaintext_logging").expect("evaluated");
        ensure!(result.suppression.applied.len() == 1);
        let applied = &result.suppression.applied[0];
        ensure!(applied.position == [1]);
        ensure!(!applied.record.original && applied.record.overridden);
        // The override stays visible on the node itself
        let branch = &result.tree.children()[1];
        ensure!(branch.override_record() == Some(&applied.record));

        results.report(ctx.clone());
        let (ok, out) = emitted(&ctx)?;
        ensure!(ok);
        ensure!(out.contains("overridden from false to true: log2 is a debug build only sink"));
        Ok(())
    })
}

#[test]
fn vacuous_quantifiers() -> Result<()> {
    Test::new(logging_program())?.run(|ctx| {
        let all = ctx.all("Password", |_| Ok(constant(false)))?;
        let exists = ctx.exists("Password", |_| Ok(constant(true)))?;
        ensure!(all.holds() && all.children().is_empty());
        ensure!(!exists.holds() && exists.children().is_empty());
        let (ok, out) = emitted(&ctx)?;
        ensure!(ok);
        ensure!(out.contains("Label Password is mentioned in a requirement"));
        ensure!(out.contains("the result is vacuous"));
        Ok(())
    })
}

#[test]
fn vacuity_warnings_can_be_disabled() -> Result<()> {
    let mut test = Test::new(logging_program())?;
    test.context_config().warn_on_vacuous = false;
    test.run(|ctx| {
        // The selection is empty although the label exists
        let all = ctx.all_extended("Secret", |_| false, |_| Ok(constant(false)))?;
        ensure!(all.holds());
        let (_, out) = emitted(&ctx)?;
        ensure!(!out.contains("vacuous"), "{out}");
        Ok(())
    })
}

#[test]
fn both_operands_are_kept_as_evidence() -> Result<()> {
    Test::new(logging_program())?.run(|ctx| {
        let [secret1, secret2] = ["secret1", "secret2"].map(|n| node(&ctx, n));
        let is_log = |n| ctx.has_label(n, "Log");
        let tree = and(
            ctx.data_flow(secret1, FlowQuery::may(), is_log)?,
            ctx.data_flow(secret2, FlowQuery::must(), |n| n == secret1)?,
        );
        ensure!(!tree.holds());
        ensure!(tree.children().len() == 2);
        ensure!(tree.children()[0].value() == &Value::Bool(true));
        ensure!(tree.children()[0].operator() == Operator::Reach(AnalysisType::May));

        let some = any_of([
            ctx.data_flow(secret2, FlowQuery::may(), |n| n == secret1)?,
            ctx.data_flow(secret2, FlowQuery::may(), is_log)?,
        ]);
        ensure!(some.holds());
        ensure!(some.explanation() == Some("1 of 2 operands hold"));
        Ok(())
    })
}

#[test]
fn unused_secret_is_checked_not_refused() -> Result<()> {
    // The only flows in this program are control flow
    let mut g = ProgramGraph::new();
    let [secret, log] = vars(&mut g, ["secret", "log"]);
    g.add_control_flow(secret, log);
    g.add_label(secret, "Secret");
    g.add_label(log, "Log");
    Test::new(g)?.run(|ctx| {
        let is_log = |n| ctx.has_label(n, "Log");
        let never_logged =
            ctx.all("Secret", |s| Ok(not(ctx.data_flow(s, FlowQuery::may(), is_log)?)))?;
        ensure!(never_logged.holds());
        ensure!(never_logged.children().len() == 1);

        let always_logged = ctx.all("Secret", |s| ctx.data_flow(s, FlowQuery::must(), is_log))?;
        ensure!(!always_logged.holds());
        let reach = &always_logged.children()[0];
        ensure!(reach.children().len() == 1);
        ensure!(reach.children()[0].value() == &Value::Bool(false));
        ensure!(reach.children()[0].path() == [node(&ctx, "secret")]);
        Ok(())
    })
}

#[test]
fn failing_requirement_aborts_on_misuse() -> Result<()> {
    let mut g = logging_program();
    g.omit(GraphToFollow::ControlFlowOrder);
    Test::new(g)?.run(|ctx| {
        let requirements = no_plaintext_logging().requirement("uses_control_flow", |ctx| {
            let secret = node(ctx, "secret1");
            ctx.execution_path(secret, FlowQuery::may(), |_| true)
        });
        let err = requirements
            .evaluate(&ctx, &Suppressions::new())
            .unwrap_err();
        ensure!(err.to_string().contains("execution_path"));
        Ok(())
    })
}
