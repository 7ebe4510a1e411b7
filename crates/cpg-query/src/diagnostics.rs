//! Emit messages to the user running a set of requirements.
//!
//! Diagnostics follow a "keep going" strategy, similar to rustc. A failing
//! requirement does not stop the run. The message is recorded and the
//! remaining requirements are still evaluated, because every additional
//! finding is useful to the user. Recorded messages are emitted later, for
//! instance by [`Context::emit_diagnostics`].
//!
//! ## Emitting Messages
//!
//! The main interface is the [`Diagnostics`] trait which defines
//! [`error`][Diagnostics::error] for requirement failures and
//! [`warning`][Diagnostics::warning] for indicators that something may be
//! off without failing the run (for example a quantifier that ranged over
//! no nodes at all).
//!
//! The convenience macros [`assert_error!`](crate::assert_error) and
//! [`assert_warning!`](crate::assert_warning) only evaluate and emit their
//! message if the condition is `false`, much like [`assert!`].
//!
//! Messages can point at a graph node with the `node_*` family of methods.
//! The node's source location and code are then printed below the message.
//!
//! ## Scoping messages
//!
//! [`Context::named_requirement`] returns a wrapper that can be used the same
//! way as [`Context`], but every message it records carries the name of the
//! requirement. [`RequirementContext::named_combinator`] nests another scope.
//!
//! ```
//! use cpg_query::{assert_error, Config, Context};
//! use cpg_query::cpg_facade::{NodeKind, ProgramGraph};
//! use std::sync::Arc;
//!
//! let mut graph = ProgramGraph::new();
//! graph.add_named("main", NodeKind::Function);
//! let ctx = Arc::new(Context::new(graph, Config::default()));
//! ctx.clone().named_requirement("no leaks", |ctx| {
//!     ctx.named_combinator("count", |ctx| {
//!         assert_error!(ctx, 1 + 2 == 4, "Oh oh, fail!");
//!     })
//! });
//! let mut out = vec![];
//! assert!(!ctx.emit_diagnostics(&mut out).unwrap());
//! ```
//!
//! The message emitted above reads
//!
//! ```text
//! [requirement: no leaks] count error: Oh oh, fail!
//! ```

use colored::*;
use indexmap::IndexMap;

use std::io::BufRead;
use std::sync::{Arc, Mutex, PoisonError};
use std::{fmt, io::Write};

use cpg_facade::{Identifier, NodeId, SourceLocation};

use crate::Context;

/// Check the condition and emit a [`Diagnostics::error`] if it fails.
#[macro_export]
macro_rules! assert_error {
    ($ctx:expr, $cond: expr $(,)?) => {
        assert_error!($ctx, $cond, "Error: {}", stringify!($cond))
    };
    ($ctx:expr, $cond: expr, $msg:expr $(,)?) => {
        if !$cond {
            use $crate::diagnostics::Diagnostics;
            Diagnostics::error(&$ctx, $msg);
        }
    };
    ($ctx:expr, $cond: expr, $msg:expr, $($frag:expr),+ $(,)?) => {
        if !$cond {
            use $crate::diagnostics::Diagnostics;
            Diagnostics::error(&$ctx, format!($msg, $($frag),+));
        }
    };
}

/// Check the condition and emit a [`Diagnostics::warning`] if it fails.
#[macro_export]
macro_rules! assert_warning {
    ($ctx:expr, $cond: expr $(,)?) => {
        assert_warning!($ctx, $cond, "Warning: {}", stringify!($cond))
    };
    ($ctx:expr, $cond: expr, $msg:expr $(,)?) => {
        if !$cond {
            use $crate::diagnostics::Diagnostics;
            Diagnostics::warning(&$ctx, $msg);
        }
    };
    ($ctx:expr, $cond: expr, $msg:expr, $($frag:expr),+ $(,)?) => {
        if !$cond {
            use $crate::diagnostics::Diagnostics;
            Diagnostics::warning(&$ctx, format!($msg, $($frag),+));
        }
    };
}

/// Severity of a recorded diagnostic message
#[derive(Debug, Clone, Copy, strum::AsRefStr, Hash, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    /// The requirement failed.
    Error,
    /// The requirement may not operate as intended.
    Warning,
    /// Additional information for a diagnostic
    Note,
    /// Some helpful hint
    Help,
}

impl Severity {
    fn must_abort(self) -> bool {
        matches!(self, Severity::Error)
    }

    fn color(self) -> Color {
        match self {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
            Severity::Note => Color::Blue,
            Severity::Help => Color::Green,
        }
    }
}

/// Context provided to [`HasDiagnosticsBase::record`].
type DiagnosticContextStack = Vec<Identifier>;

/// Representation of a diagnostic message. You should not interact with this
/// type directly but use the methods on [`Diagnostics`] or
/// [`DiagnosticBuilder`] to create these.
#[derive(Debug, Hash, PartialEq, Eq)]
pub struct Diagnostic {
    context: DiagnosticContextStack,
    children: Vec<DiagnosticPart>,
}

impl Diagnostic {
    fn write(&self, w: &mut impl fmt::Write) -> fmt::Result {
        for ctx in self.context.iter().rev() {
            write!(w, "{ctx} ")?;
        }
        for c in &self.children {
            c.write(w)?;
        }
        Ok(())
    }

    /// Does this diagnostic fail the run?
    pub fn is_error(&self) -> bool {
        self.children.iter().any(|c| c.severity.must_abort())
    }
}

#[derive(Hash, PartialEq, Eq, Debug)]
struct DiagnosticPart {
    message: String,
    severity: Severity,
    snippet: Option<Box<NodeSnippet>>,
}

/// What we know about where a graph node comes from, captured when the
/// diagnostic is created.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeSnippet {
    node: String,
    location: Option<SourceLocation>,
    code: Option<String>,
}

impl NodeSnippet {
    /// Look up the node in the context's graph.
    pub fn of(ctx: &Context, node: NodeId) -> Self {
        let info = ctx.node_info(node);
        Self {
            node: ctx.describe_node(node).to_string(),
            location: info.and_then(|i| i.location.clone()),
            code: info.and_then(|i| i.code.clone()),
        }
    }
}

const TAB_SIZE: usize = 4;

fn line_length_while(s: &str, mut cont: impl FnMut(char) -> bool) -> usize {
    s.chars()
        .fold((false, 0), |(found, num), c| {
            if found || !cont(c) {
                (true, num)
            } else {
                let more = if c == '\t' { TAB_SIZE } else { 1 };
                (false, num + more)
            }
        })
        .1
}

/// Read one line of the file, `None` if that is not possible.
fn read_source_line(loc: &SourceLocation) -> Option<String> {
    let file = std::fs::File::open(&loc.file).ok()?;
    std::io::BufReader::new(file)
        .lines()
        .nth((loc.line as usize).checked_sub(1)?)?
        .ok()
}

impl DiagnosticPart {
    fn write(&self, s: &mut impl fmt::Write) -> fmt::Result {
        let coloring = self.severity.color();
        writeln!(
            s,
            "{}: {}",
            self.severity.as_ref().color(coloring),
            self.message
        )?;
        let Some(snippet) = &self.snippet else {
            return Ok(());
        };
        let Some(loc) = &snippet.location else {
            return writeln!(s, "  {} {}", "-->".blue(), snippet.node);
        };
        let lines = match &snippet.code {
            Some(code) => code.lines().map(str::to_owned).collect::<Vec<_>>(),
            None => read_source_line(loc).into_iter().collect(),
        };
        let start_line = loc.line as usize;
        let max_line_len = (start_line + lines.len()).to_string().len();
        let tab: String = " ".repeat(max_line_len);
        writeln!(s, "{tab}{} {loc} {}", "-->".blue(), snippet.node)?;
        writeln!(s, "{tab} {}", "|".blue())?;
        for (i, line) in lines.iter().enumerate() {
            let line_num = start_line + i;
            writeln!(
                s,
                "{:<max_line_len$} {} {}",
                &line_num.to_string().blue(),
                "|".blue(),
                line.replace('\t', &" ".repeat(TAB_SIZE))
            )?;
            if i == 0 {
                let col = (loc.col as usize).saturating_sub(1);
                let prefix = line.get(..col).unwrap_or(line);
                let start = line_length_while(prefix, |_| true);
                let end = line_length_while(line, |_| true);
                write!(s, "{tab} {} {:start$}", "|".blue(), "")?;
                for _ in start..end {
                    write!(s, "{}", "^".color(coloring))?;
                }
                writeln!(s)?;
            }
        }
        writeln!(s, "{tab} {}", "|".blue())
    }
}

/// Facility to create structured diagnostics with multi-part messages. New
/// builders are created with methods on [`Diagnostics`]. `struct_<severity>`
/// creates a main diagnostic with only a message and `struct_node_<severity>`
/// one that also shows the location of a graph node.
///
/// The builder allows chaining additional sub diagnostics to the main
/// diagnostic. Analogous to the initializers the `with_<severity>` family of
/// functions adds simple messages and `with_node_<severity>` adds messages
/// about a node.
///
/// Make sure to call [`Self::emit`] after construction, otherwise the
/// diagnostic is not shown.
#[derive(Debug)]
#[must_use = "you must call `emit`, otherwise the message is not shown"]
pub struct DiagnosticBuilder<'a, A: ?Sized> {
    diagnostic: Diagnostic,
    base: &'a A,
}

impl<'a, A: ?Sized> DiagnosticBuilder<'a, A> {
    fn init(message: String, severity: Severity, snippet: Option<NodeSnippet>, base: &'a A) -> Self {
        DiagnosticBuilder {
            diagnostic: Diagnostic {
                context: vec![],
                children: vec![DiagnosticPart {
                    message,
                    severity,
                    snippet: snippet.map(Box::new),
                }],
            },
            base,
        }
    }

    fn with_child(
        &mut self,
        message: impl Into<String>,
        severity: Severity,
        snippet: Option<NodeSnippet>,
    ) -> &mut Self {
        self.diagnostic.children.push(DiagnosticPart {
            message: message.into(),
            severity,
            snippet: snippet.map(Box::new),
        });
        self
    }
}

impl<'a, A: HasDiagnosticsBase + ?Sized> DiagnosticBuilder<'a, A> {
    /// Queue the diagnostic for display to the user.
    pub fn emit(self) {
        self.base.record(self.diagnostic)
    }

    /// Append a help message to the diagnostic.
    pub fn with_help(&mut self, message: impl Into<String>) -> &mut Self {
        self.with_child(message, Severity::Help, None)
    }

    /// Append a help message and the location of a graph node.
    pub fn with_node_help(&mut self, node: NodeId, message: impl Into<String>) -> &mut Self {
        self.with_node(Severity::Help, node, message.into())
    }

    /// Append a warning to the diagnostic.
    pub fn with_warning(&mut self, message: impl Into<String>) -> &mut Self {
        self.with_child(message, Severity::Warning, None)
    }

    /// Append a warning and the location of a graph node.
    pub fn with_node_warning(&mut self, node: NodeId, message: impl Into<String>) -> &mut Self {
        self.with_node(Severity::Warning, node, message.into())
    }

    /// Append a note to the diagnostic.
    pub fn with_note(&mut self, message: impl Into<String>) -> &mut Self {
        self.with_child(message, Severity::Note, None)
    }

    /// Append a note and the location of a graph node.
    pub fn with_node_note(&mut self, node: NodeId, message: impl Into<String>) -> &mut Self {
        self.with_node(Severity::Note, node, message.into())
    }

    fn with_node(&mut self, severity: Severity, node: NodeId, message: String) -> &mut Self {
        let snippet = NodeSnippet::of(self.base.as_ctx(), node);
        self.with_child(message, severity, Some(snippet))
    }
}

/// Low level machinery for diagnostics.
///
/// As a user you should only be using methods from [`Diagnostics`]. It
/// may however be helpful to look at the implementors of this trait, as those
/// are also implementors of [`Diagnostics`].
pub trait HasDiagnosticsBase {
    /// Base function for recording new diagnostics.
    ///
    /// This should be used by implementors of new wrappers, users should use
    /// high level functions like [`Diagnostics::error`] or
    /// [`Diagnostics::warning`] instead.
    fn record(&self, diagnostic: Diagnostic);

    /// Access to [`Context`], usually also available via [`std::ops::Deref`].
    fn as_ctx(&self) -> &Context;
}

impl<T: HasDiagnosticsBase + ?Sized> HasDiagnosticsBase for Arc<T> {
    fn record(&self, diagnostic: Diagnostic) {
        let t: &T = self.as_ref();
        t.record(diagnostic)
    }

    fn as_ctx(&self) -> &Context {
        self.as_ref().as_ctx()
    }
}

impl<T: HasDiagnosticsBase + ?Sized> HasDiagnosticsBase for &'_ T {
    fn as_ctx(&self) -> &Context {
        (*self).as_ctx()
    }

    fn record(&self, diagnostic: Diagnostic) {
        (*self).record(diagnostic)
    }
}

/// User-facing methods to emit diagnostics.
///
/// This is how any types implementing [`HasDiagnosticsBase`] should actually be
/// used.
pub trait Diagnostics: HasDiagnosticsBase {
    /// Initialize a diagnostic builder for an error.
    ///
    /// This will fail the run.
    fn struct_error(&self, msg: impl Into<String>) -> DiagnosticBuilder<'_, Self> {
        DiagnosticBuilder::init(msg.into(), Severity::Error, None, self)
    }

    /// Initialize a diagnostic builder for a warning.
    ///
    /// Does not fail the run.
    fn struct_warning(&self, msg: impl Into<String>) -> DiagnosticBuilder<'_, Self> {
        DiagnosticBuilder::init(msg.into(), Severity::Warning, None, self)
    }

    /// Initialize a diagnostic builder for a help message.
    fn struct_help(&self, msg: impl Into<String>) -> DiagnosticBuilder<'_, Self> {
        DiagnosticBuilder::init(msg.into(), Severity::Help, None, self)
    }

    /// Initialize a diagnostic builder for a note
    fn struct_note(&self, msg: impl Into<String>) -> DiagnosticBuilder<'_, Self> {
        DiagnosticBuilder::init(msg.into(), Severity::Note, None, self)
    }

    /// Emit a message that is severe enough that it causes the run to fail.
    fn error(&self, msg: impl Into<String>) {
        self.struct_error(msg).emit()
    }

    /// Emit a message that indicates to the user that the requirement might
    /// be wrong but could be correct.
    fn warning(&self, msg: impl Into<String>) {
        self.struct_warning(msg).emit()
    }

    /// Emit a message that provides additional information to the user.
    fn note(&self, msg: impl Into<String>) {
        self.struct_note(msg).emit()
    }

    /// Emit a message that suggests something to the user.
    fn help(&self, msg: impl Into<String>) {
        self.struct_help(msg).emit()
    }

    /// Initialize a diagnostic builder for an error with the location of a
    /// graph node.
    ///
    /// This will fail the run.
    fn struct_node_error(&self, node: NodeId, msg: impl Into<String>) -> DiagnosticBuilder<'_, Self> {
        struct_node_diagnostic(self, node, Severity::Error, msg)
    }

    /// Initialize a diagnostic builder for a warning with the location of a
    /// graph node.
    ///
    /// This will not fail the run.
    fn struct_node_warning(
        &self,
        node: NodeId,
        msg: impl Into<String>,
    ) -> DiagnosticBuilder<'_, Self> {
        struct_node_diagnostic(self, node, Severity::Warning, msg)
    }

    /// Initialize a diagnostic builder for a note with the location of a graph
    /// node.
    fn struct_node_note(&self, node: NodeId, msg: impl Into<String>) -> DiagnosticBuilder<'_, Self> {
        struct_node_diagnostic(self, node, Severity::Note, msg)
    }

    /// Emit an error, failing the run, with the location of a graph node.
    fn node_error(&self, node: NodeId, msg: impl Into<String>) {
        self.struct_node_error(node, msg).emit()
    }

    /// Emit a warning, that does not fail the run, with the location of a
    /// graph node.
    fn node_warning(&self, node: NodeId, msg: impl Into<String>) {
        self.struct_node_warning(node, msg).emit()
    }

    /// Emit a note with the location of a graph node.
    fn node_note(&self, node: NodeId, msg: impl Into<String>) {
        self.struct_node_note(node, msg).emit()
    }
}

fn struct_node_diagnostic<B: HasDiagnosticsBase + ?Sized>(
    base: &B,
    node: NodeId,
    severity: Severity,
    msg: impl Into<String>,
) -> DiagnosticBuilder<'_, B> {
    let snippet = NodeSnippet::of(base.as_ctx(), node);
    DiagnosticBuilder::init(msg.into(), severity, Some(snippet), base)
}

impl<T: HasDiagnosticsBase + ?Sized> Diagnostics for T {}

/// A context for a named requirement.
///
/// You may call any method and access any field defined on [`Context`]. In
/// addition all diagnostics messages emitted from this struct will carry the
/// name of the requirement.
///
/// See the [module level documentation][self] for more information on
/// diagnostic context management.
pub struct RequirementContext {
    name: Identifier,
    inner: Arc<dyn HasDiagnosticsBase>,
}

impl std::ops::Deref for RequirementContext {
    type Target = Context;
    fn deref(&self) -> &Self::Target {
        self.as_ctx()
    }
}

impl RequirementContext {
    /// Add a named combinator to the diagnostic context.
    pub fn named_combinator<A>(
        self: Arc<Self>,
        name: impl Into<Identifier>,
        computation: impl FnOnce(Arc<CombinatorContext>) -> A,
    ) -> A {
        computation(Arc::new(CombinatorContext::new(name, self)))
    }

    /// Name of the requirement.
    pub fn name(&self) -> Identifier {
        self.name
    }
}

impl HasDiagnosticsBase for RequirementContext {
    fn record(&self, mut diagnostic: Diagnostic) {
        diagnostic
            .context
            .push(Identifier::new_intern(&format!("[requirement: {}]", self.name)));
        self.inner.record(diagnostic)
    }

    fn as_ctx(&self) -> &Context {
        self.inner.as_ctx()
    }
}

/// A context for combinators.
///
/// You may call any method and access any field defined on [`Context`]. In
/// addition all diagnostics messages emitted from this struct will carry the
/// name of the combinator.
pub struct CombinatorContext {
    name: Identifier,
    inner: Arc<dyn HasDiagnosticsBase>,
}

impl std::ops::Deref for CombinatorContext {
    type Target = Context;
    fn deref(&self) -> &Self::Target {
        self.as_ctx()
    }
}

impl CombinatorContext {
    /// Nest another named combinator into the diagnostic context.
    pub fn named_combinator<A>(
        self: Arc<Self>,
        name: impl Into<Identifier>,
        computation: impl FnOnce(Arc<CombinatorContext>) -> A,
    ) -> A {
        computation(Arc::new(Self::new(name, self)))
    }

    pub(crate) fn new(name: impl Into<Identifier>, inner: Arc<dyn HasDiagnosticsBase>) -> Self {
        CombinatorContext {
            name: name.into(),
            inner,
        }
    }
}

impl HasDiagnosticsBase for CombinatorContext {
    fn record(&self, mut diagnostic: Diagnostic) {
        diagnostic.context.push(self.name);
        self.inner.record(diagnostic)
    }

    fn as_ctx(&self) -> &Context {
        self.inner.as_ctx()
    }
}

impl Context {
    /// Add a requirement to the diagnostic context.
    ///
    /// See the [module level documentation][self] for more information on
    /// diagnostic context management.
    pub fn named_requirement<A>(
        self: Arc<Self>,
        name: impl Into<Identifier>,
        requirement: impl FnOnce(Arc<RequirementContext>) -> A,
    ) -> A {
        requirement(Arc::new(RequirementContext {
            name: name.into(),
            inner: self as Arc<_>,
        }))
    }

    /// Nest a named combinator into the diagnostic context.
    pub fn named_combinator<A>(
        self: Arc<Self>,
        name: impl Into<Identifier>,
        computation: impl FnOnce(Arc<CombinatorContext>) -> A,
    ) -> A {
        computation(Arc::new(CombinatorContext::new(name, self)))
    }
}

/// Base database of emitted diagnostics.
#[derive(Debug, Default)]
pub(crate) struct DiagnosticsRecorder(Mutex<IndexMap<Diagnostic, ()>>);

struct DisplayDiagnostic<'a>(&'a Diagnostic);

impl<'a> fmt::Display for DisplayDiagnostic<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.write(f)
    }
}

impl DiagnosticsRecorder {
    /// Emit queued diagnostics, draining the internal queue of diagnostics.
    ///
    /// A return `true` means the program may continue, on `false` it should be
    /// aborted.
    pub(crate) fn emit(&self, mut w: impl Write) -> std::io::Result<bool> {
        let w = &mut w;
        let mut can_continue = true;
        let drained = std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner));
        for (diag, ()) in drained {
            writeln!(w, "{}", DisplayDiagnostic(&diag))?;
            can_continue &= !diag.is_error();
        }
        Ok(can_continue)
    }

    fn insert(&self, diagnostic: Diagnostic) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(diagnostic, ());
    }

    /// Number of queued diagnostics.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl HasDiagnosticsBase for Context {
    /// Record a diagnostic message.
    fn record(&self, diagnostic: Diagnostic) {
        self.diagnostics.insert(diagnostic);
    }

    fn as_ctx(&self) -> &Context {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::linear_chain;

    #[test]
    fn test_line_length() {
        assert_eq!(line_length_while("  ", |_| true), 2);
        assert_eq!(line_length_while("  . ", |_| true), 4);
        assert_eq!(line_length_while("  . ", char::is_whitespace), 2);
        assert_eq!(line_length_while("\t", |_| true), TAB_SIZE);
        assert_eq!(line_length_while("\t . ", |_| true), TAB_SIZE + 3);
        assert_eq!(line_length_while(" . \t", |_| true), TAB_SIZE + 3);
        assert_eq!(line_length_while("\t. ", char::is_whitespace), TAB_SIZE);
    }

    #[test]
    fn duplicates_are_merged_and_scopes_prefix() {
        let (ctx, [a, ..]) = linear_chain();
        let ctx = Arc::new(ctx);
        for _ in 0..2 {
            ctx.clone().named_requirement("secrets", |ctx| {
                ctx.node_error(a, "leaks");
            });
        }
        ctx.warning("just a warning");
        assert_eq!(ctx.diagnostics.len(), 2);
        let mut out = vec![];
        let may_continue = ctx.emit_diagnostics(&mut out).unwrap();
        assert!(!may_continue);
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("[requirement: secrets]"));
        assert!(out.contains("leaks"));
        assert!(out.contains("main.py:1:5"));
        assert!(out.contains("secret = load()"));
        assert_eq!(ctx.diagnostics.len(), 0);
    }

    #[test]
    fn warnings_do_not_abort() {
        let (ctx, _) = linear_chain();
        assert_warning!(ctx, false, "suspicious");
        assert_error!(ctx, true, "never shown");
        let mut out = vec![];
        assert!(ctx.emit_diagnostics(&mut out).unwrap());
        assert!(String::from_utf8(out).unwrap().contains("suspicious"));
    }
}
