//! Graph algorithms: the path search engine, its precision policies and the
//! reachability predicates built on top of it.

pub mod reach;
pub mod search;
pub mod sensitivity;

pub use reach::{AnalysisType, FlowQuery};
pub use search::{
    search, AnalysisScope, PathOutcome, SearchParams, SearchPath, SearchResult, StopDecision,
};
pub use sensitivity::{Sensitivities, Sensitivity};
