//! Gatepass analyzer - reference resolution, dependency graph, fix and
//! sign planning over a scanned bundle.

pub mod checker;
pub mod fix;
pub mod graph;
pub mod resolve;
pub mod sign;

pub use checker::{run_check, CheckConfig};
pub use fix::{plan_fixes, DefaultBuild, EvalStatus, Evaluation, FixRules, Rule};
pub use graph::{build_graph, DependencyGraph, ExternalRef, GraphBuild, UnresolvedRef};
pub use resolve::{ExemptionTable, Resolution, ResolveContext, RpathClass};
pub use sign::{
    plan_signing, EntitlementRule, EntitlementsMapFile, RawEntitlementRule, SignConfig, SignPlan,
};
