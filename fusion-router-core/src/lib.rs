//! Core of the fusion router: plans a client operation against composed
//! schema metadata and executes the resulting plan across subgraphs.
//!
//! Planning partitions the operation into per-subgraph steps, binds every
//! entity resolver argument to a value source, and renders one
//! sub-operation per step. Execution runs the plan's dependency
//! generations, fans entity fetches out per parent value, auto-pages
//! connections to exhaustion, and merges every response back into a
//! single client result.

#[macro_export]
macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \n\
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

#[macro_export]
macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \n\
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

mod cache;
mod context;
mod error;
mod execution;
mod json_ext;
mod metadata;
mod query_cache;
mod query_planner;
mod request;
mod response;
mod service_registry;
mod spec;

pub use cache::*;
pub use context::*;
pub use error::*;
pub use execution::batch::BatchExecutor;
pub use json_ext::*;
pub use metadata::*;
pub use query_cache::*;
pub use query_planner::*;
pub use request::*;
pub use response::*;
pub use service_registry::*;
pub use spec::*;

/// Reexports for the rest of the crate and for integration tests.
pub mod prelude {
    pub mod graphql {
        pub use crate::*;
    }
}
