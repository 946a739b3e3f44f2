//! Execution engine
//!
//! The driver walks the workflow graph one node at a time: pre-pipeline,
//! node executor, post-pipeline, repeat until a terminal result. Everything
//! the executors need travels on the [`ExecutionContext`].

pub mod context;
pub mod driver;
pub mod executors;
pub mod forkjoin;
pub mod pipeline;

pub use context::{
    cancel_pair, CancelFlag, CancelHandle, ExecutionContext, ExecutionContextBuilder,
    ExecutionObserver, NoopObserver,
};
pub use driver::{drive, ExecutionResult};
pub use executors::generic::{GenericHandler, GenericHandlerRegistry};
pub use forkjoin::{ForkBranchResult, ForkJoinContext, ForkTable};
