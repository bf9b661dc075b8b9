pub mod checker;
pub mod engine;
pub mod executor;
pub mod executors;
pub mod graph;
pub mod registry;
pub mod response;
pub mod schema;
pub mod template;

pub use checker::{BlockChecker, Verdict};
pub use engine::WorkflowEngine;
pub use executor::{BlockContext, BlockExecutor, BlockOutput};
pub use executors::{AgentExecutor, ToolExecutor, VariableExecutor};
pub use graph::ExecutionPlan;
pub use registry::ExecutorRegistry;
pub use response::build_api_response;
