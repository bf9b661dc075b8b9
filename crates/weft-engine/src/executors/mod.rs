mod agent;
mod tool;
mod variable;

pub use agent::AgentExecutor;
pub use tool::ToolExecutor;
pub use variable::VariableExecutor;
