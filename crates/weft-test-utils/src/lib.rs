//! Mocks and fixtures shared by the Weft test suites.

pub mod fixtures;
pub mod llm;
pub mod tools;

pub use fixtures::*;
pub use llm::{RecordedRequest, ScriptedLlm};
pub use tools::{
    EchoTool, FailingTool, MemoryAgentStore, RecordedCall, RecordingTool, SlowTool, StaticCredentials,
};
