pub mod builtin;
pub mod credentials;
pub mod integration;
pub mod invoker;
pub mod registry;

pub use credentials::ConfigCredentials;
pub use integration::integration_for;
pub use invoker::{InvocationContext, ToolInvoker};
pub use registry::ToolRegistry;
