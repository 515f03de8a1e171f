//! Device group selection rules, policy statements, and compilation (§4.6)
//!
//! Groups select devices by a boolean rule over Thing attributes; each group
//! references a named policy whose ALLOW statements are expanded into
//! concrete [`Permission`]s during [`PolicyCompiler::compile`].

pub mod compiler;
pub mod grammar;
pub mod variables;

pub use compiler::{Effect, GroupConfiguration, GroupDefinition, Permission, PolicyCompiler, PolicyStatement};
pub use grammar::Expr;
pub use variables::PolicyVariable;
