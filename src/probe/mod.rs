//! Speculative authorization: decide whether the caller of the current
//! request would pass the authorization rules of some action, without
//! dispatching to it.
//!
//! Resolution runs in the same order as dispatch: the target handler is
//! found by name (or is the current one), its descriptor yields the action,
//! and the global, handler and action rules are evaluated in that order
//! until one denies.

pub mod chain;
pub mod condition;
pub mod engine;
pub mod errors;
pub mod host;
pub mod loader;
pub mod policy;
pub mod resolve;
pub mod rule;
pub mod types;
pub mod web;

pub use engine::Authorizer;
pub use errors::{ProbeError, RuleError};
pub use host::{DeclaredHandler, DescriptorCache, Handler, HandlerHost, HandlerRegistry};
pub use rule::{AsyncAuthorizationRule, AuthorizationRule, Rule};
pub use types::{
    ActionDescriptor, HandlerDescriptor, Principal, ProbeContext, RequestContext, RequestData,
};
