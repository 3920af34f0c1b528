use crate::probe::rule::Rule;
use crate::probe::types::{ActionDescriptor, HandlerDescriptor};

/// Build the rule chain that governs `action`: global rules, then the
/// handler's rules, then the action's own rules, each in declaration order.
/// A rule declared in several scopes runs once per declaration.
pub fn assemble(global: &[Rule], handler: &HandlerDescriptor, action: &ActionDescriptor) -> Vec<Rule> {
    let mut chain = Vec::with_capacity(global.len() + handler.rules().len() + action.rules().len());
    chain.extend_from_slice(global);
    chain.extend_from_slice(handler.rules());
    chain.extend_from_slice(action.rules());
    chain
}
