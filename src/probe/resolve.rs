use std::sync::Arc;

use crate::probe::errors::ProbeError;
use crate::probe::host::{Handler, HandlerHost};
use crate::probe::types::{ActionDescriptor, HandlerDescriptor, RequestContext, RequestData};

/// Pick the handler to probe. No name (or an empty one) means the handler
/// already serving the request; nothing is constructed in that case.
pub fn resolve_handler(
    host: &dyn HandlerHost,
    name: Option<&str>,
    ctx: &RequestContext,
) -> Result<Arc<dyn Handler>, ProbeError> {
    match name.filter(|n| !n.is_empty()) {
        None => Ok(Arc::clone(&ctx.handler)),
        Some(name) => host
            .create_handler(name, &ctx.request)
            .ok_or_else(|| ProbeError::HandlerNotFound {
                host: host.name().to_string(),
                name: name.to_string(),
            }),
    }
}

/// Find the action `name` on a handler: primary selection first, then the
/// first canonical action with exactly that name.
pub fn resolve_action<'d>(
    descriptor: &'d HandlerDescriptor,
    name: &str,
    request: &RequestData,
) -> Option<&'d ActionDescriptor> {
    find_action(descriptor, name, request).or_else(|| {
        descriptor
            .actions()
            .iter()
            .find(|action| action.name() == name)
    })
}

/// Primary selection. Names compare ignoring ASCII case; candidates whose
/// method selector accepts the request beat candidates without a selector.
/// Anything other than exactly one survivor selects nothing.
pub fn find_action<'d>(
    descriptor: &'d HandlerDescriptor,
    name: &str,
    request: &RequestData,
) -> Option<&'d ActionDescriptor> {
    let (selected, unselected): (Vec<&ActionDescriptor>, Vec<&ActionDescriptor>) = descriptor
        .actions()
        .iter()
        .filter(|action| action.name().eq_ignore_ascii_case(name))
        .partition(|action| action.has_method_selector());

    let accepted: Vec<&ActionDescriptor> = selected
        .into_iter()
        .filter(|action| action.accepts_method(&request.method))
        .collect();
    let pool = if accepted.is_empty() { unselected } else { accepted };

    match pool.as_slice() {
        [single] => Some(*single),
        [] => None,
        many => {
            tracing::debug!(
                handler = descriptor.name(),
                action = name,
                candidates = many.len(),
                "Ambiguous action name; falling back to canonical lookup"
            );
            None
        }
    }
}
