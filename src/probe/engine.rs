use std::sync::Arc;

use crate::links::LinkState;
use crate::probe::chain;
use crate::probe::errors::{ProbeError, RuleError};
use crate::probe::host::{Handler, HandlerHost};
use crate::probe::resolve::{resolve_action, resolve_handler};
use crate::probe::rule::Rule;
use crate::probe::types::{ActionDescriptor, HandlerDescriptor, ProbeContext, RequestContext};

/// Run `rules` in order against `context` and report whether the caller is
/// admitted.
///
/// Evaluation stops at the first rule that leaves the context denied; rules
/// after it are never invoked. A rule returning `Err` aborts the probe with
/// [`ProbeError::RuleFault`]; it is neither a denial nor an allow.
///
/// Chains containing non-blocking rules are rejected before any rule runs;
/// use [`evaluate_async`] for those.
pub fn evaluate(rules: &[Rule], mut context: ProbeContext<'_>) -> Result<bool, ProbeError> {
    if let Some(rule) = rules.iter().find(|r| !r.is_blocking()) {
        return Err(ProbeError::AsyncRuleInBlockingProbe {
            rule: rule.name().to_string(),
        });
    }

    for rule in rules {
        if let Rule::Blocking(r) = rule {
            r.on_authorization(&mut context)
                .map_err(|source| fault(rule, source))?;
        }
        if context.is_denied() {
            log_denial(rule, &context);
            return Ok(false);
        }
    }
    Ok(true)
}

/// Same contract as [`evaluate`], awaiting non-blocking rules in sequence.
pub async fn evaluate_async(
    rules: &[Rule],
    mut context: ProbeContext<'_>,
) -> Result<bool, ProbeError> {
    for rule in rules {
        let outcome = match rule {
            Rule::Blocking(r) => r.on_authorization(&mut context),
            Rule::NonBlocking(r) => r.on_authorization(&mut context).await,
        };
        outcome.map_err(|source| fault(rule, source))?;
        if context.is_denied() {
            log_denial(rule, &context);
            return Ok(false);
        }
    }
    Ok(true)
}

fn fault(rule: &Rule, source: RuleError) -> ProbeError {
    tracing::warn!(rule = rule.name(), error = %source, "Authorization rule failed");
    ProbeError::RuleFault {
        rule: rule.name().to_string(),
        source,
    }
}

fn log_denial(rule: &Rule, context: &ProbeContext<'_>) {
    tracing::debug!(
        handler = context.descriptor().name(),
        action = context.action().name(),
        rule = rule.name(),
        reason = context
            .denial()
            .and_then(|d| d.reason.as_deref())
            .unwrap_or("unspecified"),
        "Probe denied"
    );
}

/// A resolved probe target: handler instance, its descriptor, and the
/// index of the selected action within the descriptor.
struct Target {
    handler: Arc<dyn Handler>,
    descriptor: Arc<HandlerDescriptor>,
    action: usize,
}

impl Target {
    fn action(&self) -> &ActionDescriptor {
        &self.descriptor.actions()[self.action]
    }
}

/// Answers "may the caller invoke this action?" without invoking it.
#[derive(Clone)]
pub struct Authorizer {
    host: Arc<dyn HandlerHost>,
}

impl Authorizer {
    pub fn new(host: Arc<dyn HandlerHost>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &dyn HandlerHost {
        self.host.as_ref()
    }

    /// Probe `action` on `handler` (or on the current handler when `None`
    /// or empty). An unknown action is `Ok(false)`; an unknown handler is
    /// [`ProbeError::HandlerNotFound`].
    pub fn is_action_authorized(
        &self,
        ctx: &RequestContext,
        action: &str,
        handler: Option<&str>,
    ) -> Result<bool, ProbeError> {
        let Some(target) = self.resolve(ctx, action, handler)? else {
            return Ok(false);
        };
        let rules = chain::assemble(self.host.global_rules(), &target.descriptor, target.action());
        evaluate(&rules, probe_context(&target, ctx))
    }

    /// Variant of [`Authorizer::is_action_authorized`] for chains with
    /// non-blocking rules.
    pub async fn is_action_authorized_async(
        &self,
        ctx: &RequestContext,
        action: &str,
        handler: Option<&str>,
    ) -> Result<bool, ProbeError> {
        let Some(target) = self.resolve(ctx, action, handler)? else {
            return Ok(false);
        };
        let rules = chain::assemble(self.host.global_rules(), &target.descriptor, target.action());
        evaluate_async(&rules, probe_context(&target, ctx)).await
    }

    /// How a link to the action should render for this caller.
    pub fn link_state(
        &self,
        ctx: &RequestContext,
        action: &str,
        handler: Option<&str>,
        hide: bool,
    ) -> Result<LinkState, ProbeError> {
        let allowed = self.is_action_authorized(ctx, action, handler)?;
        Ok(LinkState::from_verdict(allowed, hide))
    }

    fn resolve(
        &self,
        ctx: &RequestContext,
        action: &str,
        handler: Option<&str>,
    ) -> Result<Option<Target>, ProbeError> {
        let instance = resolve_handler(self.host(), handler, ctx)?;
        let descriptor = self.host.describe_handler(instance.as_ref());
        let index = resolve_action(&descriptor, action, &ctx.request).and_then(|found| {
            descriptor
                .actions()
                .iter()
                .position(|candidate| std::ptr::eq(candidate, found))
        });
        let Some(index) = index else {
            tracing::debug!(handler = descriptor.name(), action, "Probe target action not found");
            return Ok(None);
        };
        Ok(Some(Target {
            handler: instance,
            descriptor,
            action: index,
        }))
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("host", &self.host.name())
            .finish()
    }
}

fn probe_context<'a>(target: &'a Target, ctx: &'a RequestContext) -> ProbeContext<'a> {
    ProbeContext::new(
        target.handler.as_ref(),
        &target.descriptor,
        target.action(),
        &ctx.principal,
        &ctx.request,
    )
}
