//! Authorization rules and the built-in rule kinds.
//!
//! A rule inspects a [`ProbeContext`] and either leaves it alone (allow) or
//! calls [`ProbeContext::deny`]. Returning `Err` means the rule itself broke;
//! the probe surfaces that to its caller instead of guessing a verdict.
//!
//! Rules may have side effects (logging, counters, remote lookups). The
//! evaluator never invokes a rule that comes after the first denial.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::probe::condition::{self, Expr};
use crate::probe::errors::RuleError;
use crate::probe::types::ProbeContext;

/// Blocking authorization rule.
pub trait AuthorizationRule: Send + Sync {
    fn name(&self) -> &str;

    fn on_authorization(&self, context: &mut ProbeContext<'_>) -> Result<(), RuleError>;
}

/// Non-blocking authorization rule, e.g. a remote entitlement lookup.
#[async_trait]
pub trait AsyncAuthorizationRule: Send + Sync {
    fn name(&self) -> &str;

    async fn on_authorization(&self, context: &mut ProbeContext<'_>) -> Result<(), RuleError>;
}

/// A rule as stored in descriptors and chains.
#[derive(Clone)]
pub enum Rule {
    Blocking(Arc<dyn AuthorizationRule>),
    NonBlocking(Arc<dyn AsyncAuthorizationRule>),
}

impl Rule {
    pub fn new<R: AuthorizationRule + 'static>(rule: R) -> Self {
        Rule::Blocking(Arc::new(rule))
    }

    pub fn new_async<R: AsyncAuthorizationRule + 'static>(rule: R) -> Self {
        Rule::NonBlocking(Arc::new(rule))
    }

    pub fn name(&self) -> &str {
        match self {
            Rule::Blocking(r) => r.name(),
            Rule::NonBlocking(r) => r.name(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Rule::Blocking(_))
    }

    pub fn authenticated() -> Self {
        Self::new(AuthenticatedRule)
    }

    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RoleRule::new(roles))
    }

    pub fn users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(IdentityRule::new(users))
    }

    pub fn predicate<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ProbeContext<'_>) -> Result<bool, RuleError> + Send + Sync + 'static,
    {
        Self::new(PredicateRule::new(name, f))
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Blocking(r) => f.debug_tuple("Blocking").field(&r.name()).finish(),
            Rule::NonBlocking(r) => f.debug_tuple("NonBlocking").field(&r.name()).finish(),
        }
    }
}

// ─── Built-in rules ─────────────────────────────────────────────────────

/// Denies anonymous callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticatedRule;

impl AuthorizationRule for AuthenticatedRule {
    fn name(&self) -> &str {
        "authenticated"
    }

    fn on_authorization(&self, context: &mut ProbeContext<'_>) -> Result<(), RuleError> {
        if !context.principal().is_authenticated() {
            context.deny("caller is not authenticated");
        }
        Ok(())
    }
}

/// Caller must be authenticated and hold at least one of the roles.
#[derive(Debug, Clone)]
pub struct RoleRule {
    roles: Vec<String>,
}

impl RoleRule {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

impl AuthorizationRule for RoleRule {
    fn name(&self) -> &str {
        "roles"
    }

    fn on_authorization(&self, context: &mut ProbeContext<'_>) -> Result<(), RuleError> {
        let principal = context.principal();
        if !principal.is_authenticated() {
            context.deny("caller is not authenticated");
        } else if !principal.has_any_role(&self.roles) {
            let roles = self.roles.join(", ");
            context.deny(format!("caller holds none of the roles [{roles}]"));
        }
        Ok(())
    }
}

/// Caller must be authenticated as one of the listed identities.
#[derive(Debug, Clone)]
pub struct IdentityRule {
    users: Vec<String>,
}

impl IdentityRule {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl AuthorizationRule for IdentityRule {
    fn name(&self) -> &str {
        "users"
    }

    fn on_authorization(&self, context: &mut ProbeContext<'_>) -> Result<(), RuleError> {
        let allowed = match context.principal().identity.as_deref() {
            Some(id) if !id.is_empty() => self.users.iter().any(|u| u.eq_ignore_ascii_case(id)),
            _ => false,
        };
        if !allowed {
            context.deny("caller is not one of the permitted users");
        }
        Ok(())
    }
}

/// Condition expression over the JSON view of the probe context.
#[derive(Debug, Clone)]
pub struct ConditionRule {
    source: String,
    expr: Expr,
}

impl ConditionRule {
    pub fn parse(source: &str) -> Result<Self, crate::probe::errors::ProbeError> {
        let expr = condition::parse_condition(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl AuthorizationRule for ConditionRule {
    fn name(&self) -> &str {
        "condition"
    }

    fn on_authorization(&self, context: &mut ProbeContext<'_>) -> Result<(), RuleError> {
        let view = context.to_value();
        let satisfied = condition::evaluate(&self.expr, &view).map_err(|e| {
            RuleError::with_source(format!("cannot evaluate `{}`", self.source), e)
        })?;
        if !satisfied {
            context.deny(format!("condition `{}` is not satisfied", self.source));
        }
        Ok(())
    }
}

type PredicateFn = dyn Fn(&ProbeContext<'_>) -> Result<bool, RuleError> + Send + Sync;

/// Host-supplied predicate; `Ok(false)` denies.
pub struct PredicateRule {
    name: String,
    predicate: Box<PredicateFn>,
}

impl PredicateRule {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ProbeContext<'_>) -> Result<bool, RuleError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(f),
        }
    }
}

impl AuthorizationRule for PredicateRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_authorization(&self, context: &mut ProbeContext<'_>) -> Result<(), RuleError> {
        if !(self.predicate)(context)? {
            context.deny(format!("predicate `{}` rejected the caller", self.name));
        }
        Ok(())
    }
}
