use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::links::LinkState;
use crate::probe::host::Handler;
use crate::probe::rule::Rule;

/// The caller on whose behalf a probe is evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// `None` for anonymous callers
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub claims: Value,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_claims(mut self, claims: Value) -> Self {
        self.claims = claims;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|r| self.is_in_role(r.as_ref()))
    }

    /// Same as [`Principal::has_any_role`] for a comma-separated list like `"Admin,Staff"`.
    pub fn has_any_role_str(&self, roles: &str) -> bool {
        roles.split(',').any(|r| self.is_in_role(r.trim()))
    }
}

/// Ambient data of the request a probe runs under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: String,
    /// Route values of the current request, e.g. `handler`, `action`, `id`
    #[serde(default)]
    pub route: BTreeMap<String, String>,
    #[serde(default)]
    pub data: Value,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Default for RequestData {
    fn default() -> Self {
        Self {
            method: default_method(),
            path: String::new(),
            route: BTreeMap::new(),
            data: Value::Null,
        }
    }
}

impl RequestData {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_route_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.route.insert(key.into(), value.into());
        self
    }
}

/// Everything a probe needs from the in-flight request, passed explicitly.
#[derive(Clone)]
pub struct RequestContext {
    /// The handler already serving the request
    pub handler: Arc<dyn Handler>,
    pub principal: Principal,
    pub request: RequestData,
}

impl RequestContext {
    pub fn new(handler: Arc<dyn Handler>, principal: Principal, request: RequestData) -> Self {
        Self {
            handler,
            principal,
            request,
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("handler", &self.handler.handler_type())
            .field("principal", &self.principal)
            .field("request", &self.request)
            .finish()
    }
}

// ---------- Descriptors ----------

/// Static description of a handler type: its own rules and its actions.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    name: String,
    rules: Vec<Rule>,
    actions: Vec<ActionDescriptor>,
}

impl HandlerDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_action(mut self, action: ActionDescriptor) -> Self {
        self.actions.push(action);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// All declared actions in declaration order.
    pub fn actions(&self) -> &[ActionDescriptor] {
        &self.actions
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub type_name: String,
}

/// One invocable action of a handler.
#[derive(Debug, Clone)]
pub struct ActionDescriptor {
    name: String,
    member: String,
    verbs: Vec<String>,
    parameters: Vec<ParameterDescriptor>,
    rules: Vec<Rule>,
}

impl ActionDescriptor {
    /// Action backed by `member`, publicly named the same.
    pub fn new(member: impl Into<String>) -> Self {
        let member = member.into();
        Self {
            name: member.clone(),
            member,
            verbs: Vec::new(),
            parameters: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Override the public action name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_verbs<I, S>(mut self, verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verbs = verbs
            .into_iter()
            .map(|v| v.into().to_ascii_uppercase())
            .collect();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.parameters.push(ParameterDescriptor {
            name: name.into(),
            type_name: type_name.into(),
        });
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn verbs(&self) -> &[String] {
        &self.verbs
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn has_method_selector(&self) -> bool {
        !self.verbs.is_empty()
    }

    pub fn accepts_method(&self, method: &str) -> bool {
        self.verbs.is_empty() || self.verbs.iter().any(|v| v.eq_ignore_ascii_case(method))
    }
}

// ---------- Probe context ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: Option<String>,
}

/// Per-probe state handed to each rule of the chain.
pub struct ProbeContext<'a> {
    handler: &'a dyn Handler,
    descriptor: &'a HandlerDescriptor,
    action: &'a ActionDescriptor,
    principal: &'a Principal,
    request: &'a RequestData,
    denial: Option<Denial>,
}

impl<'a> ProbeContext<'a> {
    pub fn new(
        handler: &'a dyn Handler,
        descriptor: &'a HandlerDescriptor,
        action: &'a ActionDescriptor,
        principal: &'a Principal,
        request: &'a RequestData,
    ) -> Self {
        Self {
            handler,
            descriptor,
            action,
            principal,
            request,
            denial: None,
        }
    }

    pub fn handler(&self) -> &'a dyn Handler {
        self.handler
    }

    pub fn descriptor(&self) -> &'a HandlerDescriptor {
        self.descriptor
    }

    pub fn action(&self) -> &'a ActionDescriptor {
        self.action
    }

    pub fn principal(&self) -> &'a Principal {
        self.principal
    }

    pub fn request(&self) -> &'a RequestData {
        self.request
    }

    /// Mark the context denied. Denial is terminal; the first reason is kept.
    pub fn deny(&mut self, reason: impl Into<String>) {
        if self.denial.is_none() {
            self.denial = Some(Denial {
                reason: Some(reason.into()),
            });
        }
    }

    pub fn is_denied(&self) -> bool {
        self.denial.is_some()
    }

    pub fn denial(&self) -> Option<&Denial> {
        self.denial.as_ref()
    }

    /// JSON view used by condition expressions.
    pub fn to_value(&self) -> Value {
        json!({
            "principal": {
                "identity": self.principal.identity,
                "authenticated": self.principal.is_authenticated(),
                "roles": self.principal.roles,
                "claims": self.principal.claims,
            },
            "request": {
                "method": self.request.method,
                "path": self.request.path,
                "route": self.request.route,
                "data": self.request.data,
            },
            "handler": self.descriptor.name(),
            "action": self.action.name(),
        })
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct ProbeRequest {
    /// Handler serving the page that asks, e.g. "Home"
    pub current: String,
    /// e.g. "Delete"
    pub action: String,
    /// e.g. "Orders"; absent means the current handler
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub principal: Principal,
    #[serde(default)]
    pub request: RequestData,
}

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    pub action: String,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default = "default_hide")]
    pub hide: bool,
}

fn default_hide() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct LinksRequest {
    pub current: String,
    #[serde(default)]
    pub principal: Principal,
    #[serde(default)]
    pub request: RequestData,
    pub links: Vec<LinkQuery>,
}

#[derive(Debug, Serialize)]
pub struct LinkVerdict {
    pub action: String,
    pub handler: Option<String>,
    pub allowed: bool,
    pub link: LinkState,
}

// ---------- Policy file types ----------

/// A rule as written in a policy file, before compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSpec {
    Authenticated,
    Roles(Vec<String>),
    Users(Vec<String>),
    /// Raw condition expression, parsed on compile
    Condition(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionDef {
    pub member: String,
    /// Public name override
    pub name: Option<String>,
    pub verbs: Vec<String>,
    pub parameters: Vec<ParameterDescriptor>,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerDef {
    pub name: String,
    pub rules: Vec<RuleSpec>,
    pub actions: Vec<ActionDef>,
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPolicy {
    pub global_rules: Vec<RuleSpec>,
    pub handlers: Vec<HandlerDef>,
}
