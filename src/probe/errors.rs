use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ProbeError {
    #[error("The handler host `{host}` did not return a handler for the name `{name}`")]
    #[diagnostic(
        code(actiongate::probe::handler_not_found),
        help("Check the handler name passed to the probe; it must match a registered handler")
    )]
    HandlerNotFound { host: String, name: String },

    #[error("Authorization rule `{rule}` failed")]
    #[diagnostic(code(actiongate::probe::rule_fault))]
    RuleFault {
        rule: String,
        #[source]
        source: RuleError,
    },

    #[error("Authorization rule `{rule}` is asynchronous and cannot run in a blocking probe")]
    #[diagnostic(
        code(actiongate::probe::async_rule),
        help("Use `is_action_authorized_async` for chains containing non-blocking rules")
    )]
    AsyncRuleInBlockingProbe { rule: String },

    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(actiongate::probe::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(actiongate::probe::invalid_policy),
        help("Each policy file must contain `global` or `handler` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("Invalid condition expression: {0}")]
    #[diagnostic(
        code(actiongate::probe::invalid_condition),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Paths use dot notation (e.g. request.route.id)")
    )]
    InvalidCondition(String),

    #[error("Handler `{0}` is declared more than once")]
    #[diagnostic(
        code(actiongate::probe::duplicate_handler),
        help("Each handler may only be declared in one `handler` node across all policy files")
    )]
    DuplicateHandler(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(actiongate::probe::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev for the specification")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(actiongate::probe::io))]
    Io(#[from] std::io::Error),
}

/// Failure raised by a rule implementation itself, as opposed to a denial.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RuleError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ProbeError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ProbeError::HandlerNotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            ProbeError::InvalidPolicy(_)
            | ProbeError::InvalidCondition(_)
            | ProbeError::KdlParse(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
