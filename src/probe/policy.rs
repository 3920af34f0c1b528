use crate::probe::errors::ProbeError;
use crate::probe::types::*;
use kdl::{KdlDocument, KdlNode};

/// Parse a KDL document string into handler and rule declarations.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, ProbeError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| ProbeError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                for child in child_nodes(node) {
                    let rule = parse_rule(child)?.ok_or_else(|| {
                        ProbeError::InvalidPolicy(format!(
                            "unexpected child `{}` in global (expected a rule)",
                            child.name().value()
                        ))
                    })?;
                    policy.global_rules.push(rule);
                }
            }
            "handler" => policy.handlers.push(parse_handler(node)?),
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

fn parse_handler(node: &KdlNode) -> Result<HandlerDef, ProbeError> {
    let name = first_string_arg(node).ok_or_else(|| {
        ProbeError::InvalidPolicy(
            "handler node requires a string argument (e.g. handler \"Orders\")".into(),
        )
    })?;

    let mut handler = HandlerDef {
        name,
        ..Default::default()
    };

    for child in child_nodes(node) {
        if child.name().value() == "action" {
            handler.actions.push(parse_action(child, &handler.name)?);
        } else if let Some(rule) = parse_rule(child)? {
            handler.rules.push(rule);
        } else {
            return Err(ProbeError::InvalidPolicy(format!(
                "unexpected child `{}` in handler `{}` (expected `action` or a rule)",
                child.name().value(),
                handler.name
            )));
        }
    }

    Ok(handler)
}

fn parse_action(node: &KdlNode, handler: &str) -> Result<ActionDef, ProbeError> {
    let member = first_string_arg(node).ok_or_else(|| {
        ProbeError::InvalidPolicy(format!(
            "action in handler `{handler}` requires a string argument (e.g. action \"Index\")"
        ))
    })?;

    let mut action = ActionDef {
        name: node.get("name").and_then(|v| v.as_string()).map(str::to_string),
        verbs: node
            .get("verbs")
            .and_then(|v| v.as_string())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_ascii_uppercase)
                    .collect()
            })
            .unwrap_or_default(),
        member,
        ..Default::default()
    };

    for child in child_nodes(node) {
        if child.name().value() == "param" {
            let name = first_string_arg(child).ok_or_else(|| {
                ProbeError::InvalidPolicy(format!(
                    "param in action `{handler}.{}` requires a name (e.g. param \"id\" type=\"int\")",
                    action.member
                ))
            })?;
            let type_name = child
                .get("type")
                .and_then(|v| v.as_string())
                .unwrap_or("string")
                .to_string();
            action.parameters.push(ParameterDescriptor { name, type_name });
        } else if let Some(rule) = parse_rule(child)? {
            action.rules.push(rule);
        } else {
            return Err(ProbeError::InvalidPolicy(format!(
                "unexpected child `{}` in action `{handler}.{}` (expected `param` or a rule)",
                child.name().value(),
                action.member
            )));
        }
    }

    Ok(action)
}

/// Parse a rule node. `Ok(None)` means the node is not a rule at all.
fn parse_rule(node: &KdlNode) -> Result<Option<RuleSpec>, ProbeError> {
    let rule = match node.name().value() {
        "authenticated" => RuleSpec::Authenticated,
        "roles" => RuleSpec::Roles(non_empty_list(node, "roles", "roles \"Admin\" \"Staff\"")?),
        "users" => RuleSpec::Users(non_empty_list(node, "users", "users \"alice\"")?),
        "condition" => {
            let expr = first_string_arg(node).ok_or_else(|| {
                ProbeError::InvalidPolicy(
                    "condition requires an expression (e.g. condition \"request.route.id != \\\"0\\\"\")"
                        .into(),
                )
            })?;
            RuleSpec::Condition(expr)
        }
        _ => return Ok(None),
    };
    Ok(Some(rule))
}

/// Values of a list rule, given either inline (`roles "A" "B"`) or as a
/// dash list in children.
fn non_empty_list(node: &KdlNode, what: &str, example: &str) -> Result<Vec<String>, ProbeError> {
    let mut values = string_args(node);
    values.extend(dash_list(node));
    if values.is_empty() {
        return Err(ProbeError::InvalidPolicy(format!(
            "`{what}` needs at least one value (e.g. {example})"
        )));
    }
    Ok(values)
}

fn child_nodes(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|c| c.nodes()).unwrap_or(&[])
}

/// All positional string arguments of a KDL node.
fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(str::to_string)
        .collect()
}

fn first_string_arg(node: &KdlNode) -> Option<String> {
    string_args(node).into_iter().next()
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// roles {
///     - "Admin"
///     - "Staff"
/// }
/// ```
fn dash_list(node: &KdlNode) -> Vec<String> {
    child_nodes(node)
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
