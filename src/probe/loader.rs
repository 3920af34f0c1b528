use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::probe::errors::ProbeError;
use crate::probe::host::{DeclaredHandler, HandlerRegistry};
use crate::probe::policy::parse_kdl_document;
use crate::probe::rule::{ConditionRule, Rule};
use crate::probe::types::*;

/// Load all `.kdl` policy files from the given directory and register the
/// declared handlers and global rules in `registry`.
pub fn load_policies(dir: &Path, registry: &mut HandlerRegistry) -> Result<(), ProbeError> {
    if !dir.is_dir() {
        return Err(ProbeError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "kdl"))
        .collect();
    entries.sort();

    let mut parsed = Vec::with_capacity(entries.len());
    for path in &entries {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ProbeError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        parsed.push(parse_kdl_document(&contents)?);
    }

    let before = registry.len();
    let global_before = registry.global_rule_count();
    compile_policies(parsed, registry)?;

    tracing::info!(
        files = entries.len(),
        handlers = registry.len() - before,
        global_rules = registry.global_rule_count() - global_before,
        "Loaded handler policies"
    );

    Ok(())
}

/// Compile parsed policies into `registry`. Global rules keep file order;
/// a handler may be declared only once.
pub fn compile_policies(
    parsed: Vec<ParsedPolicy>,
    registry: &mut HandlerRegistry,
) -> Result<(), ProbeError> {
    let mut seen = HashSet::new();
    let mut global = Vec::new();
    let mut handlers = Vec::new();

    // Compile everything before touching the registry
    for p in parsed {
        for spec in &p.global_rules {
            global.push(compile_rule(spec)?);
        }
        for def in p.handlers {
            let key = def.name.to_ascii_lowercase();
            if !seen.insert(key) || registry.contains(&def.name) {
                return Err(ProbeError::DuplicateHandler(def.name));
            }
            handlers.push(compile_handler(&def)?);
        }
    }

    for rule in global {
        registry.add_global_rule(rule);
    }
    for descriptor in handlers {
        registry.register_instance(Arc::new(DeclaredHandler::new(descriptor)));
    }
    Ok(())
}

fn compile_handler(def: &HandlerDef) -> Result<HandlerDescriptor, ProbeError> {
    let mut descriptor = HandlerDescriptor::new(&def.name);
    for spec in &def.rules {
        descriptor = descriptor.with_rule(compile_rule(spec)?);
    }
    for action_def in &def.actions {
        let mut action = ActionDescriptor::new(&action_def.member).with_verbs(&action_def.verbs);
        if let Some(name) = &action_def.name {
            action = action.named(name);
        }
        for param in &action_def.parameters {
            action = action.with_parameter(&param.name, &param.type_name);
        }
        for spec in &action_def.rules {
            action = action.with_rule(compile_rule(spec)?);
        }
        descriptor = descriptor.with_action(action);
    }
    Ok(descriptor)
}

fn compile_rule(spec: &RuleSpec) -> Result<Rule, ProbeError> {
    Ok(match spec {
        RuleSpec::Authenticated => Rule::authenticated(),
        RuleSpec::Roles(roles) => Rule::roles(roles),
        RuleSpec::Users(users) => Rule::users(users),
        RuleSpec::Condition(expr) => Rule::new(ConditionRule::parse(expr)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::host::HandlerHost;

    fn orders_policy() -> ParsedPolicy {
        ParsedPolicy {
            global_rules: vec![RuleSpec::Authenticated],
            handlers: vec![HandlerDef {
                name: "Orders".into(),
                rules: vec![RuleSpec::Roles(vec!["Staff".into()])],
                actions: vec![
                    ActionDef {
                        member: "View".into(),
                        ..Default::default()
                    },
                    ActionDef {
                        member: "DeleteConfirmed".into(),
                        name: Some("Delete".into()),
                        verbs: vec!["POST".into()],
                        parameters: vec![ParameterDescriptor {
                            name: "id".into(),
                            type_name: "int".into(),
                        }],
                        rules: vec![RuleSpec::Roles(vec!["Admin".into()])],
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_compile_basic() {
        let mut registry = HandlerRegistry::new();
        compile_policies(vec![orders_policy()], &mut registry).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.global_rules().len(), 1);

        let handler = registry
            .create_handler("orders", &RequestData::default())
            .unwrap();
        let descriptor = registry.describe_handler(handler.as_ref());
        assert_eq!(descriptor.name(), "Orders");
        assert_eq!(descriptor.rules().len(), 1);
        let delete = &descriptor.actions()[1];
        assert_eq!(delete.name(), "Delete");
        assert_eq!(delete.member(), "DeleteConfirmed");
        assert_eq!(delete.verbs(), ["POST"]);
        assert_eq!(delete.parameters().len(), 1);
        assert_eq!(delete.rules()[0].name(), "roles");
    }

    #[test]
    fn test_duplicate_handler_across_files() {
        let mut registry = HandlerRegistry::new();
        let mut second = orders_policy();
        second.handlers[0].name = "ORDERS".into();
        let err = compile_policies(vec![orders_policy(), second], &mut registry).unwrap_err();
        assert!(matches!(err, ProbeError::DuplicateHandler(name) if name == "ORDERS"));
        // nothing is registered when compilation fails
        assert!(registry.is_empty());
        assert!(registry.global_rules().is_empty());
    }

    #[test]
    fn test_duplicate_of_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register_instance(Arc::new(DeclaredHandler::new(HandlerDescriptor::new(
            "Orders",
        ))));
        let err = compile_policies(vec![orders_policy()], &mut registry).unwrap_err();
        assert!(matches!(err, ProbeError::DuplicateHandler(_)));
    }

    #[test]
    fn test_invalid_condition_rejected_at_compile() {
        let parsed = ParsedPolicy {
            global_rules: vec![RuleSpec::Condition("request.method ==".into())],
            ..Default::default()
        };
        let err = compile_policies(vec![parsed], &mut HandlerRegistry::new()).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidCondition(_)));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(
            dir.path().join("00_global.kdl"),
            r#"
global {
    authenticated
}
"#,
        )
        .unwrap();

        std::fs::write(
            dir.path().join("orders.kdl"),
            r#"
handler "Orders" {
    action "View"
    action "Delete" verbs="POST" {
        roles "Admin"
    }
}

handler "Customers" {
    roles "Staff"
    action "Index"
}
"#,
        )
        .unwrap();

        // Non-KDL files are ignored
        std::fs::write(dir.path().join("README.md"), "not a policy").unwrap();

        let mut registry = HandlerRegistry::new();
        load_policies(dir.path(), &mut registry).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("orders"));
        assert!(registry.contains("customers"));
        assert_eq!(registry.global_rules().len(), 1);
    }

    #[test]
    fn test_load_nonexistent_directory() {
        let err = load_policies(Path::new("/nonexistent/path"), &mut HandlerRegistry::new())
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidPolicy(_)));
    }

    #[test]
    fn test_load_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.kdl"), r#"handler "Orders" {"#).unwrap();
        let err = load_policies(dir.path(), &mut HandlerRegistry::new()).unwrap_err();
        assert!(matches!(err, ProbeError::KdlParse(_)));
    }
}
