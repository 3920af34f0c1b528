//! End-to-end probes through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actiongate::links::LinkState;
use actiongate::probe::loader::load_policies;
use actiongate::probe::{
    ActionDescriptor, Authorizer, DeclaredHandler, Handler, HandlerDescriptor, HandlerRegistry,
    Principal, ProbeError, RequestContext, RequestData, Rule,
};
use serde_json::json;

struct OrdersHandler;

impl Handler for OrdersHandler {
    fn handler_type(&self) -> &str {
        "Orders"
    }

    fn describe(&self) -> HandlerDescriptor {
        HandlerDescriptor::new("Orders")
            .with_rule(Rule::authenticated())
            .with_action(ActionDescriptor::new("View"))
            .with_action(ActionDescriptor::new("Delete").with_rule(Rule::roles(["Admin"])))
    }
}

fn orders_authorizer() -> (Authorizer, Arc<AtomicUsize>) {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let mut registry = HandlerRegistry::new();
    registry.register("Orders", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(OrdersHandler) as Arc<dyn Handler>
    });
    registry.register_instance(Arc::new(DeclaredHandler::new(
        HandlerDescriptor::new("Home").with_action(ActionDescriptor::new("Index")),
    )));
    (Authorizer::new(Arc::new(registry)), created)
}

fn caller(principal: Principal) -> RequestContext {
    RequestContext::new(Arc::new(OrdersHandler), principal, RequestData::default())
}

#[test]
fn orders_scenario() {
    let (authorizer, _) = orders_authorizer();
    let ctx = caller(Principal::user("alice").with_role("Staff"));

    assert!(authorizer.is_action_authorized(&ctx, "View", None).unwrap());
    assert!(!authorizer.is_action_authorized(&ctx, "Delete", None).unwrap());
    assert!(!authorizer.is_action_authorized(&ctx, "Ship", None).unwrap());

    let err = authorizer
        .is_action_authorized(&ctx, "View", Some("NoSuchHandler"))
        .unwrap_err();
    assert!(matches!(err, ProbeError::HandlerNotFound { name, .. } if name == "NoSuchHandler"));

    let admin = caller(Principal::user("root").with_role("Admin"));
    assert!(authorizer.is_action_authorized(&admin, "Delete", None).unwrap());
}

#[test]
fn anonymous_caller_fails_handler_rule() {
    let (authorizer, _) = orders_authorizer();
    let ctx = caller(Principal::anonymous());
    assert!(!authorizer.is_action_authorized(&ctx, "View", None).unwrap());
}

#[test]
fn current_handler_is_never_reconstructed() {
    let (authorizer, created) = orders_authorizer();
    let ctx = caller(Principal::user("alice"));

    authorizer.is_action_authorized(&ctx, "View", None).unwrap();
    authorizer.is_action_authorized(&ctx, "View", Some("")).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 0);

    authorizer.is_action_authorized(&ctx, "View", Some("orders")).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_chain_allows_everyone() {
    let (authorizer, _) = orders_authorizer();
    let ctx = caller(Principal::anonymous());
    assert!(authorizer
        .is_action_authorized(&ctx, "Index", Some("Home"))
        .unwrap());
}

#[test]
fn link_states_follow_verdict() {
    let (authorizer, _) = orders_authorizer();
    let ctx = caller(Principal::user("alice"));

    assert_eq!(
        authorizer.link_state(&ctx, "View", None, true).unwrap(),
        LinkState::Enabled
    );
    assert_eq!(
        authorizer.link_state(&ctx, "Delete", None, true).unwrap(),
        LinkState::Hidden
    );
    assert!(matches!(
        authorizer.link_state(&ctx, "Delete", None, false).unwrap(),
        LinkState::Disabled { .. }
    ));
}

#[tokio::test]
async fn policies_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("00_global.kdl"),
        r#"
global {
    condition "request.method != \"TRACE\""
}
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("invoices.kdl"),
        r#"
handler "Invoices" {
    authenticated
    action "Index"
    action "Edit" verbs="GET"
    action "SaveEdit" name="Edit" verbs="POST" {
        param "id" type="int"
        roles "Accounting"
    }
    action "Archive" {
        condition "request.data.year < 2020"
        users "auditor"
    }
}
"#,
    )
    .unwrap();

    let mut registry = HandlerRegistry::new();
    load_policies(dir.path(), &mut registry).unwrap();
    let authorizer = Authorizer::new(Arc::new(registry));

    let invoices = Arc::new(DeclaredHandler::new(HandlerDescriptor::new("Invoices")));
    let bob = Principal::user("bob");

    // GET selects the unrestricted Edit, POST the one requiring Accounting
    let get = RequestContext::new(
        invoices.clone(),
        bob.clone(),
        RequestData::new("GET", "/invoices/edit"),
    );
    assert!(authorizer
        .is_action_authorized(&get, "edit", Some("Invoices"))
        .unwrap());
    let post = RequestContext::new(
        invoices.clone(),
        bob.clone(),
        RequestData::new("POST", "/invoices/edit"),
    );
    assert!(!authorizer
        .is_action_authorized(&post, "Edit", Some("Invoices"))
        .unwrap());

    // global rule denies before any handler rule runs
    let trace = RequestContext::new(invoices.clone(), bob, RequestData::new("TRACE", "/"));
    assert!(!authorizer
        .is_action_authorized(&trace, "Index", Some("Invoices"))
        .unwrap());

    let auditor = Principal::user("auditor");
    let mut old = RequestData::new("GET", "/invoices/archive");
    old.data = json!({ "year": 2019 });
    let ctx = RequestContext::new(invoices.clone(), auditor.clone(), old);
    assert!(authorizer
        .is_action_authorized_async(&ctx, "Archive", Some("Invoices"))
        .await
        .unwrap());
    let mut recent = RequestData::new("GET", "/invoices/archive");
    recent.data = json!({ "year": 2024 });
    let ctx = RequestContext::new(invoices, auditor, recent);
    assert!(!authorizer
        .is_action_authorized_async(&ctx, "Archive", Some("Invoices"))
        .await
        .unwrap());
}

fn invoices_registry(cache: bool) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new().with_descriptor_cache(cache);
    registry.register("Orders", |_| Arc::new(OrdersHandler) as Arc<dyn Handler>);
    registry.register_instance(Arc::new(DeclaredHandler::new(
        HandlerDescriptor::new("Invoices")
            .with_action(ActionDescriptor::new("Index"))
            .with_action(ActionDescriptor::new("Purge").with_rule(Rule::roles(["Admin"]))),
    )));
    registry
}

#[test]
fn current_handler_sharing_a_name_does_not_shadow_registered_one() {
    let authorizer = Authorizer::new(Arc::new(invoices_registry(true)));
    let current = Arc::new(DeclaredHandler::new(
        HandlerDescriptor::new("Invoices").with_action(ActionDescriptor::new("Purge")),
    ));
    let ctx = RequestContext::new(current, Principal::user("alice"), RequestData::default());

    // the current instance is described first
    assert!(authorizer.is_action_authorized(&ctx, "Purge", None).unwrap());
    assert!(!authorizer.is_action_authorized(&ctx, "Index", None).unwrap());

    // the registered instance keeps its own actions and rules
    assert!(authorizer
        .is_action_authorized(&ctx, "Index", Some("Invoices"))
        .unwrap());
    assert!(!authorizer
        .is_action_authorized(&ctx, "Purge", Some("Invoices"))
        .unwrap());
}

#[test]
fn descriptor_cache_does_not_change_verdicts() {
    let verdicts = |cache: bool| -> Vec<bool> {
        let authorizer = Authorizer::new(Arc::new(invoices_registry(cache)));
        let empty_invoices: Arc<dyn Handler> =
            Arc::new(DeclaredHandler::new(HandlerDescriptor::new("Invoices")));
        let callers = [
            Principal::anonymous(),
            Principal::user("alice").with_role("Staff"),
            Principal::user("root").with_role("Admin"),
        ];
        let probes: [(&str, Option<&str>); 6] = [
            ("View", None),
            ("Delete", None),
            ("Ship", None),
            ("Index", Some("Invoices")),
            ("Purge", Some("invoices")),
            ("View", Some("Orders")),
        ];

        let mut out = Vec::new();
        for principal in callers {
            let orders = caller(principal.clone());
            let invoices = RequestContext::new(
                Arc::clone(&empty_invoices),
                principal,
                RequestData::default(),
            );
            for (action, handler) in probes {
                out.push(authorizer.is_action_authorized(&orders, action, handler).unwrap());
                // current handler first, then by name
                out.push(authorizer.is_action_authorized(&invoices, action, None).unwrap());
                out.push(authorizer.is_action_authorized(&invoices, action, handler).unwrap());
            }
        }
        out
    };

    let cached = verdicts(true);
    assert_eq!(cached, verdicts(false));
    // spot checks on the cached run: staff may view but not delete orders
    assert!(cached[18]);
    assert!(!cached[21]);
}
