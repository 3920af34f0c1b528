//! Decisions for rendering links and menu entries from a probe verdict.

use serde::Serialize;
use std::collections::BTreeMap;

pub const NOT_PERMITTED_MESSAGE: &str = "Not enough permissions to execute this!";

/// How a link to an action should be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkState {
    /// Render an active link.
    Enabled,
    /// Render a disabled placeholder carrying `message` as its title.
    Disabled { message: String },
    /// Render nothing.
    Hidden,
}

impl LinkState {
    pub fn from_verdict(allowed: bool, hide: bool) -> Self {
        match (allowed, hide) {
            (true, _) => LinkState::Enabled,
            (false, true) => LinkState::Hidden,
            (false, false) => LinkState::Disabled {
                message: NOT_PERMITTED_MESSAGE.to_string(),
            },
        }
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self, LinkState::Hidden)
    }
}

/// Whether a menu entry targets the action and handler of the current route.
/// Both must match for the entry to be marked active.
pub fn is_current_route(route: &BTreeMap<String, String>, action: &str, handler: &str) -> bool {
    let current_action = route.get("action").map(String::as_str);
    let current_handler = route.get("handler").map(String::as_str);
    current_action == Some(action) && current_handler == Some(handler)
}
