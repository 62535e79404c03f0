// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::tool::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde_json::{json, Map};

struct NamedTool(&'static str);

#[async_trait]
impl Tool for NamedTool {
    fn id(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn schema(&self) -> Value {
        json!({})
    }

    async fn execute(
        &self,
        _arguments: Map<String, Value>,
        _context: ToolContext,
    ) -> Result<String, ToolError> {
        Ok("ok".to_string())
    }
}

#[test]
fn register_and_get() {
    let registry: Registry<dyn Tool> = Registry::new();
    assert!(!registry.register("echo", Arc::new(NamedTool("echo"))));

    let tool = registry.get("echo");
    assert!(tool.is_some());
    assert!(registry.get("missing").is_none());
    assert!(registry.contains("echo"));
}

#[test]
fn register_replaces_and_reports() {
    let registry: Registry<Guide> = Registry::new();
    let first = Guide {
        id: "g".to_string(),
        system_prompt: "one".to_string(),
    };
    let second = Guide {
        id: "g".to_string(),
        system_prompt: "two".to_string(),
    };

    assert!(!registry.register("g", Arc::new(first)));
    assert!(registry.register("g", Arc::new(second)));
    assert_eq!(
        registry.get("g").map(|g| g.system_prompt.clone()),
        Some("two".to_string())
    );
    assert_eq!(registry.len(), 1);
}

#[test]
fn names_in_registration_order() {
    let registry: Registry<CommandDef> = Registry::new();
    for name in ["zeta", "alpha", "mid"] {
        registry.register(
            name,
            Arc::new(CommandDef {
                name: name.to_string(),
                description: String::new(),
            }),
        );
    }
    assert_eq!(registry.names(), vec!["zeta", "alpha", "mid"]);
}

#[test]
fn remove_returns_entry() {
    let registry: Registry<UiDef> = Registry::new();
    registry.register(
        "panel",
        Arc::new(UiDef {
            id: "panel".to_string(),
            description: String::new(),
        }),
    );

    assert!(registry.remove("panel").is_some());
    assert!(registry.remove("panel").is_none());
    assert!(registry.is_empty());
}

#[test]
fn registries_bundle_defaults_empty() {
    let registries = Registries::new();
    assert!(registries.tools.is_empty());
    assert!(registries.providers.is_empty());
    assert!(registries.guides.is_empty());
    assert!(registries.commands.is_empty());
    assert!(registries.listeners.is_empty());
    assert!(registries.uis.is_empty());
    assert!(registries.services.is_empty());
}
