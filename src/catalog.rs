//! Machine-readable tool catalogue.
//!
//! One entry per `ToolCall` variant. The schemas describe the argument
//! objects `ToolCall::parse` accepts, in standard JSON Schema shape, so a
//! caller can discover the surface without reading source.

use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub fn catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "navigate",
            description: "Navigate to a URL, creating a browser session if none exists",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string" }
                },
                "required": ["url"]
            }),
        },
        ToolSpec {
            name: "new_session",
            description: "Create a new browser session and make it the active one",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Initial URL to navigate to" }
                }
            }),
        },
        ToolSpec {
            name: "screenshot",
            description: "Take a screenshot of the current page or a specific element",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "selector": {
                        "type": "string",
                        "description": "CSS selector for element to screenshot; omit for full page"
                    }
                },
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: "click",
            description: "Click an element on the page using CSS selector",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector for element to click" }
                },
                "required": ["selector"]
            }),
        },
        ToolSpec {
            name: "click_text",
            description: "Click an element on the page by its text content",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text content of the element to click" }
                },
                "required": ["text"]
            }),
        },
        ToolSpec {
            name: "fill",
            description: "Fill out an input field",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector for input field" },
                    "value": { "type": "string", "description": "Value to fill" }
                },
                "required": ["selector", "value"]
            }),
        },
        ToolSpec {
            name: "evaluate",
            description: "Execute JavaScript in the browser console",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "script": { "type": "string", "description": "JavaScript code to execute" }
                },
                "required": ["script"]
            }),
        },
        ToolSpec {
            name: "get_text_content",
            description: "Get the visible text content of the page",
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolSpec {
            name: "get_html_content",
            description: "Get the HTML content of an element",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector for the element" }
                },
                "required": ["selector"]
            }),
        },
        ToolSpec {
            name: "list_pages",
            description: "List all pages/tabs in the current browser session",
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolSpec {
            name: "switch_to_page",
            description: "Switch to a specific page/tab by index",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "index": { "type": "integer", "description": "Index of the page to switch to" }
                },
                "required": ["index"]
            }),
        },
        ToolSpec {
            name: "frame",
            description: "Switch to a specific iframe for subsequent operations; call with no arguments to reset to the main frame",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Name of the iframe to switch to" },
                    "selector": { "type": "string", "description": "CSS selector for the iframe (alternative to name)" }
                },
                "required": []
            }),
        },
    ]
}
