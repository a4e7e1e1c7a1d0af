//! MCP JSON-RPC surface: exposes bags, items, and the ingestion primitives
//! as tools over the streamable HTTP transport, so AI assistants work with
//! the same data model as the REST API.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::*;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::classify::classify_input;
use crate::extract::ExtractorSet;
use crate::models::NewBagItem;
use crate::store::BagStore;

#[derive(Clone)]
pub struct TeedMcp {
    store: Arc<dyn BagStore>,
    extractors: ExtractorSet,
    token_timeout: Duration,
}

impl TeedMcp {
    pub fn new(
        store: Arc<dyn BagStore>,
        extractors: ExtractorSet,
        token_timeout: Duration,
    ) -> Self {
        Self {
            store,
            extractors,
            token_timeout,
        }
    }

    /// Mounts the handler as an axum-compatible streamable HTTP service.
    pub fn http_service(self) -> StreamableHttpService<TeedMcp, LocalSessionManager> {
        StreamableHttpService::new(
            move || Ok(self.clone()),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig::default(),
        )
    }

    /// Tool bodies live here rather than in `call_tool` so tests can invoke
    /// them without a JSON-RPC session.
    pub async fn dispatch_tool(&self, name: &str, args: &Value) -> Result<Value, String> {
        match name {
            "list_bags" => {
                let owner_id = required_uuid(args, "owner_id")?;
                let bags = self
                    .store
                    .bags_for_owner(owner_id)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(json!({ "bags": bags }))
            }
            "get_bag" => {
                let bag = if let Some(id) = optional_uuid(args, "id")? {
                    self.store.bag_by_id(id).await
                } else if let Some(handle) = args.get("handle").and_then(Value::as_str) {
                    self.store.bag_by_handle(handle).await
                } else {
                    return Err("provide either `id` or `handle`".into());
                }
                .map_err(|err| err.to_string())?
                .ok_or("bag not found")?;

                let items = self
                    .store
                    .items_for_bag(bag.id)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(json!({ "bag": bag, "items": items }))
            }
            "add_item" => {
                let bag_id = required_uuid(args, "bag_id")?;
                let name = args
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or("`name` is required")?;
                let bag = self
                    .store
                    .bag_by_id(bag_id)
                    .await
                    .map_err(|err| err.to_string())?
                    .ok_or("bag not found")?;
                let sort_index = self
                    .store
                    .max_sort_index(bag.id)
                    .await
                    .map_err(|err| err.to_string())?
                    .map_or(0, |max| max + 1);

                let item = self
                    .store
                    .insert_item(NewBagItem {
                        bag_id: bag.id,
                        name: name.to_string(),
                        brand: string_arg(args, "brand"),
                        price: args.get("price").and_then(Value::as_f64).filter(|p| *p > 0.0),
                        currency: string_arg(args, "currency"),
                        photo_url: None,
                        source_url: string_arg(args, "source_url"),
                        notes: string_arg(args, "notes"),
                        sort_index,
                    })
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(json!({ "item": item }))
            }
            "classify_links" => {
                let input = args
                    .get("input")
                    .and_then(Value::as_str)
                    .filter(|input| !input.trim().is_empty())
                    .ok_or("`input` is required")?;
                let tokens = classify_input(input);
                Ok(json!({ "count": tokens.len(), "tokens": tokens }))
            }
            "extract_item" => {
                let input = args
                    .get("input")
                    .and_then(Value::as_str)
                    .filter(|input| !input.trim().is_empty())
                    .ok_or("`input` is required")?;
                let token = classify_input(input)
                    .into_iter()
                    .next()
                    .ok_or("input produced no tokens")?;
                let item = self
                    .extractors
                    .dispatch(&token, self.token_timeout)
                    .await
                    .map_err(|failure| {
                        format!("extraction failed ({}): {failure}", failure.reason.code())
                    })?;
                Ok(json!({ "token": token, "item": item }))
            }
            other => Err(format!("no tool registered with name: {other}")),
        }
    }

    fn tool_descriptors() -> Vec<Tool> {
        vec![
            tool(
                "list_bags",
                "List the bags owned by a user.",
                json!({
                    "type": "object",
                    "properties": {
                        "owner_id": { "type": "string", "description": "Owner user UUID" }
                    },
                    "required": ["owner_id"]
                }),
                true,
            ),
            tool(
                "get_bag",
                "Fetch one bag with its items, by id or share handle.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "description": "Bag UUID" },
                        "handle": { "type": "string", "description": "Share handle" }
                    }
                }),
                true,
            ),
            tool(
                "add_item",
                "Append an item to a bag.",
                json!({
                    "type": "object",
                    "properties": {
                        "bag_id": { "type": "string" },
                        "name": { "type": "string" },
                        "brand": { "type": "string" },
                        "price": { "type": "number" },
                        "currency": { "type": "string" },
                        "source_url": { "type": "string" },
                        "notes": { "type": "string" }
                    },
                    "required": ["bag_id", "name"]
                }),
                false,
            ),
            tool(
                "classify_links",
                "Split pasted text into tokens and classify each as a product URL, embed URL, or free text.",
                json!({
                    "type": "object",
                    "properties": {
                        "input": { "type": "string", "description": "Raw pasted text or URLs" }
                    },
                    "required": ["input"]
                }),
                true,
            ),
            tool(
                "extract_item",
                "Run extraction for a single URL or text snippet and return the candidate item.",
                json!({
                    "type": "object",
                    "properties": {
                        "input": { "type": "string" }
                    },
                    "required": ["input"]
                }),
                true,
            ),
        ]
    }
}

fn tool(name: &str, description: &str, schema: Value, read_only: bool) -> Tool {
    let input_schema = match schema {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    };
    Tool {
        name: Cow::Owned(name.to_string()),
        title: None,
        description: Some(Cow::Owned(description.to_string())),
        input_schema,
        output_schema: None,
        annotations: read_only.then(|| ToolAnnotations::new().read_only(true)),
        execution: None,
        icons: None,
        meta: None,
    }
}

fn required_uuid(args: &Value, key: &str) -> Result<Uuid, String> {
    optional_uuid(args, key)?.ok_or_else(|| format!("`{key}` is required"))
}

fn optional_uuid(args: &Value, key: &str) -> Result<Option<Uuid>, String> {
    match args.get(key).and_then(Value::as_str) {
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|_| format!("`{key}` is not a valid UUID")),
        None => Ok(None),
    }
}

fn string_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl ServerHandler for TeedMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "teed".to_string(),
                title: Some("Teed".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Teed — curated gear collections (bags). Use list_bags / get_bag to read a \
                 user's collections, add_item to append to a bag, classify_links to see how \
                 pasted text would be tokenized, and extract_item to turn one URL or snippet \
                 into a candidate item."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::tool_descriptors())))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        Self::tool_descriptors()
            .into_iter()
            .find(|tool| tool.name == name)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if self.get_tool(&request.name).is_none() {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }

        let args = request
            .arguments
            .map(Value::Object)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        match self.dispatch_tool(&request.name, &args).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(message) => Ok(CallToolResult::error(vec![Content::text(message)])),
        }
    }
}
