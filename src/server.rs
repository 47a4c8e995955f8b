use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};

use crate::config::Config;
use crate::generator::{ImageGenerator, RandomOptions};
use crate::response::{ErrorKind, ErrorOptions, batch_call_tool_result, create_error_result};
use crate::tools::generate::{GenerateImageRequest, GenerateMultipleRequest, GenerateRandomRequest};
use crate::tools::listproviders::{CatalogEntry, ListProvidersResponse, ProviderStatus};

#[derive(Clone)]
pub struct ImageGenServer {
    generator: ImageGenerator,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ImageGenServer {
    pub fn new(config: Config) -> Self {
        Self::with_generator(ImageGenerator::from_config(config))
    }

    pub fn with_generator(generator: ImageGenerator) -> Self {
        Self {
            generator,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "generate_image",
        description = "Generate one image with a configured provider key. Returns a JSON envelope with base64 `data` on success or a typed `errorCode`. Use `list_providers` for keys."
    )]
    async fn generate_image(
        &self,
        Parameters(req): Parameters<GenerateImageRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .generator
            .generate_provider_image(
                &req.provider,
                &req.prompt,
                req.settings.guidance,
                req.settings.user_id.as_deref(),
                req.settings.to_options(),
            )
            .await;
        Ok(result.into_call_tool_result())
    }

    #[tool(
        name = "generate_multiple",
        description = "Generate the same prompt with several provider keys concurrently (at most 5 in flight). Returns a JSON array with one envelope per key, in request order."
    )]
    async fn generate_multiple(
        &self,
        Parameters(req): Parameters<GenerateMultipleRequest>,
    ) -> Result<CallToolResult, McpError> {
        if req.providers.is_empty() {
            return Ok(create_error_result(
                ErrorKind::InvalidParams,
                "providers must not be empty",
                ErrorOptions::default(),
            )
            .into_call_tool_result());
        }
        let results = self
            .generator
            .generate_multiple_provider_images(
                &req.providers,
                &req.prompt,
                req.settings.guidance,
                req.settings.user_id.as_deref(),
                req.settings.to_options(),
            )
            .await;
        Ok(batch_call_tool_result(&results))
    }

    #[tool(
        name = "generate_random",
        description = "Pick one provider key from the list and generate with it. Pass `seed` for a deterministic pick (seed % number of keys)."
    )]
    async fn generate_random(
        &self,
        Parameters(req): Parameters<GenerateRandomRequest>,
    ) -> Result<CallToolResult, McpError> {
        let options = RandomOptions::from(req.settings.to_options());
        let result = self
            .generator
            .generate_random_provider_image(
                &req.providers,
                &req.prompt,
                req.settings.guidance,
                req.settings.user_id.as_deref(),
                options,
            )
            .await;
        Ok(result.into_call_tool_result())
    }

    #[tool(
        name = "list_providers",
        description = "List configured provider keys and the registered image providers with their credential status.",
        annotations(read_only_hint = true)
    )]
    async fn list_providers(&self) -> Result<CallToolResult, McpError> {
        let models: Vec<CatalogEntry> = self
            .generator
            .available_providers()
            .into_iter()
            .filter_map(|key| {
                let cfg = self.generator.provider_config(&key)?;
                Some(CatalogEntry::from((key, cfg)))
            })
            .collect();

        let registry = self.generator.registry();
        let mut providers = Vec::new();
        for name in registry.registered_providers() {
            let Ok(provider) = registry.create_provider(&name) else {
                continue;
            };
            providers.push(ProviderStatus {
                metadata: provider.metadata(),
                available: provider.test_availability(None).await,
            });
        }

        let list = ListProvidersResponse { models, providers };
        let json = serde_json::to_string(&list)
            .map_err(|e| McpError::internal_error(format!("failed to serialize providers: {e}"), None))?;
        Ok(CallToolResult::success(vec![
            Content::text(json),
            Content::text(list.to_markdown()),
        ]))
    }
}

#[tool_handler]
impl ServerHandler for ImageGenServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "imagegen".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "imagegen: text-to-image across OpenAI, Dezgo, Google Imagen and Grok.\n\n\
                 1. Call `list_providers` for provider keys and credential status.\n\
                 2. `generate_image` for one key, `generate_multiple` to compare keys side by side,\n\
                    `generate_random` to spread load (pass `seed` to make the pick reproducible).\n\
                 Every response is a JSON envelope: check `success`, then read `data` (base64)\n\
                 or `errorCode` and `retryable`."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
