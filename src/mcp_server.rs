//! MCP server for the speaker box using rmcp.
//!
//! Exposes tools for MCP clients:
//! - speak, say_aloud: queue text through the same service as `POST /speak`
//! - status: current VOICEVOX and playback settings

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::tool::{Parameters, ToolRouter};
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::transport::sse_server::SseServerConfig;
use rmcp::transport::SseServer;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::reply::Mode;
use crate::service::SpeakService;
use crate::speaker_box::SpeakRequest;

#[derive(Debug, Deserialize, rmcp::schemars::JsonSchema)]
pub struct SpeakArgs {
    #[schemars(description = "The text to speak aloud")]
    pub text: String,
    #[schemars(description = "'direct' speaks the text as-is (default), 'llm' speaks a generated reply")]
    pub mode: Option<String>,
    #[schemars(description = "Generate the reply without playing audio")]
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Clone)]
pub struct SpeakerMcp {
    service: Arc<SpeakService>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SpeakerMcp {
    pub fn new(service: Arc<SpeakService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Speak text aloud through VOICEVOX.\n\nArgs:\n    text: The text to speak aloud\n    mode: 'direct' (default) or 'llm'\n    dry_run: Skip playback")]
    async fn speak(
        &self,
        Parameters(args): Parameters<SpeakArgs>,
    ) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(
            self.speak_text(args).await,
        )]))
    }

    #[tool(description = "Alias of speak.")]
    async fn say_aloud(
        &self,
        Parameters(args): Parameters<SpeakArgs>,
    ) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(
            self.speak_text(args).await,
        )]))
    }

    #[tool(description = "Get the speaker box configuration.")]
    async fn status(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(self.status_text())]))
    }
}

impl SpeakerMcp {
    async fn speak_text(&self, args: SpeakArgs) -> String {
        let mode = match args.mode.as_deref().map(str::trim) {
            None | Some("") | Some("direct") => Mode::Direct,
            Some("llm") => Mode::Llm,
            Some(other) => return format!("error: unknown mode '{other}' (use direct or llm)"),
        };
        if args.text.trim().is_empty() {
            return "error: text is required".into();
        }

        let request = SpeakRequest {
            dry_run: args.dry_run,
            ..SpeakRequest::new(args.text, mode)
        };
        match self.service.speak(request).await {
            Ok(result) => serde_json::to_string(&result).unwrap_or_else(|e| format!("error: {e}")),
            Err(e) => format!("error: {e}"),
        }
    }

    fn status_text(&self) -> String {
        let config = self.service.speaker_box().config();
        json!({
            "service": "vv-speaker",
            "voicevox_url": config.voicevox.url,
            "speaker_name": config.voicevox.speaker_name,
            "stream_playback": config.playback.stream,
        })
        .to_string()
    }
}

#[tool_handler]
impl ServerHandler for SpeakerMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("VOICEVOX speaker box. Use speak to read text aloud, status to inspect settings.".into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Start the MCP SSE server on the given port (runs in background).
pub async fn start_mcp_server(port: u16, service: Arc<SpeakService>) {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();

    let config = SseServerConfig {
        bind: addr,
        sse_path: "/sse".to_string(),
        post_path: "/message".to_string(),
        ct: CancellationToken::new(),
        sse_keep_alive: Some(Duration::from_secs(15)),
    };

    match SseServer::serve_with_config(config).await {
        Ok(sse_server) => {
            info!("MCP SSE server listening on http://{addr}/sse");
            sse_server.with_service(move || SpeakerMcp::new(service.clone()));
        }
        Err(e) => {
            warn!("Failed to start MCP server on {addr}: {e}");
        }
    }
}
