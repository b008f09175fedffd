//! JSON-RPC Server
//!
//! Serves the job API over HTTP on a TCP listener (localhost by default).

use crate::handler::RpcHandler;
use crate::types::{EmptyRequest, JobIdRequest, ListJobsRequest, PollLogsRequest, RunJobRequest};
use jsonrpsee::server::Server;
pub use jsonrpsee::server::ServerHandle;
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9630;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    /// 0 binds an ephemeral port
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

/// Registers one method that parses its params and forwards to the handler
macro_rules! register {
    ($module:expr, $handler:expr, $name:literal, $req:ty, $method:ident) => {{
        let handler = Arc::clone(&$handler);
        $module
            .register_async_method($name, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: $req = params.parse()?;
                    handler.$method(req).await
                }
            })
            .map_err(|e| e.to_string())?;
    }};
    // Params may be omitted entirely
    ($module:expr, $handler:expr, $name:literal, $req:ty, $method:ident, optional) => {{
        let handler = Arc::clone(&$handler);
        $module
            .register_async_method($name, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: Option<$req> = params.parse()?;
                    handler.$method(req.unwrap_or_default()).await
                }
            })
            .map_err(|e| e.to_string())?;
    }};
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    fn build_module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());

        // Job control
        register!(module, self.handler, "jobs.run.v1", RunJobRequest, run);
        register!(module, self.handler, "jobs.get.v1", JobIdRequest, get);
        register!(module, self.handler, "jobs.cancel.v1", JobIdRequest, cancel);
        register!(module, self.handler, "jobs.remove.v1", JobIdRequest, remove);
        register!(module, self.handler, "jobs.list.v1", ListJobsRequest, list, optional);
        register!(module, self.handler, "jobs.active.v1", EmptyRequest, active, optional);

        // Incremental log retrieval
        register!(module, self.handler, "logs.poll.v1", PollLogsRequest, poll_logs);

        // Admin
        register!(module, self.handler, "admin.stats.v1", EmptyRequest, stats, optional);

        Ok(module)
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the bound address (useful with port 0) and the handle used to stop it.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.build_module()?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, handle))
    }
}
