use anyhow::Context;
use std::path::PathBuf;
use weaveruntime::RuntimeConfig;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Server settings read from `WEAVE_*` environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Execution history snapshot, loaded at start and written on shutdown
    pub history_file: Option<PathBuf>,
    pub runtime: RuntimeConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut runtime = RuntimeConfig::default();

        if let Some(max) = env_var("WEAVE_MAX_PARALLEL_NODES") {
            runtime.max_parallel_nodes = max
                .parse()
                .with_context(|| format!("WEAVE_MAX_PARALLEL_NODES is not a number: {}", max))?;
        }
        if let Some(max) = env_var("WEAVE_MAX_HISTORY") {
            runtime.max_history = Some(
                max.parse()
                    .with_context(|| format!("WEAVE_MAX_HISTORY is not a number: {}", max))?,
            );
        }
        if let Some(ms) = env_var("WEAVE_NODE_TIMEOUT_MS") {
            runtime.default_node_timeout_ms = Some(
                ms.parse()
                    .with_context(|| format!("WEAVE_NODE_TIMEOUT_MS is not a number: {}", ms))?,
            );
        }

        Ok(Self {
            bind_address: env_var("WEAVE_BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            history_file: env_var("WEAVE_HISTORY_FILE").map(PathBuf::from),
            runtime,
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
