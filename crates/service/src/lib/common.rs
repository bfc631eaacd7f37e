use ambrosus_node_core::runtime::{EnvVars, NodeRuntime};

pub struct AppState {
    pub env_vars: EnvVars,
    pub runtime: NodeRuntime,
}

impl AppState {
    pub fn log_config_full(&self) {
        tracing::info!(
            env_vars = ?self.env_vars.for_logging(false),
            "Env vars",
        );
    }

    pub fn log_config_important(&self) {
        tracing::info!(
            env_vars = ?self.env_vars.for_logging(true),
            "Env vars",
        );
    }
}
