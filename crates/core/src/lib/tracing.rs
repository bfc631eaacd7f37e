use std::sync::Once;

use derive_more::FromStr;
use tracing_subscriber::{layer::Layer, registry::Registry, util::SubscriberInitExt};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

static INIT: Once = Once::new();

#[derive(Debug, Clone, PartialEq, FromStr)]
pub enum LogFormat {
    Plain,
    Json,
}

pub struct LoggingConfig {
    format: LogFormat,
    is_test: bool,
    with_thread_names: bool,
}

impl LoggingConfig {
    pub fn default_for_test() -> Self {
        Self {
            format: LogFormat::Plain,
            is_test: true,
            with_thread_names: false,
        }
    }

    pub fn use_format(mut self, value: LogFormat) -> Self {
        self.format = value;
        self
    }

    pub fn with_thread_names(mut self, value: bool) -> Self {
        self.with_thread_names = value;
        self
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plain,
            is_test: false,
            with_thread_names: false,
        }
    }
}

pub fn setup_logger(config: LoggingConfig) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = match config.format {
            LogFormat::Json => json_subscriber::layer()
                .with_target(true)
                .with_thread_names(config.with_thread_names)
                .with_current_span(false)
                .with_span_list(false)
                .flatten_span_list_on_top_level(true)
                .flatten_event(true)
                .boxed(),
            LogFormat::Plain => tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_thread_names(config.with_thread_names)
                .boxed(),
        };

        let test_layer = if config.is_test {
            Some(tracing_subscriber::fmt::layer().compact().with_test_writer())
        } else {
            None
        };

        let registry = Registry::default().with(env_filter).with(fmt_layer).with(test_layer);
        registry.init();
    });
}
