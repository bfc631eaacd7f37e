use std::env;
use std::fmt::Debug;
use std::str::FromStr;

#[derive(Clone, Copy)]
pub struct EnvVarSpec {
    pub key: &'static str,
    pub sensitive: bool,
}

#[derive(Clone, Copy)]
pub struct EnvVarValue<TVal> {
    pub spec: &'static EnvVarSpec,
    pub value: TVal,
}

impl EnvVarSpec {
    pub fn default<TVal: FromStr>(&'static self, default: TVal) -> EnvVarValue<TVal> {
        let as_optional = self.optional();
        EnvVarValue {
            spec: as_optional.spec,
            value: as_optional.value.unwrap_or(default),
        }
    }

    pub fn optional<TVal: FromStr>(&'static self) -> EnvVarValue<Option<TVal>> {
        let value = match env::var(self.key) {
            Ok(val) => {
                let parsed = val
                    .parse()
                    .unwrap_or_else(|_e| panic!("Failed to parse env var {}", self.key));
                Some(parsed)
            }
            Err(e) => {
                tracing::debug!("Failed reading env var {}: {e:?}", self.key);
                None
            }
        };
        EnvVarValue { spec: self, value }
    }

    pub fn required<TVal: FromStr>(&'static self) -> EnvVarValue<TVal> {
        let raw_value =
            env::var(self.key).unwrap_or_else(|e| panic!("Failed to read env var {}: {e:?}", self.key));
        match raw_value.parse() {
            Ok(value) => EnvVarValue { spec: self, value },
            Err(_e) => {
                panic!("Failed to parse value {} for env var {}", raw_value, self.key)
            }
        }
    }
}

impl<TVal: Debug> Debug for EnvVarValue<TVal> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.spec.sensitive {
            f.write_str("***")
        } else {
            f.write_fmt(format_args!("{:?}", self.value))
        }
    }
}

pub const LOG_FORMAT: EnvVarSpec = EnvVarSpec {
    key: "LOG_FORMAT",
    sensitive: false,
};
pub const SERVICE_BIND_TO_ADDR: EnvVarSpec = EnvVarSpec {
    key: "SERVICE_BIND_TO_ADDR",
    sensitive: false,
};
pub const EXECUTION_LAYER_RPC: EnvVarSpec = EnvVarSpec {
    key: "EXECUTION_LAYER_RPC",
    sensitive: true,
};
pub const PRIVATE_KEY: EnvVarSpec = EnvVarSpec {
    key: "PRIVATE_KEY",
    sensitive: true,
};
pub const BUNDLE_REGISTRY_ADDRESS: EnvVarSpec = EnvVarSpec {
    key: "BUNDLE_REGISTRY_ADDRESS",
    sensitive: false,
};
pub const CHALLENGES_ADDRESS: EnvVarSpec = EnvVarSpec {
    key: "CHALLENGES_ADDRESS",
    sensitive: false,
};
pub const NODE_REGISTRY_ADDRESS: EnvVarSpec = EnvVarSpec {
    key: "NODE_REGISTRY_ADDRESS",
    sensitive: false,
};
pub const TIMESTAMP_LIMIT: EnvVarSpec = EnvVarSpec {
    key: "TIMESTAMP_LIMIT",
    sensitive: false,
};
pub const DEFAULT_STORAGE_PERIODS: EnvVarSpec = EnvVarSpec {
    key: "DEFAULT_STORAGE_PERIODS",
    sensitive: false,
};
pub const UPLOAD_WORKER_INTERVAL: EnvVarSpec = EnvVarSpec {
    key: "UPLOAD_WORKER_INTERVAL",
    sensitive: false,
};
pub const UPLOAD_RETRY_PERIOD: EnvVarSpec = EnvVarSpec {
    key: "UPLOAD_RETRY_PERIOD",
    sensitive: false,
};
pub const CHALLENGE_WORKER_INTERVAL: EnvVarSpec = EnvVarSpec {
    key: "CHALLENGE_WORKER_INTERVAL",
    sensitive: false,
};
pub const CHALLENGE_RETRY_TIMEOUT: EnvVarSpec = EnvVarSpec {
    key: "CHALLENGE_RETRY_TIMEOUT",
    sensitive: false,
};
pub const CHAIN_SYNC_POLL_SECONDS: EnvVarSpec = EnvVarSpec {
    key: "CHAIN_SYNC_POLL_SECONDS",
    sensitive: false,
};
pub const PROMETHEUS_NAMESPACE: EnvVarSpec = EnvVarSpec {
    key: "PROMETHEUS_NAMESPACE",
    sensitive: false,
};
