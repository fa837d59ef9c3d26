//! Configuration parsing and validation for the proxy server
//!
//! This module handles command-line argument parsing and validation using clap. Every flag can
//! also come from the environment, and connection, model and alias entries given on the command
//! line are layered over the optional JSON config file.
use anyhow::bail;
use clap::Parser;
use modelmux::connection::{ConnectionConfig, ModelConfig, RouterConfig};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The address on which the proxy server will listen.
    #[arg(short = 'a', long, env = "MODELMUX_LISTEN", default_value = "localhost:11434")]
    pub listen: String,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, env = "MODELMUX_LEVEL", default_value = "error")]
    pub level: String,

    /// Route a model to a connection id or backend URL, as `model=destination`.
    #[arg(long = "proxy")]
    pub proxy: Vec<String>,

    /// Comma-separated `model=destination` pairs.
    #[arg(long, env = "MODELMUX_PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,

    /// Declare a backend connection, as `id=url`.
    #[arg(long = "connection")]
    pub connection: Vec<String>,

    /// Comma-separated `id=url` pairs.
    #[arg(long, env = "MODELMUX_CONNECTIONS", value_delimiter = ',')]
    pub connections: Vec<String>,

    /// Declare an alias for a configured model, as `alias=model`.
    #[arg(long = "alias")]
    pub alias: Vec<String>,

    /// Comma-separated `alias=model` pairs.
    #[arg(long, env = "MODELMUX_ALIASES", value_delimiter = ',')]
    pub aliases: Vec<String>,

    /// Whether model listings include one entry per alias.
    #[arg(long, env = "MODELMUX_LIST_ALIASES")]
    pub list_aliases: bool,

    /// Optional JSON file with connections, models and aliases. Flags take precedence.
    #[arg(short = 'f', long, env = "MODELMUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Whether to enable the metrics endpoint.
    #[arg(short = 'm', long, default_value_t = true)]
    pub metrics: bool,

    /// The port on which the metrics server will listen.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// The prefix to use for metrics.
    #[arg(long, default_value = "modelmux")]
    pub metrics_prefix: String,
}

struct PairKind {
    name: &'static str,
    key: &'static str,
    value: &'static str,
}

const CONNECTION: PairKind = PairKind {
    name: "connection",
    key: "connection id",
    value: "connection destination",
};

const PROXY: PairKind = PairKind {
    name: "proxy",
    key: "proxy model",
    value: "proxy destination",
};

const ALIAS: PairKind = PairKind {
    name: "alias",
    key: "alias name",
    value: "alias model",
};

/// Splits `key=value` entries, rejecting empty halves and repeated keys.
fn parse_pairs<'a>(
    kind: &PairKind,
    values: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<(String, String)>, anyhow::Error> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for raw in values {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let Some((key, value)) = raw.split_once('=') else {
            bail!("invalid {} string: {}", kind.name, raw);
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() {
            bail!("empty {} in {}", kind.key, raw);
        }
        if value.is_empty() {
            bail!("empty {} in {}", kind.value, raw);
        }
        if !seen.insert(key.to_string()) {
            bail!("duplicate {}: {}", kind.key, key);
        }
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}

impl Config {
    /// Layers the command-line entries over `file`.
    pub fn router_config(&self, file: RouterConfig) -> Result<RouterConfig, anyhow::Error> {
        let connections = parse_pairs(&CONNECTION, self.connection.iter().chain(&self.connections))?;
        let proxies = parse_pairs(&PROXY, self.proxy.iter().chain(&self.proxies))?;
        let aliases = parse_pairs(&ALIAS, self.alias.iter().chain(&self.aliases))?;

        let mut config = file;

        let known = config.connections.get_or_insert_with(Default::default);
        for (id, url) in connections {
            known.insert(id.clone(), ConnectionConfig { id, url });
        }

        if !proxies.is_empty() {
            let models = config.models.get_or_insert_with(Default::default);
            for (model, destination) in proxies {
                models.insert(
                    model,
                    ModelConfig {
                        connection_id: destination,
                    },
                );
            }
        }

        config.aliases.extend(aliases);

        if self.list_aliases {
            config.expose_aliases = Some(true);
        } else if config.expose_aliases.is_none() {
            config.expose_aliases = Some(false);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("modelmux").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.listen, "localhost:11434");
        assert_eq!(config.level, "error");
        assert!(!config.list_aliases);
        assert!(config.metrics);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.metrics_prefix, "modelmux");
    }

    #[test]
    fn test_flags_build_router_config() {
        let config = parse(&[
            "--connection",
            "gpu-1=http://gpu-1:11434",
            "--proxy",
            "llama3.2=gpu-1",
            "--proxies",
            "qwen2.5:7b=http://gpu-2:11434,phi3=gpu-1",
            "--alias",
            "fast=llama3.2",
            "--list-aliases",
        ]);

        let router_config = config.router_config(RouterConfig::default()).unwrap();
        let models = router_config.models.as_ref().unwrap();
        assert_eq!(models.len(), 3);
        assert_eq!(models["qwen2.5:7b"].connection_id, "http://gpu-2:11434");
        assert_eq!(
            router_config.connections.as_ref().unwrap()["gpu-1"].url,
            "http://gpu-1:11434"
        );
        assert_eq!(router_config.aliases["fast"], "llama3.2");
        assert_eq!(router_config.expose_aliases, Some(true));
        assert!(router_config.reconcile().is_ok());
    }

    #[test]
    fn test_flags_override_file_entries() {
        let file = RouterConfig {
            connections: Some(HashMap::from([(
                "gpu-1".to_string(),
                ConnectionConfig {
                    id: "gpu-1".into(),
                    url: "http://old:11434".into(),
                },
            )])),
            models: Some(HashMap::from([(
                "llama3.2".to_string(),
                ModelConfig {
                    connection_id: "gpu-1".into(),
                },
            )])),
            aliases: BTreeMap::from([("fast".to_string(), "llama3.2".to_string())]),
            expose_aliases: Some(true),
        };
        let config = parse(&["--connection", "gpu-1=http://new:11434"]);

        let router_config = config.router_config(file).unwrap();
        assert_eq!(
            router_config.connections.as_ref().unwrap()["gpu-1"].url,
            "http://new:11434"
        );
        assert_eq!(router_config.models.as_ref().unwrap().len(), 1);
        assert_eq!(router_config.aliases.len(), 1);
        assert_eq!(router_config.expose_aliases, Some(true));
    }

    #[test]
    fn test_no_models_anywhere_is_reported_by_reconcile() {
        let router_config = parse(&[]).router_config(RouterConfig::default()).unwrap();
        assert_eq!(
            router_config.reconcile().unwrap_err().to_string(),
            "missing models config"
        );
    }

    #[test]
    fn test_pair_errors() {
        let err = |kind: &PairKind, value: &str| {
            parse_pairs(kind, [value.to_string()].iter())
                .unwrap_err()
                .to_string()
        };

        assert_eq!(
            err(&CONNECTION, "gpu-1"),
            "invalid connection string: gpu-1"
        );
        assert_eq!(
            err(&CONNECTION, "=http://gpu-1"),
            "empty connection id in =http://gpu-1"
        );
        assert_eq!(
            err(&CONNECTION, "gpu-1="),
            "empty connection destination in gpu-1="
        );
        assert_eq!(err(&PROXY, "=gpu-1"), "empty proxy model in =gpu-1");
        assert_eq!(err(&PROXY, "llama3.2="), "empty proxy destination in llama3.2=");
        assert_eq!(err(&ALIAS, "fast"), "invalid alias string: fast");
        assert_eq!(err(&ALIAS, "=llama3.2"), "empty alias name in =llama3.2");
        assert_eq!(err(&ALIAS, "fast="), "empty alias model in fast=");
    }

    #[test]
    fn test_duplicate_flag_entries_are_rejected() {
        let config = parse(&[
            "--connection",
            "gpu-1=http://a:11434",
            "--connections",
            "gpu-1=http://b:11434",
        ]);
        let err = config
            .router_config(RouterConfig::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate connection id: gpu-1");
    }

    #[test]
    fn test_blank_entries_are_ignored() {
        let values = vec![" ".to_string(), "fast=llama3.2".to_string(), String::new()];
        let pairs = parse_pairs(&ALIAS, values.iter()).unwrap();
        assert_eq!(pairs, vec![("fast".to_string(), "llama3.2".to_string())]);
    }
}
