use clap::{Parser, Subcommand, ValueEnum};
use shortcut_core::DEFAULT_PAGE_LIMIT;
use shortcut_storage::redis::DEFAULT_PREFIX as DEFAULT_REDIS_PREFIX;
use std::fmt::{Display, Formatter};

pub const BACKEND_ENV: &str = "SHORTCUT_BACKEND";
pub const REDIS_URL_ENV: &str = "SHORTCUT_REDIS_URL";
pub const REDIS_PREFIX_ENV: &str = "SHORTCUT_REDIS_PREFIX";
pub const DYNAMODB_TABLE_ENV: &str = "SHORTCUT_DYNAMODB_TABLE";
pub const DYNAMODB_REGION_ENV: &str = "SHORTCUT_DYNAMODB_REGION";
pub const DYNAMODB_ENDPOINT_ENV: &str = "SHORTCUT_DYNAMODB_ENDPOINT";
pub const LOG_FORMAT_ENV: &str = "SHORTCUT_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "redis")]
    Redis,
    #[value(name = "dynamodb")]
    DynamoDb,
}

impl Display for BackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendArg::InMemory => write!(f, "in-memory"),
            BackendArg::Redis => write!(f, "redis"),
            BackendArg::DynamoDb => write!(f, "dynamodb"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "shortcut", about = "Manage short links in a link store")]
pub struct CLI {
    #[arg(
        long,
        global = true,
        env = BACKEND_ENV,
        value_enum,
        default_value_t = BackendArg::InMemory
    )]
    pub backend: BackendArg,

    #[arg(long, global = true, env = REDIS_URL_ENV, required_if_eq("backend", "redis"))]
    pub redis_url: Option<String>,

    #[arg(
        long,
        global = true,
        env = REDIS_PREFIX_ENV,
        default_value = DEFAULT_REDIS_PREFIX
    )]
    pub redis_prefix: String,

    #[arg(
        long,
        global = true,
        env = DYNAMODB_TABLE_ENV,
        required_if_eq("backend", "dynamodb")
    )]
    pub dynamodb_table: Option<String>,

    #[arg(long, global = true, env = DYNAMODB_REGION_ENV)]
    pub dynamodb_region: Option<String>,

    /// Endpoint override, e.g. `http://localhost:8000` for DynamoDB Local.
    #[arg(long, global = true, env = DYNAMODB_ENDPOINT_ENV)]
    pub dynamodb_endpoint: Option<String>,

    #[arg(
        long,
        global = true,
        env = LOG_FORMAT_ENV,
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Provision backend storage (creates the DynamoDB table).
    Init,
    /// Create a link; fails if the name is taken.
    Create { name: String, url: String },
    /// Create a link under a random name.
    Generate {
        url: String,
        #[arg(long, default_value_t = 6)]
        length: usize,
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value_t = 5)]
        attempts: u32,
    },
    Get { name: String },
    /// Point an existing link at a new url.
    Update { name: String, url: String },
    Rename { name: String, new_name: String },
    Delete { name: String },
    /// Names pointing at a url.
    ByUrl { url: String },
    /// Names by recency, newest first.
    List {
        #[arg(long)]
        token: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_with_defaults() {
        let cli = CLI::try_parse_from(["shortcut", "list"]).unwrap();
        assert_eq!(cli.backend, BackendArg::InMemory);
        assert_eq!(cli.redis_prefix, shortcut_storage::redis::DEFAULT_PREFIX);
        assert_eq!(
            cli.redis_prefix,
            shortcut_storage::RedisBackendConfig::builder()
                .url("redis://127.0.0.1:6379")
                .build()
                .prefix
        );
        assert_eq!(
            cli.command,
            Command::List {
                token: None,
                limit: DEFAULT_PAGE_LIMIT
            }
        );
    }

    #[test]
    fn redis_requires_url() {
        assert!(CLI::try_parse_from(["shortcut", "--backend", "redis", "list"]).is_err());

        let cli = CLI::try_parse_from([
            "shortcut",
            "get",
            "demo",
            "--backend",
            "redis",
            "--redis-url",
            "redis://127.0.0.1:6379",
        ])
        .unwrap();
        assert_eq!(cli.backend, BackendArg::Redis);
        assert_eq!(cli.command, Command::Get { name: "demo".into() });
    }

    #[test]
    fn dynamodb_requires_table() {
        assert!(CLI::try_parse_from(["shortcut", "--backend", "dynamodb", "init"]).is_err());
        let cli = CLI::try_parse_from([
            "shortcut",
            "--backend",
            "dynamodb",
            "--dynamodb-table",
            "links",
            "rename",
            "a",
            "b",
        ])
        .unwrap();
        assert_eq!(cli.dynamodb_table.as_deref(), Some("links"));
        assert_eq!(
            cli.command,
            Command::Rename {
                name: "a".into(),
                new_name: "b".into()
            }
        );
    }
}
