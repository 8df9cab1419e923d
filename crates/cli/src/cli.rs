use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

/// Schedule jobs on remote tasq supervisors.
///
/// The broker is picked with `--url` (or `TASQ_URL`), or from the `[client]`
/// section of a TOML file passed with `--config`.
#[derive(Parser, Debug)]
#[command(name = "tasq", version, about)]
pub struct CliArgs {
    /// Broker connection string, e.g. zmq://10.0.0.4:9000 or redis://cache?name=jobs
    #[arg(long, env = "TASQ_URL", global = true)]
    pub url: Option<String>,

    /// Path to a tasq TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// How long to wait for results, in milliseconds
    #[arg(long, default_value_t = 10_000, global = true)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Schedule one job and print its result
    Schedule {
        /// Name of the function the supervisor should run
        func: String,

        /// Positional arguments, parsed as JSON where possible
        #[arg(value_parser = parse_value)]
        args: Vec<Value>,

        /// Job name used to correlate the result (random if omitted)
        #[arg(long)]
        name: Option<String>,

        /// Keyword argument as key=value, value parsed as JSON where possible
        #[arg(long = "kwarg", value_parser = parse_kwarg)]
        kwargs: Vec<(String, Value)>,

        /// Print the job id and exit without waiting for the result
        #[arg(long)]
        no_wait: bool,
    },

    /// List jobs still queued on the broker
    Pending,

    /// Run a function once per value, spread over a pool of supervisors
    Map {
        /// Name of the function the supervisors should run
        func: String,

        /// One call per value, each passed as the single positional argument
        #[arg(value_parser = parse_value, required = true)]
        values: Vec<Value>,

        /// Comma-separated supervisor endpoints (defaults to `[pool]` in the config)
        #[arg(long, value_delimiter = ',')]
        endpoints: Vec<String>,
    },
}

/// JSON literal if it parses, plain string otherwise.
pub fn parse_value(raw: &str) -> Result<Value, String> {
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

pub fn parse_kwarg(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty keyword in {raw:?}"));
    }
    Ok((key.to_string(), parse_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_prefer_json() {
        assert_eq!(parse_value("3").unwrap(), json!(3));
        assert_eq!(parse_value("[1,2]").unwrap(), json!([1, 2]));
        assert_eq!(parse_value("hello").unwrap(), json!("hello"));
    }

    #[test]
    fn kwargs_split_on_first_equals() {
        assert_eq!(parse_kwarg("expr=a=b").unwrap(), ("expr".into(), json!("a=b")));
        assert_eq!(parse_kwarg("n=4").unwrap(), ("n".into(), json!(4)));
        assert!(parse_kwarg("novalue").is_err());
        assert!(parse_kwarg("=1").is_err());
    }

    #[test]
    fn schedule_command_parses() {
        let args = CliArgs::try_parse_from([
            "tasq", "schedule", "add", "1", "2", "--name", "a", "--kwarg", "scale=2",
            "--url", "zmq://10.0.0.4:9000",
        ])
        .unwrap();
        assert_eq!(args.url.as_deref(), Some("zmq://10.0.0.4:9000"));
        match args.command {
            Command::Schedule { func, args, name, kwargs, no_wait } => {
                assert_eq!(func, "add");
                assert_eq!(args, vec![json!(1), json!(2)]);
                assert_eq!(name.as_deref(), Some("a"));
                assert_eq!(kwargs, vec![("scale".to_string(), json!(2))]);
                assert!(!no_wait);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn map_takes_endpoint_list() {
        let args = CliArgs::try_parse_from([
            "tasq", "map", "square", "1", "2", "3", "--endpoints", "zmq://a:9000,zmq://b:9000",
        ])
        .unwrap();
        match args.command {
            Command::Map { values, endpoints, .. } => {
                assert_eq!(values.len(), 3);
                assert_eq!(endpoints, vec!["zmq://a:9000", "zmq://b:9000"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
