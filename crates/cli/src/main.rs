mod cli;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;

use tasq_core::config::load_dotenv;
use tasq_core::ClientConfig;
use tasq_remote::{Job, JobResult, PoolConfig, TasqClient, TasqClientPool, TasqConfig};

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let args = CliArgs::parse();
    let timeout = Duration::from_millis(args.timeout_ms);

    let file_config = match &args.config {
        Some(path) => Some(
            TasqConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
        ),
        None => None,
    };
    let mut client_config = match &file_config {
        Some(cfg) => cfg.client.clone(),
        None => ClientConfig::from_env(),
    };
    if let Some(url) = &args.url {
        client_config.url = url.clone();
    }

    match args.command {
        Command::Schedule {
            func,
            args: call_args,
            name,
            kwargs,
            no_wait,
        } => {
            client_config.log_summary();
            let mut builder = Job::builder(func)
                .args(call_args)
                .kwargs(kwargs.into_iter().collect::<BTreeMap<_, _>>());
            if let Some(name) = name {
                builder = builder.name(name);
            }
            schedule(&client_config, builder.build(), no_wait, timeout).await
        }
        Command::Pending => pending(&client_config).await,
        Command::Map {
            func,
            values,
            endpoints,
        } => {
            let pool_config = if endpoints.is_empty() {
                file_config.map(|cfg| cfg.pool).unwrap_or_default()
            } else {
                PoolConfig::new(endpoints)
            };
            if pool_config.endpoints.is_empty() {
                bail!("no endpoints: pass --endpoints or a config with [pool] endpoints");
            }
            map(&pool_config, &func, values, timeout).await
        }
    }
}

async fn schedule(config: &ClientConfig, job: Job, no_wait: bool, timeout: Duration) -> Result<()> {
    let client = TasqClient::from_config(config).context("invalid client configuration")?;
    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", client.label()))?;

    info!(job = %job, "scheduling");
    if no_wait {
        let job_id = job.job_id().to_string();
        client.schedule(job).await?;
        println!("{}", json!({ "job_id": job_id }));
    } else {
        let result = client.schedule_blocking(job, timeout).await?;
        println!("{}", render(&result));
    }
    client.close().await?;
    Ok(())
}

async fn pending(config: &ClientConfig) -> Result<()> {
    let client = TasqClient::from_config(config).context("invalid client configuration")?;
    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", client.label()))?;

    match client.broker_pending_jobs().await? {
        Some(jobs) => {
            for job in jobs {
                println!("{}", serde_json::to_string(&job)?);
            }
        }
        None => bail!("{} cannot list queued jobs", client.label()),
    }
    client.close().await?;
    Ok(())
}

async fn map(config: &PoolConfig, func: &str, values: Vec<Value>, timeout: Duration) -> Result<()> {
    let pool: TasqClientPool = TasqClientPool::from_config(config)?;
    let calls = values.into_iter().map(|v| (vec![v], BTreeMap::<String, Value>::new()));
    let futures = pool.map(func, calls).await?;

    let mut missing = 0;
    for future in futures {
        let result = match future {
            Some(future) => future.result(Some(timeout)).await,
            None => None,
        };
        match result {
            Some(result) => println!("{}", render(&result)),
            None => {
                missing += 1;
                println!("null");
            }
        }
    }
    pool.shutdown().await;
    if missing > 0 {
        bail!("{missing} job(s) produced no result within {timeout:?}");
    }
    Ok(())
}

fn render(result: &JobResult) -> Value {
    json!({
        "name": result.name,
        "status": result.outcome.to_string(),
        "value": result.value,
        "exc": result.exc,
        "exec_time_ms": result.exec_time.as_millis() as u64,
    })
}
