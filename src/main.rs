//! # Jobs Set - Entry Point
//! src/main.rs
//!
//! Arma un lote de jobs de ejemplo según la configuración, lo ejecuta sobre
//! un `JobsSet` y escribe las estadísticas finales en stdout como JSON.
//! Los logs van a stderr (`RUST_LOG` controla el nivel).

use jobs_set::commands;
use jobs_set::config::Config;
use jobs_set::error::{JobsError, Result};
use jobs_set::events::{Handler, ReturnableEvent};
use jobs_set::jobs::{Job, JobsSet, JobsSetConfig};
use serde_json::{json, Map, Value};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobs_set=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::new();

    if let Err(e) = run(&config) {
        tracing::error!(error = %e, "jobs set failed");
        process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    config.validate()?;
    config.print_summary();

    let mut set = JobsSet::new(JobsSetConfig::from_config(config));

    // Un solo respondedor que arma la línea de log de cada job
    let formatter: Arc<ReturnableEvent<Job, String>> = Arc::new(ReturnableEvent::new());
    formatter.handle(Arc::new(|job: &Job| match job.exception() {
        Some(error) => format!("{} failed: {}", job.name(), error),
        None => format!("{} -> {}", job.name(), job.result().unwrap_or(Value::Null)),
    }));

    let on_running: Handler<Job> = Arc::new(|job: &Job| {
        tracing::debug!(job = %job.name(), "job running");
    });

    let on_finished: Handler<Job> = {
        let formatter = Arc::clone(&formatter);
        Arc::new(move |job: &Job| {
            if let Some(line) = formatter.invoke(job) {
                tracing::info!("{}", line);
            }
        })
    };

    // Con cola acotada, un put bloqueante sin consumidores no vuelve nunca:
    // los workers tienen que existir antes de encolar
    let bounded = config.queue_capacity > 0;
    if bounded {
        set.start(Some(config.workers.unwrap_or(config.queue_capacity)))?;
    }

    for i in 0..config.jobs {
        let job = Arc::new(build_job(i, config.fail_every));
        job.running_event().handle(Arc::clone(&on_running));
        job.finished_event().handle(Arc::clone(&on_finished));
        set.add_job(job, true)?;
    }

    if !bounded {
        set.start(None)?;
    }

    let joined = set.join(Some(config.join_timeout()));
    if let Err(JobsError::Timeout { .. }) = &joined {
        tracing::warn!(
            unfinished = set.unfinished(),
            "join timed out; remaining jobs are left running"
        );
    }

    match serde_json::to_string_pretty(&set.stats()) {
        Ok(stats) => println!("{}", stats),
        Err(e) => tracing::error!(error = %e, "could not serialize stats"),
    }

    joined
}

/// Job `i` del lote, rotando entre los cuerpos de ejemplo
fn build_job(i: usize, fail_every: usize) -> Job {
    if fail_every > 0 && (i + 1) % fail_every == 0 {
        let mut kwargs = Map::new();
        kwargs.insert("reason".to_string(), json!(format!("job {} failed on purpose", i)));
        return Job::new(commands::fail).named("fail").with_kwargs(kwargs);
    }

    match i % 4 {
        0 => Job::new(commands::fibonacci)
            .named("fibonacci")
            .with_args(vec![json!((i * 7) % 91)]),
        1 => Job::new(commands::is_prime)
            .named("is_prime")
            .with_args(vec![json!(1_000_000_007u64 + i as u64)]),
        2 => Job::new(commands::sha256)
            .named("sha256")
            .with_args(vec![json!(format!("job-{}", i))]),
        _ => Job::new(commands::simulate)
            .named("simulate")
            .with_args(vec![json!(500), json!(format!("remote-call-{}", i))]),
    }
}
