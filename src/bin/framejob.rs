use std::io::IsTerminal as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use framejob::session::synthetic::synthetic_request;
use framejob::{
    Engine, InMemorySubmitter, LayoutAllocator, LayoutSchema, SequentialAllocator, StageKind,
    StageSet, StreamConfig, StridedMapper, negotiate,
};

#[derive(Parser, Debug)]
#[command(name = "framejob", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Negotiate a stream and print the pass plan and job layout.
    Plan(PlanArgs),
    /// Run synthetic requests through an engine and print per-job summaries.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Stream configuration JSON.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Stream configuration JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Number of request ids to walk through, starting at 0.
    #[arg(long, default_value_t = 4)]
    requests: u64,

    /// Request id to skip, breaking reference continuity.
    #[arg(long)]
    drop: Option<u64>,

    /// Enabled stages, comma separated (e.g. `anr,tf,ica1`).
    #[arg(long, value_delimiter = ',', default_value = "anr,tf,hnr,ltm,ica1")]
    stages: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Plan(args) => cmd_plan(args),
        Command::Run(args) => cmd_run(args),
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn read_stream(path: &Path) -> anyhow::Result<StreamConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read stream config '{}'", path.display()))?;
    Ok(StreamConfig::from_json_str(&s)?)
}

fn parse_stages(names: &[String]) -> anyhow::Result<StageSet> {
    names
        .iter()
        .map(|n| {
            serde_json::from_value::<StageKind>(serde_json::Value::String(n.trim().to_owned()))
                .with_context(|| format!("unknown stage '{n}'"))
        })
        .collect()
}

fn cmd_plan(args: PlanArgs) -> anyhow::Result<()> {
    let stream = read_stream(&args.in_path)?;
    let negotiation = negotiate(&stream.engine.limits, &stream.outputs)?;
    let map = LayoutAllocator::new(LayoutSchema::v1())?.compute_layout(negotiation.plan.len())?;

    let out = serde_json::json!({
        "input": negotiation.input,
        "passes": negotiation.plan,
        "layout": {
            "pass_count": map.pass_count(),
            "used_size": map.used_size(),
            "job_size": map.job_size(),
            "digest": format!("{:016x}", map.digest()),
            "tables": map.tables(),
            "luts": map.luts(),
            "refs": map.refs(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let stream = read_stream(&args.in_path)?;
    let enabled = parse_stages(&args.stages)?;

    let allocator = Arc::new(Mutex::new(SequentialAllocator::new()));
    let mut engine = Engine::configure(stream.engine, &stream.outputs, Box::new(allocator.clone()))?;
    let mapper = StridedMapper::default();
    let mut submitter = InMemorySubmitter::new();

    let mut jobs = Vec::new();
    for request_id in 0..args.requests {
        if args.drop == Some(request_id) {
            tracing::info!(request_id, "dropping request");
            continue;
        }
        let mut caller = allocator.clone();
        let (request, buffers) = synthetic_request(&engine, &mut caller, request_id, enabled)?;
        let prepared = engine
            .prepare(&request)
            .with_context(|| format!("prepare request {request_id}"))?;
        let cost = prepared.cost();
        let in_flight = engine
            .submit(prepared, &mapper, &mut submitter)
            .with_context(|| format!("submit request {request_id}"))?;

        let job = in_flight.job();
        jobs.push(serde_json::json!({
            "request_id": request_id,
            "continuity": in_flight.continuity(),
            "programs": job.programs().len(),
            "skipped": job.programs().iter().filter(|p| p.is_skip()).count(),
            "patches": job.patches().len(),
            "ref_valid": engine.plan().passes().iter()
                .map(|p| job.ref_valid_mask(p.name))
                .collect::<Vec<_>>(),
            "cost": cost,
        }));

        engine.complete(in_flight, true)?;
        buffers.free(&mut caller)?;
    }
    engine.teardown()?;

    let out = serde_json::json!({
        "input": engine.plan().input(),
        "passes": engine.plan().len(),
        "jobs": jobs,
        "submitted": submitter.submitted(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
