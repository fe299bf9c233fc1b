// crates/xgate-cli/src/main.rs
// ============================================================================
// Module: Exception Orchestrator CLI Entry Point
// Description: Command dispatcher for offline batch ingestion and
//              explanation rendering.
// Purpose: Give operators a thin, scriptable front door onto the pipeline
//          without standing up the HTTP surface (out of scope per spec §1).
// Dependencies: clap, tokio, xgate-core, xgate-agents, xgate-orchestrator,
//               xgate-policy, xgate-config, xgate-store, xgate-evidence,
//               xgate-audit, xgate-metrics, xgate-explanation
// ============================================================================

//! ## Overview
//! Two commands: `ingest` runs a batch of raw payloads through the full
//! five-agent pipeline and persists the results; `explain` renders an
//! already-ingested exception's explanation. Both commands wire the same
//! crates a long-running service would use, just for one process lifetime
//! instead of one that stays up.

mod pack_source;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use xgate_agents::FeedbackAgent;
use xgate_agents::HttpToolExecutor;
use xgate_agents::IntakeAgent;
use xgate_agents::NoopToolExecutor;
use xgate_agents::PolicyAgent;
use xgate_agents::ResolutionAgent;
use xgate_agents::SharedAuditTrail;
use xgate_agents::ToolExecutor;
use xgate_agents::TriageAgent;
use xgate_audit::AuditTrail;
use xgate_audit::JsonlAuditSink;
use xgate_audit::NoopAuditSink;
use xgate_core::DomainName;
use xgate_core::ExceptionId;
use xgate_core::RunId;
use xgate_core::TenantId;
use xgate_evidence::JsonlEvidenceTracker;
use xgate_explanation::ExplanationFormat;
use xgate_explanation::ExplanationService;
use xgate_metrics::InMemoryMetricsCollector;
use xgate_orchestrator::BatchItem;
use xgate_orchestrator::Orchestrator;
use xgate_policy::PolicyResolver;
use xgate_store::SqliteBackend;
use xgate_store::SqliteStoreConfig;

use pack_source::FilePackSource;

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "xgate", about = "Exception orchestration control plane operator CLI")]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run a batch of raw exception payloads through the full pipeline.
    Ingest(IngestArgs),
    /// Render an already-ingested exception's explanation.
    Explain(ExplainArgs),
}

/// Arguments for the `ingest` subcommand.
#[derive(Parser, Debug)]
struct IngestArgs {
    /// Path to a JSON array of raw exception payloads.
    #[arg(long)]
    batch: PathBuf,
    /// Path to the Domain Pack (JSON or YAML).
    #[arg(long)]
    domain_pack: PathBuf,
    /// Path to the Tenant Policy Pack (JSON or YAML).
    #[arg(long)]
    tenant_policy: PathBuf,
    /// The domain this batch is classified under (e.g. `finance`).
    #[arg(long)]
    domain: String,
    /// SQLite database path for the exception store and event log.
    /// Accepts `:memory:`.
    #[arg(long, default_value = ":memory:")]
    store: PathBuf,
    /// Directory for per-run audit JSONL files.
    #[arg(long, default_value = "./audit")]
    audit_dir: PathBuf,
    /// Directory for per-exception evidence JSONL files.
    #[arg(long, default_value = "./evidence")]
    evidence_dir: PathBuf,
    /// Base URL of an HTTP tool-execution collaborator for the Resolution
    /// Agent. Omit to run with a no-op executor (no remediation steps
    /// actually invoked).
    #[arg(long)]
    tool_endpoint: Option<String>,
    /// Maximum retries per resolution step.
    #[arg(long, default_value_t = 2)]
    max_retries: u32,
    /// Bound on concurrently in-flight exceptions.
    #[arg(long, default_value_t = 8)]
    max_concurrency: usize,
}

/// Arguments for the `explain` subcommand.
#[derive(Parser, Debug)]
struct ExplainArgs {
    /// SQLite database path the exception was ingested into.
    #[arg(long, default_value = ":memory:")]
    store: PathBuf,
    /// Directory holding the exception's evidence JSONL files.
    #[arg(long, default_value = "./evidence")]
    evidence_dir: PathBuf,
    /// Directory holding audit JSONL files to scan for mentions of this
    /// exception.
    #[arg(long, default_value = "./audit")]
    audit_dir: PathBuf,
    /// Owning tenant.
    #[arg(long)]
    tenant_id: String,
    /// Exception to explain.
    #[arg(long)]
    exception_id: String,
    /// Rendering format.
    #[arg(long, value_enum, default_value_t = FormatArg::Json)]
    format: FormatArg,
}

/// CLI-facing mirror of [`ExplanationFormat`] (clap needs `ValueEnum`).
#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    /// Full structured JSON.
    Json,
    /// Human-readable prose.
    Text,
    /// JSON with evidence grouped by kind and by linking agent.
    Structured,
}

impl From<FormatArg> for ExplanationFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => Self::Json,
            FormatArg::Text => Self::Text,
            FormatArg::Structured => Self::Structured,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Ingest(args) => ingest(args).await,
        Command::Explain(args) => explain(args),
    }
}

async fn ingest(args: IngestArgs) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&args.audit_dir)?;
    std::fs::create_dir_all(&args.evidence_dir)?;

    let raw_payloads: Vec<serde_json::Value> = serde_json::from_str(&std::fs::read_to_string(&args.batch)?)?;

    let domain_name = DomainName::new(args.domain.clone());
    let pack_source = FilePackSource::new(&args.domain_pack, &args.tenant_policy);
    let resolver = PolicyResolver::new(pack_source);

    let tenant_policy_pack = xgate_config::load_tenant_policy_pack(&args.tenant_policy)?;
    let tenant_id = tenant_policy_pack.tenant_id.clone();
    let resolved_policy = resolver.resolve(&tenant_id, &domain_name)?;
    let domain_pack = resolved_policy.domain_pack.clone();

    let run_id = RunId::new(format!("ingest-{}", xgate_core::Timestamp::now_utc().to_rfc3339()));
    let audit_path = JsonlAuditSink::path_for_run(&args.audit_dir, &run_id);
    let open_trail = |run_id: RunId, tenant_id: TenantId| -> Result<SharedAuditTrail, xgate_audit::AuditError> {
        let sink: Box<dyn xgate_audit::AuditSink> = Box::new(JsonlAuditSink::open(&audit_path)?);
        Ok(AuditTrail::open(run_id, tenant_id, sink))
    };

    let intake = IntakeAgent::new(Some(domain_pack.clone()), Some(open_trail(run_id.clone(), tenant_id.clone())?));
    let triage = TriageAgent::new(domain_pack, None, Some(open_trail(run_id.clone(), tenant_id.clone())?));
    let policy = PolicyAgent::new((*resolved_policy).clone(), Some(open_trail(run_id.clone(), tenant_id.clone())?));

    let tool_executor: Box<dyn ToolExecutor> = match &args.tool_endpoint {
        Some(endpoint) => Box::new(HttpToolExecutor::new(endpoint.clone())?),
        None => Box::new(NoopToolExecutor),
    };
    let resolution = ResolutionAgent::new(
        resolved_policy.candidate_playbooks.clone(),
        tool_executor,
        args.max_retries,
        Some(open_trail(run_id.clone(), tenant_id.clone())?),
    );

    let metrics: Arc<dyn xgate_metrics::MetricsCollector> = Arc::new(InMemoryMetricsCollector::new());
    let event_log: Arc<dyn xgate_store::EventLog>;
    let exception_store: Arc<dyn xgate_store::ExceptionStore>;
    let store_config = SqliteStoreConfig::at_path(args.store.clone());
    let backend = if args.store.as_os_str() == ":memory:" {
        SqliteBackend::open_in_memory()?
    } else {
        SqliteBackend::open(&store_config)?
    };
    event_log = Arc::new(backend.clone());
    exception_store = Arc::new(backend);

    let feedback =
        FeedbackAgent::new(Some(Arc::clone(&metrics)), Some(event_log), Some(open_trail(run_id, tenant_id.clone())?));

    let orchestrator = Arc::new(
        Orchestrator::new(intake, triage, policy, Some(resolution), feedback)
            .with_exception_store(exception_store)
            .with_max_concurrency(args.max_concurrency),
    );

    let items = raw_payloads
        .into_iter()
        .map(|raw_payload| BatchItem { raw_payload, tenant_id_hint: Some(tenant_id.clone()), pipeline_id_hint: None })
        .collect();

    let results = orchestrator.run_batch(items).await;

    let mut failures = 0usize;
    for result in results {
        match result {
            Ok((record, pipeline_result)) => {
                println!(
                    "{} {} status={:?}",
                    record.exception_id.as_str(),
                    record.tenant_id.as_str(),
                    pipeline_result.status
                );
            }
            Err(err) => {
                failures += 1;
                eprintln!("batch item failed: {err}");
            }
        }
    }

    if failures > 0 {
        return Err(format!("{failures} batch item(s) failed").into());
    }
    Ok(())
}

fn explain(args: ExplainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store_config = SqliteStoreConfig::at_path(args.store.clone());
    let backend = if args.store.as_os_str() == ":memory:" {
        SqliteBackend::open_in_memory()?
    } else {
        SqliteBackend::open(&store_config)?
    };
    let evidence = JsonlEvidenceTracker::new(&args.evidence_dir)?;
    let metrics = InMemoryMetricsCollector::new();

    let service = ExplanationService::new(backend, evidence, metrics, args.audit_dir);

    let tenant_id = TenantId::new(args.tenant_id);
    let exception_id = ExceptionId::new(args.exception_id);
    let explanation =
        service.generate(&tenant_id, &exception_id, args.format.into(), None::<&AuditTrail<NoopAuditSink>>)?;

    println!("{}", serde_json::to_string_pretty(&explanation)?);
    Ok(())
}
