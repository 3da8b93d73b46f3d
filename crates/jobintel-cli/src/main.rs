use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use jobintel_adapters::SourceRegistry;
use jobintel_analytics::{get_top_skills, get_top_skills_by_source, AnalyticsFilter};
use jobintel_core::Environment;
use jobintel_storage::{redact_database_url, Database, HttpFetcher};
use jobintel_sync::{
    AuditVerdict, EnvironmentAudit, IngestPipeline, SyncConfig, SAMPLE_ENVIRONMENT,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobintel")]
#[command(about = "JobIntel ingestion and analytics command-line interface")]
struct Cli {
    /// Overrides JOBINTEL_ENV for this invocation.
    #[arg(long, global = true)]
    env: Option<Environment>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch from one source and run the full pipeline, recording an ingest run.
    Ingest {
        source: String,
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Transform pending raw records and extract skills.
    Postprocess,
    /// Load a JSONL file of payloads tagged `test` into the raw store, then postprocess.
    /// Refused in production.
    LoadSample {
        #[arg(default_value = "data/sample_jobs.jsonl")]
        path: PathBuf,
    },
    TopSkills {
        #[arg(long, default_value_t = 10)]
        limit: i64,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        date_from: Option<NaiveDate>,
        #[arg(long)]
        date_to: Option<NaiveDate>,
        #[arg(long)]
        search: Option<String>,
        /// Rank separately for each source.
        #[arg(long)]
        by_source: bool,
    },
    /// List the registered source names.
    Sources,
    Migrate,
    /// Count rows per environment; fails in production if other environments leaked in.
    CheckEnv,
    Serve,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn pipeline(config: &SyncConfig) -> Result<IngestPipeline> {
    let db = Database::connect_and_migrate(&config.database_url).await?;
    let http = HttpFetcher::new(config.http_client_config())?;
    let registry = SourceRegistry::with_builtin_sources(http);
    Ok(IngestPipeline::new(db, Arc::new(registry)))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env()?;
    if let Some(env) = cli.env {
        config.environment = env;
    }
    tracing::debug!(
        database = %redact_database_url(&config.database_url),
        environment = %config.environment,
        "loaded configuration"
    );

    match cli.command {
        Commands::Ingest {
            source,
            search,
            limit,
        } => {
            let pipeline = pipeline(&config).await?;
            let result = pipeline
                .run_ingest(&source, &search, limit, config.environment)
                .await?;
            println!(
                "ingest complete: source={} fetched={} raw={} jobs={} skills={}",
                source,
                result.fetched,
                result.inserted_raw,
                result.inserted_jobs,
                result.inserted_skills
            );
            for warning in &result.warnings {
                println!("warning: {warning}");
            }
        }
        Commands::Postprocess => {
            let pipeline = pipeline(&config).await?;
            let (jobs, skills) = pipeline.run_postprocess().await?;
            println!("postprocess complete: jobs={jobs} skills={skills}");
        }
        Commands::LoadSample { path } => {
            if config.environment.is_production() {
                tracing::error!("refusing to load sample data with JOBINTEL_ENV=production");
                return Ok(ExitCode::FAILURE);
            }
            let pipeline = pipeline(&config).await?;
            let etl = pipeline.load_sample(&path, config.environment).await?;
            println!(
                "sample loaded: path={} environment={} raw={} jobs={} skills={}",
                path.display(),
                SAMPLE_ENVIRONMENT,
                etl.inserted_raw,
                etl.inserted_jobs,
                etl.inserted_skills
            );
        }
        Commands::TopSkills {
            limit,
            source,
            date_from,
            date_to,
            search,
            by_source,
        } => {
            let db = Database::connect_and_migrate(&config.database_url).await?;
            let filter = AnalyticsFilter {
                source,
                date_from,
                date_to,
                search,
                environment: cli.env.unwrap_or(Environment::Production),
            };
            if by_source {
                let ranked = get_top_skills_by_source(&db, &filter, limit).await?;
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else {
                for (rank, entry) in get_top_skills(&db, &filter, limit).await?.iter().enumerate() {
                    println!("{:>3}. {:<16} {}", rank + 1, entry.skill, entry.count);
                }
            }
        }
        Commands::Sources => {
            let http = HttpFetcher::new(config.http_client_config())?;
            for name in SourceRegistry::with_builtin_sources(http).list() {
                println!("{name}");
            }
        }
        Commands::Migrate => {
            let db = Database::connect(&config.database_url).await?;
            db.migrate().await?;
            println!(
                "migrations applied: {} ({})",
                redact_database_url(&config.database_url),
                db.dialect().as_str()
            );
        }
        Commands::CheckEnv => {
            let db = Database::connect_and_migrate(&config.database_url).await?;
            let audit = EnvironmentAudit::collect(&db, config.environment).await?;
            println!("{}", serde_json::to_string_pretty(&audit)?);
            match audit.verdict() {
                AuditVerdict::Clean => println!("ok: no non-production rows"),
                AuditVerdict::Warning => println!(
                    "warning: {} non-production rows (allowed in {})",
                    audit.non_production_rows(),
                    config.environment
                ),
                AuditVerdict::Failure => {
                    eprintln!(
                        "error: {} non-production rows in a production database",
                        audit.non_production_rows()
                    );
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Serve => {
            jobintel_web::serve_from_config(&config).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
