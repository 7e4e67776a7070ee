//! Command-line driver for lead resolution and scoring.
//!
//! Usage:
//!     leadmatch normalize https://www.example.com/about
//!     leadmatch key records.json
//!     leadmatch resolve records.json --out leads.json
//!     leadmatch score leads.json profile.json --min 0.3 --explain
//!     leadmatch quota-demo --tier free --calls 3

mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use leadmatch_explain::{describe_merge, explain_breakdown, summarize_relevance};
use leadmatch_features::{generate_key, normalize, site_key, try_normalize};
use leadmatch_model::{Lead, RawBusinessRecord, UserProfile};
use leadmatch_quota::{MemoryQuotaStore, PlanTier, QuotaDecision, QuotaGate};
use leadmatch_relevance::rank;
use leadmatch_resolve::{MemoryAuditLog, MemoryLeadStore, ResolutionOutcome, Resolver};
use serde::de::DeserializeOwned;

use crate::config::EngineConfig;

#[derive(Parser)]
#[command(name = "leadmatch")]
#[command(about = "Resolve scraped business records into leads and rank them for a user")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file (key defaults, scoring weights, quota ceilings)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the canonical domain of one or more URLs
    Normalize {
        urls: Vec<String>,
    },

    /// Print the identity key of every record in a JSON array
    Key {
        records: PathBuf,
    },

    /// Deduplicate a JSON array of records into leads
    Resolve {
        records: PathBuf,

        /// Write resulting leads as JSON
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rank leads for a user profile
    Score {
        leads: PathBuf,

        profile: PathBuf,

        /// Drop leads below this relevance
        #[arg(long, default_value = "0.0")]
        min: f64,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Show per-dimension explanations
        #[arg(long)]
        explain: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Exercise the quota gate for one caller
    QuotaDemo {
        /// Plan tier (free, basic, pro, enterprise)
        #[arg(short, long, default_value = "free")]
        tier: String,

        #[arg(short, long, default_value = "3")]
        calls: usize,

        #[arg(long, default_value = "scan")]
        tool: String,

        #[arg(long, default_value = "cli")]
        caller: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("leadmatch=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Normalize { urls } => run_normalize(&urls),
        Commands::Key { records } => run_key(&records, &config),
        Commands::Resolve {
            records,
            out,
            format,
        } => run_resolve(&records, out.as_deref(), &format, &config).await,
        Commands::Score {
            leads,
            profile,
            min,
            limit,
            explain,
            format,
        } => run_score(&leads, &profile, min, limit, explain, &format, &config),
        Commands::QuotaDemo {
            tier,
            calls,
            tool,
            caller,
        } => run_quota(&caller, &tool, PlanTier::from(tier.as_str()), calls, &config).await,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn run_normalize(urls: &[String]) -> Result<()> {
    for url in urls {
        let canonical = normalize(url);
        let strict = if try_normalize(url).is_ok() {
            "parsed"
        } else {
            "fallback"
        };
        let tenant = site_key(url).ok().and_then(|k| k.tenant);

        match tenant {
            Some(tenant) => println!("{} -> {} ({}, tenant {})", url, canonical, strict, tenant),
            None => println!("{} -> {} ({})", url, canonical, strict),
        }
    }
    Ok(())
}

fn run_key(path: &Path, config: &EngineConfig) -> Result<()> {
    let records: Vec<RawBusinessRecord> = read_json(path)?;
    for record in &records {
        println!(
            "{}\t{}",
            generate_key(record, &config.keys),
            record.name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn run_resolve(
    path: &Path,
    out: Option<&Path>,
    format: &str,
    config: &EngineConfig,
) -> Result<()> {
    let records: Vec<RawBusinessRecord> = read_json(path)?;
    let resolver = Resolver::new(
        MemoryLeadStore::new(),
        MemoryAuditLog::new(),
        config.keys.clone(),
    );

    if format != "json" {
        println!("Resolving {} records", records.len());
        println!("---");
    }

    for (i, record) in records.iter().enumerate() {
        let resolution = resolver.resolve(record).await?;
        let label = match resolution.outcome {
            ResolutionOutcome::Created => "CREATED",
            ResolutionOutcome::Merged => "MERGED ",
        };
        if format != "json" {
            println!(
                "{:>3}. {} {} ({})",
                i + 1,
                label,
                resolution.lead.display_name(),
                resolution.identity_key
            );
        }
    }

    let leads = resolver.store().leads().await;
    let audit = resolver.audit().entries().await;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&leads)?);
    } else {
        println!("\n---");
        println!("{} leads, {} merges", leads.len(), audit.len());
        for entry in &audit {
            println!("   {}", describe_merge(entry));
        }
    }

    if let Some(out) = out {
        std::fs::write(out, serde_json::to_string_pretty(&leads)?)
            .with_context(|| format!("writing {}", out.display()))?;
        tracing::info!(path = %out.display(), count = leads.len(), "Wrote leads");
    }

    Ok(())
}

fn run_score(
    leads_path: &Path,
    profile_path: &Path,
    min: f64,
    limit: usize,
    explain: bool,
    format: &str,
    config: &EngineConfig,
) -> Result<()> {
    let leads: Vec<Lead> = read_json(leads_path)?;
    let profile: UserProfile = read_json(profile_path)?;

    let mut ranked = rank(&leads, &profile, Utc::now(), &config.scoring, min);
    ranked.truncate(limit);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }

    println!("Ranking {} leads for {}", leads.len(), profile.user_id);
    println!("---");

    for (i, scored) in ranked.iter().enumerate() {
        let b = &scored.breakdown;
        println!("\n{}. {}", i + 1, scored.lead.display_name());
        println!("   {}", summarize_relevance(b));
        println!(
            "   service {:.2} | budget {:.2} | location {:.2} | industry {:.2} | \
             urgency {:.2} | behavioral {:.2}",
            b.service,
            b.budget,
            b.location,
            b.industry,
            b.urgency,
            b.behavioral
        );

        if explain {
            for explanation in explain_breakdown(b, &scored.lead, &profile) {
                println!(
                    "   - {}: {}. {}",
                    explanation.dimension.label(),
                    explanation.summary,
                    explanation.detail
                );
            }
        }
    }

    println!("\n---");
    println!("Total: {} results", ranked.len());

    Ok(())
}

async fn run_quota(
    caller: &str,
    tool: &str,
    tier: PlanTier,
    calls: usize,
    config: &EngineConfig,
) -> Result<()> {
    let gate = QuotaGate::new(MemoryQuotaStore::new(), config.quota.clone());

    for i in 1..=calls {
        match gate.check_and_consume(caller, tool, tier).await? {
            QuotaDecision::Allowed { remaining: Some(n) } => {
                println!("{:>3}. allowed ({} left today)", i, n)
            }
            QuotaDecision::Allowed { remaining: None } => println!("{:>3}. allowed (unlimited)", i),
            QuotaDecision::Denied { retry_after } => {
                println!("{:>3}. denied, retry in {}s", i, retry_after.as_secs())
            }
        }
    }

    Ok(())
}
