//! Validata CLI: clean, ask, extract and eval from the command line

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table as TextTable};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use validata::agent::schema::employees_table;
use validata::query::QueryOutput;
use validata::table::csv::{read_csv_path, write_csv, write_csv_path};
use validata::{
    build_client, clean_table, AppConfig, BenchmarkRunner, BenchmarkSuite, LlmClient, QueryPipeline,
    SelfCorrectingAgent, Table,
};

#[derive(Parser)]
#[command(name = "validata-cli", version, about = "Validata HR data cleaning, querying and extraction")]
struct Cli {
    /// Config file (YAML or JSON)
    #[arg(long, global = true, env = "VALIDATA_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean a CSV file
    Clean {
        input: PathBuf,

        /// Write the cleaned table here
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Write the audit log and report as JSON
        #[arg(long)]
        audit_out: Option<PathBuf>,
    },
    /// Ask a question about a CSV file
    Ask {
        input: PathBuf,
        question: String,

        /// Query the file as-is, without cleaning it first
        #[arg(long)]
        no_clean: bool,

        /// Skip the explanation step
        #[arg(long)]
        no_explain: bool,
    },
    /// Extract employee records from free text
    Extract {
        /// Text to extract from; read from --file or stdin when omitted
        text: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,

        /// Override the configured correction limit
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Write the full result as JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run a benchmark suite
    Eval {
        suite: PathBuf,

        /// Dataset for query cases; overrides the suite's own
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Clean { input, output, audit_out } => {
                run_clean(&input, output.as_deref(), audit_out.as_deref(), &cli.format)
            }
            Commands::Ask { input, question, no_clean, no_explain } => {
                run_ask(&config, &input, &question, no_clean, no_explain, &cli.format).await
            }
            Commands::Extract { text, file, max_attempts, out } => {
                run_extract(&config, text, file.as_deref(), max_attempts, out.as_deref(), &cli.format).await
            }
            Commands::Eval { suite, dataset } => {
                match run_eval(&config, &suite, dataset.as_deref(), &cli.format).await {
                    Ok(true) => Ok(()),
                    Ok(false) => std::process::exit(1),
                    Err(e) => Err(e),
                }
            }
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).context("loading configuration")
}

fn require_client(config: &AppConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    match build_client(&config.llm)? {
        Some(client) => Ok(client),
        None => bail!(
            "no LLM client configured; set an API key for {:?} (e.g. OPENAI_API_KEY)",
            config.llm.provider
        ),
    }
}

fn print_table(table: &Table, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(table)?),
        OutputFormat::Csv => write_csv(table, std::io::stdout())?,
        OutputFormat::Table => {
            if table.columns().is_empty() {
                println!("(no results)");
                return Ok(());
            }
            let mut text = TextTable::new();
            text.set_content_arrangement(ContentArrangement::Dynamic);
            text.set_header(table.columns());
            for row in table.rows() {
                text.add_row(row.iter().map(|v| v.to_string()).collect::<Vec<_>>());
            }
            println!("{}", text);
            println!("{} row(s)", table.len());
        }
    }
    Ok(())
}

fn run_clean(
    input: &Path,
    output: Option<&Path>,
    audit_out: Option<&Path>,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let raw = read_csv_path(input).with_context(|| format!("reading {}", input.display()))?;
    let outcome = clean_table(&raw);

    if let Some(path) = output {
        write_csv_path(&outcome.table, path).with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(path) = audit_out {
        let body = serde_json::json!({ "report": outcome.report, "audit": outcome.audit });
        std::fs::write(path, serde_json::to_string_pretty(&body)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        _ if output.is_some() => {}
        _ => print_table(&outcome.table, format)?,
    }

    eprintln!("{} row(s), {} correction(s)", outcome.report.rows, outcome.audit.len());
    for (rule, count) in outcome.report.fixes.iter().filter(|(_, c)| **c > 0) {
        eprintln!("  {:<26} {}", rule, count);
    }
    for warning in &outcome.report.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

async fn run_ask(
    config: &AppConfig,
    input: &Path,
    question: &str,
    no_clean: bool,
    no_explain: bool,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let raw = read_csv_path(input).with_context(|| format!("reading {}", input.display()))?;
    let table = if no_clean { raw } else { clean_table(&raw).table };

    let pipeline = QueryPipeline::new(require_client(config)?, &config.query);

    if no_explain {
        let plan = pipeline.plan(question, &table).await?;
        let output = pipeline.execute(&plan, &table)?;
        return match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "plan": plan, "output": output }))?);
                Ok(())
            }
            _ => print_output(&output, format),
        };
    }

    let answer = pipeline.answer(question, &table).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&answer)?),
        _ => {
            println!("Plan: {}", serde_json::to_string(&answer.plan)?);
            print_output(&answer.output, format)?;
            match (&answer.explanation, &answer.explanation_error) {
                (Some(text), _) => println!("\n{}", text),
                (None, Some(err)) => eprintln!("explanation unavailable: {}", err),
                (None, None) => {}
            }
        }
    }
    Ok(())
}

fn print_output(output: &QueryOutput, format: &OutputFormat) -> anyhow::Result<()> {
    match output {
        QueryOutput::Rows { table, matched } => {
            print_table(table, format)?;
            if *matched > table.len() {
                println!("({} matching row(s), showing {})", matched, table.len());
            }
        }
        QueryOutput::Scalar { aggregation, target, value, rows_matched } => {
            let shown = if value.is_null() { "null".to_string() } else { value.to_string() };
            println!("{}({}) = {}  over {} row(s)", aggregation, target, shown, rows_matched);
        }
        QueryOutput::Groups { group_by, aggregation, target, groups } => {
            let header = format!("{}({})", aggregation, target);
            let mut table = Table::new([group_by.as_str(), header.as_str(), "rows"]);
            for group in groups {
                table.push_row(vec![
                    group.key.clone(),
                    group.value.clone(),
                    (group.rows as i64).into(),
                ])?;
            }
            print_table(&table, format)?;
        }
    }
    Ok(())
}

async fn run_extract(
    config: &AppConfig,
    text: Option<String>,
    file: Option<&Path>,
    max_attempts: Option<u32>,
    out: Option<&Path>,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
        }
        (None, None) => std::io::read_to_string(std::io::stdin()).context("reading stdin")?,
    };

    let agent = SelfCorrectingAgent::new(require_client(config)?, &config.agent)
        .with_max_attempts(max_attempts.unwrap_or(config.agent.max_attempts));
    let result = agent.run(&text).await?;

    if let Some(path) = out {
        std::fs::write(path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            print_table(&employees_table(&result.accepted), format)?;
            for rejected in &result.rejected {
                eprintln!(
                    "rejected after {} attempt(s): {} ({})",
                    rejected.attempts,
                    rejected.raw_record,
                    rejected.reasons.join("; ")
                );
            }
            if let Some(err) = &result.extraction_error {
                eprintln!("extraction error: {}", err);
            }
            eprintln!("{} correction cycle(s) used", result.total_attempts);
        }
    }
    Ok(())
}

async fn run_eval(
    config: &AppConfig,
    suite_path: &Path,
    dataset: Option<&Path>,
    format: &OutputFormat,
) -> anyhow::Result<bool> {
    let suite = BenchmarkSuite::load(suite_path)
        .with_context(|| format!("loading suite {}", suite_path.display()))?;

    let mut runner = BenchmarkRunner::new(config.clone());
    let dataset = dataset
        .map(Path::to_path_buf)
        .or_else(|| suite.dataset_path(suite_path));
    if let Some(path) = dataset {
        let raw = read_csv_path(&path).with_context(|| format!("reading {}", path.display()))?;
        let table = if suite.clean_dataset { clean_table(&raw).table } else { raw };
        runner = runner.with_table(table);
    }
    // Llm-mode cases fail individually when no client is available
    if let Some(client) = build_client(&config.llm)? {
        runner = runner.with_client(client);
    }

    let report = runner.run(&suite).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            let mut text = TextTable::new();
            text.set_content_arrangement(ContentArrangement::Dynamic);
            text.set_header(vec!["case", "kind", "mode", "result", "details"]);
            for result in &report.results {
                text.add_row(vec![
                    result.id.clone(),
                    result.kind.to_string(),
                    format!("{:?}", result.mode).to_lowercase(),
                    if result.passed { "PASS" } else { "FAIL" }.to_string(),
                    result.details.join("; "),
                ]);
            }
            println!("{}", text);
            println!(
                "{}/{} passed, {} failed",
                report.passed(),
                report.total(),
                report.failed()
            );
        }
    }

    Ok(report.all_passed())
}
