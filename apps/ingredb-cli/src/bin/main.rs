use anyhow::{bail, Context};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ingredb_agents::{Collaborators, Orchestrator};
use ingredb_core::config::{resolve_with_base, Config, Settings};
use ingredb_core::types::{Question, Response};
use ingredb_embed::get_default_embedder;
use ingredb_llm::OllamaClient;
use ingredb_sql::SqliteStore;
use ingredb_vector::LanceVectorIndex;

const USAGE: &str = "Usage: ingredb [ask] [--limit N] [--no-stream] [--json] [question...]\n\
                     With no question, starts an interactive session (exit, quit or q to leave).";

#[derive(Debug, Clone, PartialEq, Eq)]
struct AskArgs {
    question: Option<String>,
    limit: Option<usize>,
    stream: bool,
    json: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<AskArgs> {
    let mut parsed = AskArgs { question: None, limit: None, stream: true, json: false };
    let mut words = Vec::new();
    let mut it = args.iter().peekable();
    if it.peek().is_some_and(|a| *a == "ask") { it.next(); }
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--limit" | "-n" => {
                let value = it.next().context("--limit needs a value")?;
                parsed.limit = Some(value.parse().with_context(|| format!("invalid --limit '{value}'"))?);
            }
            "--no-stream" => parsed.stream = false,
            "--json" => parsed.json = true,
            "-h" | "--help" => bail!("{USAGE}"),
            flag if flag.starts_with("--") => bail!("unknown option '{flag}'\n{USAGE}"),
            word => words.push(word.to_string()),
        }
    }
    if !words.is_empty() { parsed.question = Some(words.join(" ")); }
    // JSON output is printed whole, so there is nothing to stream into
    if parsed.json { parsed.stream = false; }
    Ok(parsed)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).init();
}

fn build_orchestrator(settings: &Settings) -> anyhow::Result<Orchestrator> {
    let base = env::current_dir()?;
    let sqlite_path = resolve_with_base(&base, &settings.data.sqlite_path);
    let lancedb_dir = resolve_with_base(&base, &settings.data.lancedb_dir);

    let store = SqliteStore::open_read_only(&sqlite_path)?;
    let index = LanceVectorIndex::open(&lancedb_dir, &settings.data.lancedb_table)?;
    let embedder = get_default_embedder(&settings.embedding)?;
    let generator = OllamaClient::new(&settings.llm)?;
    info!(
        sqlite = %sqlite_path.display(),
        lancedb = %lancedb_dir.display(),
        model = generator.model(),
        "connections ready"
    );
    Ok(Orchestrator::new(
        Collaborators {
            generator: Arc::new(generator),
            store: Arc::new(store),
            index: Arc::new(index),
            embedder: Arc::from(embedder),
        },
        settings,
    ))
}

fn print_response(response: &Response, streamed: bool, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }
    if streamed { println!(); } else { println!("{}", response.answer); }
    if !response.citations.is_empty() {
        println!("\nSources:");
        for c in &response.citations {
            let label = c
                .record
                .get("Product")
                .or_else(|| c.record.get("ProductName"))
                .map(ToString::to_string)
                .unwrap_or_default();
            println!("  [{}] {} {}", c.citation_number, c.id, label);
        }
    }
    Ok(())
}

fn answer(orchestrator: &Orchestrator, text: &str, args: &AskArgs) -> anyhow::Result<()> {
    let mut question = Question::new(text).streaming(args.stream);
    if let Some(limit) = args.limit { question = question.with_limit(limit); }
    let mut stdout = io::stdout();
    let mut streamed = false;
    let response = orchestrator.ask_streaming(&question, &mut |fragment: &str| {
        streamed = true;
        let _ = write!(stdout, "{fragment}");
        let _ = stdout.flush();
    });
    print_response(&response, streamed, args.json)
}

fn interactive(orchestrator: &Orchestrator, args: &AskArgs) -> anyhow::Result<()> {
    println!("Ask about cosmetic products and ingredients. Type 'exit' to quit.");
    let stdin = io::stdin();
    loop {
        print!("\n> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 { break; }
        let text = line.trim();
        if text.is_empty() { continue; }
        if matches!(text.to_lowercase().as_str(), "exit" | "quit" | "q") { break; }
        answer(orchestrator, text, args)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    init_tracing();
    let settings = Config::load()
        .and_then(|c| c.settings())
        .map_err(|e| { eprintln!("Error loading config: {e}"); e })?;
    let orchestrator = build_orchestrator(&settings).context("failed to open data stores")?;
    match args.question.clone() {
        Some(q) => answer(&orchestrator, &q, &args),
        None => interactive(&orchestrator, &args),
    }
}
