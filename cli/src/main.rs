use anyhow::Result;
use clap::{Parser, Subcommand};
use engine::corpus::load_corpus_file;
use engine::normalize::Normalizer;
use engine::{Answer, AnswerEngine, CorpusIndex, SessionStore};
use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "qa")]
#[command(about = "Query and inspect a fact corpus", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and index the corpus, then print its statistics
    Validate {
        /// Corpus JSON file
        #[arg(long)]
        corpus: String,
    },
    /// Answer a single query and exit
    Ask {
        #[arg(long)]
        corpus: String,
        /// The question to answer
        #[arg(long)]
        query: String,
        /// Session store directory; omit to run without persistence
        #[arg(long)]
        store: Option<String>,
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Answer queries from stdin, one per line
    Repl {
        #[arg(long)]
        corpus: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { corpus } => validate(&corpus),
        Commands::Ask {
            corpus,
            query,
            store,
            session,
        } => {
            let store = match store {
                Some(dir) => SessionStore::open(dir),
                None => SessionStore::disabled(),
            };
            let mut engine = AnswerEngine::new(load_corpus_file(&corpus)?, session, store)?;
            print_answer(&engine.process_query(&query));
            Ok(())
        }
        Commands::Repl { corpus } => repl(&corpus),
    }
}

fn validate(corpus_path: &str) -> Result<()> {
    let facts = load_corpus_file(corpus_path)?;
    let loaded = facts.len();
    let mut normalizer = Normalizer::new();
    let index = CorpusIndex::build(facts, &mut normalizer)?;

    let topics: BTreeSet<&str> = index.documents.iter().map(|d| d.topic.as_str()).collect();
    println!("documents:       {}", index.documents.len());
    println!("rejected:        {}", loaded - index.documents.len());
    println!("distinct terms:  {}", index.document_frequency.len());
    println!("avg doc length:  {:.1}", index.average_doc_length);
    println!("topics:          {}", topics.into_iter().collect::<Vec<_>>().join(", "));
    println!("categories:      {}", index.category_index.len());
    println!("subtopics:       {}", index.subtopic_index.len());
    Ok(())
}

fn repl(corpus_path: &str) -> Result<()> {
    let mut engine = AnswerEngine::new(
        load_corpus_file(corpus_path)?,
        "repl",
        SessionStore::disabled(),
    )?;
    tracing::info!(docs = engine.index().documents.len(), "corpus ready");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        print_answer(&engine.process_query(&line));
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.main);
    for detail in &answer.details {
        println!("  - {detail}");
    }
    if !answer.citations.is_empty() {
        let refs: Vec<String> = answer
            .citations
            .iter()
            .map(|(idx, doc)| format!("[{idx}] doc {doc}"))
            .collect();
        println!("  sources: {}", refs.join(", "));
    }
    if !answer.suggestions.is_empty() {
        println!("  try next: {}", answer.suggestions.join(" | "));
    }
}
