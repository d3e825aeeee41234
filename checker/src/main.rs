use chumsky::span::Span as _;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use tack::diag::{line_col, ErrorSink};
use tack::driver;
use tack::ir::{System, TypeMap};

#[derive(Debug, Clone, clap::ValueEnum)]
enum Format {
    Xta,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "tack",
    version,
    about = "Timed automata checker — parses, builds and type-checks timed automata models"
)]
struct Cli {
    /// Input model file (.xta classic syntax or .json markup)
    model: PathBuf,

    /// Query file, one query per line
    #[arg(short, long)]
    queries: Option<PathBuf>,

    /// Input format (inferred from the file extension by default)
    #[arg(long, value_enum)]
    format: Option<Format>,

    /// Accept the newer dialect
    #[arg(long)]
    newxta: bool,

    /// Print phase timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.model) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("tack: error: {}: {}", cli.model.display(), e);
            std::process::exit(2);
        }
    };

    let format = cli.format.clone().unwrap_or_else(|| {
        match cli.model.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Xta,
        }
    });

    let mut system = System::new();
    let mut types = TypeMap::new();
    let mut sink = ErrorSink::new();

    let t = Instant::now();
    match format {
        Format::Xta => {
            driver::parse_xta_str(&source, &mut system, &mut types, &mut sink, cli.newxta)
        }
        Format::Json => {
            driver::parse_model_str(&source, &mut system, &mut types, &mut sink, cli.newxta)
        }
    };
    if cli.verbose {
        eprintln!(
            "tack: model checked, {:.1}ms",
            t.elapsed().as_secs_f64() * 1000.0
        );
    }
    let model_diags = sink.diagnostics().len();

    let query_source = cli.queries.as_ref().map(|path| {
        match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("tack: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
    });
    if let Some(query_source) = &query_source {
        let t = Instant::now();
        driver::check_queries_str(query_source, &mut system, &mut types, &mut sink);
        if cli.verbose {
            eprintln!(
                "tack: queries checked, {:.1}ms",
                t.elapsed().as_secs_f64() * 1000.0
            );
        }
    }

    for (index, diag) in sink.diagnostics().iter().enumerate() {
        // Model diagnostics are located in the model source, later ones in
        // the query file.
        let (path, text) = if index < model_diags {
            (&cli.model, &source)
        } else {
            (
                cli.queries.as_ref().expect("query diagnostics imply a query file"),
                query_source.as_ref().expect("query diagnostics imply a query file"),
            )
        };
        let (line, col) = line_col(text, diag.span.start());
        eprintln!("{}:{}:{}: {}", path.display(), line, col, diag);
    }

    if sink.has_errors() {
        std::process::exit(1);
    }
}
