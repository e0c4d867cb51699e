use clap::Parser;
use clap::ValueEnum;
use neighbor_embed::request::handle_embed;
use neighbor_embed::request::handle_similarity;
use neighbor_embed::request::EmbedRequest;
use neighbor_embed::request::SimilarityRequest;
use serde::Serialize;
use std::fs;
use std::io;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;
use tracing::warn;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RequestKind {
  /// Gradient-descent embedding of a node's dataset
  Embed,
  /// Stand-alone similarity matrix of a node's dataset
  Similarity,
}

#[derive(Parser, Debug)]
#[command(name = "neighbor-embed")]
#[command(about = "Neighbour-embedding engine: reads a JSON request, writes a JSON response")]
#[command(version)]
struct Args {
  /// Request file (reads stdin when omitted)
  #[arg(short, long)]
  input: Option<PathBuf>,

  /// Request document type
  #[arg(short, long, value_enum, default_value = "embed")]
  kind: RequestKind,

  /// Pretty-print the response
  #[arg(long)]
  pretty: bool,

  /// Log level (debug, info, warn, error)
  #[arg(long, default_value = "info")]
  log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let args = Args::parse();

  let log_level = match args.log_level.as_str() {
    "debug" => Level::DEBUG,
    "warn" => Level::WARN,
    "error" => Level::ERROR,
    _ => Level::INFO,
  };

  // stdout carries the response document.
  FmtSubscriber::builder()
    .with_max_level(log_level)
    .with_writer(io::stderr)
    .with_target(false)
    .init();

  let raw = match &args.input {
    Some(path) => fs::read_to_string(path)
      .map_err(|e| format!("cannot read request file '{}': {}", path.display(), e))?,
    None => {
      let mut buf = String::new();
      io::stdin().read_to_string(&mut buf)?;
      buf
    }
  };

  match args.kind {
    RequestKind::Embed => {
      let request: EmbedRequest = serde_json::from_str(&raw)?;
      info!(algorithm = %request.algorithm, "handling embed request");
      let response = handle_embed(&request);
      if !response.success {
        warn!(message = %response.message, "embed request failed");
      }
      emit(&response, args.pretty)
    }
    RequestKind::Similarity => {
      let request: SimilarityRequest = serde_json::from_str(&raw)?;
      info!(formula = %request.formula, "handling similarity request");
      let response = handle_similarity(&request);
      if !response.success {
        warn!(message = %response.message, "similarity request failed");
      }
      emit(&response, args.pretty)
    }
  }
}

fn emit<T: Serialize>(response: &T, pretty: bool) -> Result<(), Box<dyn std::error::Error>> {
  let out = if pretty {
    serde_json::to_string_pretty(response)?
  } else {
    serde_json::to_string(response)?
  };
  println!("{out}");
  Ok(())
}
