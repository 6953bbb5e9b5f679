use std::io::Read;
use std::path::{Path, PathBuf};

use clap::Parser;
use infragraph::{AnnotationDocument, Engine, ProviderProfile};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "infragraph",
    about = "Turn a Terraform dependency graph into a clean architecture-diagram graph"
)]
struct Cli {
    /// Input graph JSON (reads from stdin if not provided)
    file: Option<PathBuf>,

    /// Built-in provider profile (detected from resource prefixes if omitted)
    #[arg(long, short = 'p')]
    provider: Option<String>,

    /// Provider profile file, replacing the built-in one
    #[arg(long, conflicts_with = "provider")]
    profile: Option<PathBuf>,

    /// Annotation overlay document
    #[arg(long, short = 'a')]
    annotate: Option<PathBuf>,

    /// Write JSON on a single line
    #[arg(long)]
    compact: bool,

    /// Exit with status 2 when the validator reports findings
    #[arg(long)]
    strict: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn read_file(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("ERROR: failed to read {}: {e}", path.display());
        std::process::exit(1);
    })
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("ERROR: {e}");
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let input = match &cli.file {
        Some(path) => read_file(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).unwrap_or_else(|e| {
                eprintln!("ERROR: failed to read stdin: {e}");
                std::process::exit(1);
            });
            buf
        }
    };
    let state = infragraph::parse_input(&input).unwrap_or_else(|e| fail(e));

    let profile = match (&cli.profile, &cli.provider) {
        (Some(path), _) => ProviderProfile::from_yaml(&read_file(path)),
        (None, Some(name)) => ProviderProfile::builtin(name),
        (None, None) => {
            let detected = infragraph::detect_provider(&state.graph).unwrap_or_else(|| {
                warn!("no known provider prefix in graph, using aws");
                "aws"
            });
            ProviderProfile::builtin(detected)
        }
    };
    let engine = profile
        .and_then(Engine::from_profile)
        .unwrap_or_else(|e| fail(e));

    let annotations = cli.annotate.as_ref().map(|path| {
        AnnotationDocument::from_yaml(&read_file(path)).unwrap_or_else(|e| fail(e))
    });

    let output = engine.run(state, annotations.as_ref());
    let text = infragraph::to_json(&output, cli.compact).unwrap_or_else(|e| fail(e));
    println!("{text}");

    if cli.strict && !output.findings.is_empty() {
        for finding in &output.findings {
            eprintln!("{:?}: {}", finding.kind, finding.message);
        }
        std::process::exit(2);
    }
}
