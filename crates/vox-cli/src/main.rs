//! `vox-cli` – interactive shell over the vox memory service.
//!
//! This binary:
//!
//! 1. Checks for `~/.vox/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Probes the configured Ollama and Qdrant servers.
//! 3. Opens the record store, wires the index and embedder, and prepares the
//!    index collection.
//! 4. Drops the user into an **interactive REPL** for logging messages,
//!    promoting memories and recalling them across sessions.
//! 5. Intercepts **Ctrl-C** and closes the record store before exiting.

mod config;
mod probe;
mod repl;
mod telemetry;

use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use config::{Config, EmbedderKind, IndexBackend};
use vox_memory::{
    Embedder, HashEmbedder, InMemoryIndex, MemoryService, OllamaEmbedder, QdrantIndex,
    RecordStore, SemanticIndex,
};

fn main() {
    let _telemetry = telemetry::init_tracing("vox");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing the current command …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(
            error = %e,
            "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available"
        );
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start the async runtime");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run(cfg, shutdown)) {
        println!("{}: {}", "Fatal".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cfg: Config, shutdown: Arc<AtomicBool>) -> Result<(), String> {
    probe_backends(&cfg).await;

    let service = build_service(&cfg)?;
    println!(
        "  Index: {}  Embedder: {} ({} dimensions)",
        cfg.index_backend.to_string().bold(),
        cfg.embedder.to_string().bold(),
        cfg.vector_size
    );
    service
        .init()
        .await
        .map_err(|e| format!("Failed to prepare the memory index: {}", e))?;
    if cfg.index_backend == IndexBackend::Memory {
        let n = service
            .reindex(&cfg.user_id)
            .await
            .map_err(|e| format!("Failed to rebuild the memory index: {}", e))?;
        println!("  {} stored memories indexed for {}", n, cfg.user_id.bold());
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&service, &cfg, shutdown).await;

    service.shutdown().map_err(|e| format!("Failed to close the record store: {}", e))
}

/// Open the record store and wire the configured index and embedder.
fn build_service(cfg: &Config) -> Result<MemoryService, String> {
    if let Some(parent) = Path::new(&cfg.database_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    let records = RecordStore::open(&cfg.database_path)
        .map_err(|e| format!("Failed to open database at {}: {}", cfg.database_path, e))?;

    let embedder: Arc<dyn Embedder> = match cfg.embedder {
        EmbedderKind::Hash => Arc::new(HashEmbedder::new(cfg.vector_size)),
        EmbedderKind::Ollama => {
            let ollama = OllamaEmbedder::new(
                cfg.ollama_url.as_str(),
                cfg.embedding_model.as_str(),
                cfg.vector_size,
                cfg.request_timeout(),
            )
            .map_err(|e| format!("Failed to create Ollama embedder: {}", e))?;
            info!(model = ollama.model(), url = %cfg.ollama_url, "Using Ollama embeddings");
            Arc::new(ollama)
        }
    };

    let index: Arc<dyn SemanticIndex> = match cfg.index_backend {
        IndexBackend::Memory => Arc::new(InMemoryIndex::new(cfg.qdrant_collection.as_str())),
        IndexBackend::Qdrant => Arc::new(
            QdrantIndex::new(
                cfg.qdrant_url.as_str(),
                cfg.qdrant_collection.as_str(),
                Some(cfg.qdrant_api_key.clone()),
                cfg.request_timeout(),
            )
            .map_err(|e| format!("Failed to create Qdrant client: {}", e))?,
        ),
    };

    Ok(MemoryService::new(Arc::new(records), index, embedder, cfg.memory_config()))
}

async fn probe_backends(cfg: &Config) {
    if cfg.embedder == EmbedderKind::Ollama {
        print!("\n  Probing Ollama at {} … ", cfg.ollama_url.dimmed());
        match probe::ollama_models(&cfg.ollama_url, cfg.request_timeout()).await {
            Ok(models) if probe::has_model(&models, &cfg.embedding_model) => {
                println!("{} (model {} available)", "online".green(), cfg.embedding_model.bold());
            }
            Ok(_) => {
                println!("{}", "online".green());
                println!(
                    "  {}  Run `{}` to download it.",
                    format!("Model {} not found.", cfg.embedding_model).yellow(),
                    format!("ollama pull {}", cfg.embedding_model).bold()
                );
            }
            Err(e) => {
                println!("{}", "offline".yellow());
                println!("  {}", e.dimmed());
                println!("  Run `{}` to start a local model server.", "ollama serve".bold());
            }
        }
    }
    if cfg.index_backend == IndexBackend::Qdrant {
        print!("  Probing Qdrant at {} … ", cfg.qdrant_url.dimmed());
        match probe::qdrant_ready(&cfg.qdrant_url, cfg.request_timeout()).await {
            Ok(()) => println!("{}", "ready".green()),
            Err(e) => {
                println!("{}", "offline".yellow());
                println!("  {}", e.dimmed());
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║         vox First-Run Wizard         ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up vox.\n");

    let mut cfg = Config::default();
    config::apply_env_overrides(&mut cfg);

    cfg.user_id = prompt_line(&format!("  User id [{}]: ", cfg.user_id), &cfg.user_id);

    println!("  Where should memories be indexed?");
    println!("    1) In this process  (default, rebuilt from the database on start)");
    println!("    2) Qdrant server");
    if prompt_line("  Enter choice [1]: ", "1") == "2" {
        cfg.index_backend = IndexBackend::Qdrant;
        cfg.qdrant_url = prompt_line(
            &format!("  Qdrant URL [{}]: ", cfg.qdrant_url),
            &cfg.qdrant_url,
        );
    }

    println!("  How should text be embedded?");
    println!("    1) Feature hashing  (default, offline, no model needed)");
    println!("    2) Ollama embedding model");
    if prompt_line("  Enter choice [1]: ", "1") == "2" {
        cfg.embedder = EmbedderKind::Ollama;
        cfg.embedding_model = prompt_line(
            &format!("  Embedding model [{}]: ", cfg.embedding_model),
            &cfg.embedding_model,
        );
        let size = prompt_line(
            &format!("  Vector size [{}]: ", cfg.vector_size),
            &cfg.vector_size.to_string(),
        );
        if let Ok(n) = size.parse::<usize>()
            && n > 0
        {
            cfg.vector_size = n;
        }
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#" _  _____  __"#.bold().cyan());
    println!("{}", r#"| |/ / _ \ \/ /"#.bold().cyan());
    println!("{}", r#"| V / (_) >  < "#.bold().cyan());
    println!("{}", r#" \_/ \___/_/\_\"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "vox".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Long-term memory for conversational agents");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
