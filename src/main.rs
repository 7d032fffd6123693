use quarry::api::{
    ClearResponse, IngestRequest, IngestResponse, RequestFilters, SearchRequest, SearchResponse,
    StatusResponse,
};
use quarry::cli::{Cli, Commands, ConfigAction};
use quarry::config::{expand_tilde, Config};
use quarry::document::Document;
use quarry::engine::SearchEngine;
use quarry::error::{QuarryError, Result};
use quarry::server::{IpcClient, IpcRequest, Server};
use quarry::storage::Scope;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve => cmd_serve(cli.config)?,
        Commands::Index { file } => cmd_index(cli.config, &file)?,
        Commands::Search {
            query,
            page,
            page_size,
            category,
            tags,
            json,
        } => {
            let request = SearchRequest {
                query,
                filters: Some(RequestFilters { category, tags }),
                page: Some(page),
                page_size,
            };
            cmd_search(cli.config, request, json)?;
        }
        Commands::Get { id } => cmd_get(cli.config, id)?,
        Commands::Delete { id } => cmd_delete(cli.config, id)?,
        Commands::Clear { scope } => cmd_clear(cli.config, &scope)?,
        Commands::Status => cmd_status(cli.config)?,
        Commands::Config { action } => cmd_config(cli.config, action)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "quarry=debug" } else { "quarry=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| QuarryError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    tracing::info!("Configuration loaded successfully");

    runtime()?.block_on(async move {
        let server_config = config.server.clone();
        let engine = Arc::new(SearchEngine::open(config).await?);
        Server::new(engine, server_config).run().await
    })
}

fn cmd_index(config_path: Option<PathBuf>, file: &Path) -> Result<()> {
    let content = if file == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| QuarryError::Io {
                source: e,
                context: "Failed to read ingest request from stdin".to_string(),
            })?;
        buffer
    } else {
        std::fs::read_to_string(file).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to read ingest request: {:?}", file),
        })?
    };

    let request: IngestRequest = serde_json::from_str(&content).map_err(|e| QuarryError::Json {
        source: e,
        context: format!("Invalid ingest request in {:?}", file),
    })?;

    let response: IngestResponse = call(config_path, IpcRequest::Index(request))?;
    println!(
        "✓ Indexed {} documents and {} images",
        response.indexed.documents, response.indexed.images
    );
    if !response.failed.is_empty() {
        println!("✗ {} failed:", response.failed.len());
        for failure in &response.failed {
            println!(
                "  {} [{:?}] {}",
                failure.id.as_deref().unwrap_or("<no id>"),
                failure.error,
                failure.reason
            );
        }
    }
    Ok(())
}

fn cmd_search(config_path: Option<PathBuf>, request: SearchRequest, json: bool) -> Result<()> {
    let response: SearchResponse = call(config_path, IpcRequest::Search(request))?;

    if json {
        println!("{}", to_pretty(&response)?);
        return Ok(());
    }

    if response.results.is_empty() {
        println!("No results ({}ms)", response.took_ms);
        return Ok(());
    }

    println!(
        "{} results, page {} ({}ms)",
        response.total, response.page, response.took_ms
    );
    for result in &response.results {
        let document = result.document();
        println!();
        println!(
            "{:>3}. {} [{}] score {:.3}",
            result.rank,
            document.title,
            document.content_type.as_str(),
            result.final_score
        );
        println!("     id: {}", document.id);
        if !document.url.is_empty() {
            println!("     {}", document.url);
        }
        for highlight in &result.highlights {
            println!("     > {}", highlight);
        }
    }
    if response.has_more {
        println!();
        println!("More results: --page {}", response.page + 1);
    }
    Ok(())
}

fn cmd_get(config_path: Option<PathBuf>, id: String) -> Result<()> {
    let document: Document = call(config_path, IpcRequest::Get { id })?;
    println!("{}", to_pretty(&document)?);
    Ok(())
}

fn cmd_delete(config_path: Option<PathBuf>, id: String) -> Result<()> {
    let _: serde_json::Value = call(config_path, IpcRequest::Delete { id: id.clone() })?;
    println!("✓ Deleted {}", id);
    Ok(())
}

fn cmd_clear(config_path: Option<PathBuf>, scope: &str) -> Result<()> {
    let scope = Scope::parse(scope)
        .ok_or_else(|| QuarryError::InvalidArguments(format!("unknown scope '{}'", scope)))?;
    let response: ClearResponse = call(config_path, IpcRequest::Clear { scope })?;
    println!("✓ Cleared {} ({} documents)", response.cleared, response.removed);
    Ok(())
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let status: StatusResponse = match call(config_path, IpcRequest::Status) {
        Ok(status) => status,
        Err(QuarryError::Io { .. }) => {
            println!("Server: ✗ Not running");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!("Server: ✓ Running");
    println!(
        "  Documents: {} ({} images, {} compressed)",
        status.documents, status.images, status.compressed
    );
    println!("  Embeddings: {} (dimension {})", status.embeddings, status.dimension);
    println!(
        "  Embedding model: {}",
        status.embedding_model.as_deref().unwrap_or("none (lexical only)")
    );
    println!(
        "  Index: {} documents, {} vectors, {} terms, {} pending",
        status.index.documents, status.index.vectors, status.index.terms, status.index.pending_mutations
    );
    if status.dirty > 0 {
        println!("  Dirty: {} awaiting re-index", status.dirty);
    }
    println!(
        "  Enrichment: {}",
        if status.enrichment { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path)?;
            let value = serde_json::to_value(&config).map_err(|e| QuarryError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    QuarryError::InvalidArguments(format!("unknown config section '{}'", section))
                })?,
                None => value,
            };
            println!("{}", to_pretty(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| QuarryError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'quarry config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

/// Send one request to the running server
fn call<T: serde::de::DeserializeOwned>(
    config_path: Option<PathBuf>,
    request: IpcRequest,
) -> Result<T> {
    let config = load_config(config_path)?;
    let client = IpcClient::new(expand_tilde(&config.server.socket_path));
    runtime()?.block_on(async move { client.call(&request).await })
}

fn to_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| QuarryError::Json {
        source: e,
        context: "Failed to format output".to_string(),
    })
}
