use std::sync::Arc;

use clap::Subcommand;
use serde_json::json;
use url::Url;

use breathwork_core::cache::{
    AssetWorker, CacheStorage, ClientRegistry, FetchOutcome, FsStorage, HttpNetwork, Method,
    Network, Request, RequestMode,
};
use breathwork_core::storage::cache_dir;
use breathwork_core::Config;

#[derive(Subcommand)]
pub enum CacheAction {
    /// Install the configured generation and activate it
    Install,
    /// Request a path through the cache
    Fetch {
        /// Root-relative path, e.g. "/app.js"
        path: String,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: Method,
        /// Print the response body instead of a summary
        #[arg(long)]
        body: bool,
    },
    /// List cached generations and their entries
    List,
    /// Show whether the configured generation is installed
    Status,
}

type CliWorker = AssetWorker<FsStorage, HttpNetwork>;

fn worker(config: &Config) -> Result<CliWorker, Box<dyn std::error::Error>> {
    let storage = Arc::new(FsStorage::new(cache_dir()?)?);
    let origin = Url::parse(&config.cache.origin)?;
    let network = HttpNetwork::new(origin);
    Ok(AssetWorker::new(
        &config.cache,
        storage,
        network,
        Arc::new(ClientRegistry::new()),
    )?)
}

pub fn run(action: CacheAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let mut worker = worker(&config)?;
    let runtime = tokio::runtime::Runtime::new()?;

    match action {
        CacheAction::Install => {
            let installed = runtime.block_on(worker.install())?;
            println!("{}", serde_json::to_string_pretty(&installed)?);
            let activated = runtime.block_on(worker.activate())?;
            println!("{}", serde_json::to_string_pretty(&activated)?);
        }
        CacheAction::Fetch {
            path,
            navigate,
            method,
            body,
        } => {
            if !worker.restore()? {
                tracing::warn!(
                    generation = %worker.generation(),
                    "generation not installed, requests go straight to the network"
                );
            }
            let mode = if navigate {
                RequestMode::Navigate
            } else {
                RequestMode::SameOrigin
            };
            let request = Request::get(worker.resolve(&path)?)
                .with_method(method)
                .with_mode(mode);

            let (response, source) = runtime.block_on(async {
                match worker.handle_fetch(&request).await? {
                    FetchOutcome::Served { response, source } => {
                        Ok::<_, breathwork_core::CacheError>((response, json!(source)))
                    }
                    FetchOutcome::Passthrough => {
                        let network = HttpNetwork::new(worker.origin().clone());
                        Ok((network.fetch(&request).await?, json!("passthrough")))
                    }
                }
            })?;

            if body {
                print!("{}", response.text());
            } else {
                let summary = json!({
                    "url": request.url.as_str(),
                    "source": source,
                    "status": response.status,
                    "type": response.kind,
                    "bytes": response.body.len(),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        CacheAction::List => {
            let storage = worker.storage();
            let mut listing = serde_json::Map::new();
            for generation in storage.generations()? {
                let keys = storage.keys(&generation)?;
                listing.insert(generation, json!(keys));
            }
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        CacheAction::Status => {
            let storage = worker.storage();
            let installed = storage.has_generation(worker.generation())?;
            let entries = if installed {
                storage.keys(worker.generation())?.len()
            } else {
                0
            };
            let status = json!({
                "generation": worker.generation(),
                "origin": worker.origin().as_str(),
                "installed": installed,
                "entries": entries,
                "others": storage
                    .generations()?
                    .into_iter()
                    .filter(|g| g != worker.generation())
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
