use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use embryo_search::{
    database::snapshot,
    server::{self, AppState},
    ResnetPredictor, SearchEngine, SimilaritySpec,
};

/// Similarity search service over the public embryo image database.
#[derive(Parser, Debug)]
#[command(name = "embryo-search", version)]
struct Cli {
    /// Port to listen on (8080 is taken by the main site).
    #[arg(long, default_value_t = 8081)]
    port: u16,

    /// Directory holding the predictions snapshot and the download cache.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory holding the trained model artifacts.
    #[arg(long, default_value = "models")]
    models_dir: PathBuf,

    /// Weight of stage similarity in [0, 1]; locations get the rest.
    #[arg(long, default_value_t = 0.5)]
    alpha: f32,

    /// Base URL images are downloaded from when not found locally.
    #[arg(long, default_value = "http://geisha.arizona.edu/geisha/photos")]
    image_base_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simplelog::TermLogger::init(
        log::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .ok();

    let cli = Cli::parse();
    if !(0.0..=1.0).contains(&cli.alpha) {
        anyhow::bail!("--alpha must be within [0, 1], got {}", cli.alpha);
    }

    // Everything here is fatal: the service must not start serving with a
    // missing snapshot or unloadable models.
    let store = snapshot::load(&cli.data_dir.join("database-image-predictions.bin"))?;
    let predictor = ResnetPredictor::load(&cli.models_dir)?;
    let engine = SearchEngine::new(
        Box::new(predictor),
        store,
        SimilaritySpec::with_alpha(cli.alpha),
    )?;
    log::info!(
        "[server] engine ready: {} indexed images, alpha {}",
        engine.store_len(),
        cli.alpha
    );

    let state = AppState {
        engine: Arc::new(engine),
        image_base_url: cli.image_base_url,
        cache_dir: cli.data_dir.join("temporary-images"),
    };
    server::serve(state, cli.port).await?;
    Ok(())
}
