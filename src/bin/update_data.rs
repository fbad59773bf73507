//! Nightly refresh job. Pulls the list of images added to the database
//! since the last run, predicts their stage and anatomical locations, and
//! appends the results to the predictions snapshot. Meant to run from cron
//! on the image server; a run that dies partway leaves the previous
//! snapshot untouched because the rewrite is write-then-rename.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

use embryo_search::{database::snapshot, EmbryoPredictor, FeatureRecord, ResnetPredictor};

/// Fallback when the bookkeeping file is missing: refresh everything.
const EPOCH: &str = "01/01/00";

#[derive(Parser, Debug)]
#[command(name = "update-data", version)]
struct Cli {
    /// Directory holding the predictions snapshot and bookkeeping files.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory holding the trained model artifacts.
    #[arg(long, default_value = "models")]
    models_dir: PathBuf,

    /// Directory the public image files live in on this server.
    #[arg(long, default_value = "photos")]
    photos_dir: PathBuf,

    /// Metadata endpoint listing images added since a date.
    #[arg(long, default_value = "http://geisha.arizona.edu/geisha/Images/metadata")]
    metadata_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    simplelog::WriteLogger::init(
        log::LevelFilter::Info,
        simplelog::Config::default(),
        std::fs::File::create(cli.data_dir.join("update-data.log"))?,
    )
    .ok();

    let last_updated_path = cli.data_dir.join("last-updated");
    let last_updated = match std::fs::read_to_string(&last_updated_path) {
        Ok(s) => s.trim().to_string(),
        Err(e) => {
            log::warn!("[update] no last-updated file ({e}), refreshing since {EPOCH}");
            EPOCH.to_string()
        }
    };

    log::info!("[update] checking for images added since {last_updated}");
    let url = format!(
        "{}?scope=public&since={last_updated}",
        cli.metadata_url.trim_end_matches('/')
    );
    let body = reqwest::get(&url).await?.error_for_status()?.text().await?;
    let new_filenames = parse_metadata_filenames(&body);
    log::info!("[update] metadata lists {} new images", new_filenames.len());

    let snapshot_path = cli.data_dir.join("database-image-predictions.bin");
    let mut store = snapshot::load(&snapshot_path)?;

    // Drop overlap from the date filter and metadata rows with no file on
    // disk; duplicate filtering happens here, not in the engine.
    let pending: Vec<String> = new_filenames
        .into_iter()
        .filter(|f| {
            if store.contains(f) {
                return false;
            }
            let on_disk = cli.photos_dir.join(f).exists();
            if !on_disk {
                log::warn!("[update] metadata lists {f} but it is not on disk, skipping");
            }
            on_disk
        })
        .collect();

    if pending.is_empty() {
        log::info!("[update] data already up to date");
        return Ok(());
    }

    log::info!("[update] predicting on {} images", pending.len());
    let predictor = ResnetPredictor::load(&cli.models_dir)?;
    let mut records: Vec<FeatureRecord> = Vec::with_capacity(pending.len());
    for filename in &pending {
        let bytes = std::fs::read(cli.photos_dir.join(filename))?;
        match predictor.predict(&bytes) {
            Ok(features) => records.push(FeatureRecord {
                filename: filename.clone(),
                stage: features.stage,
                locations: features.locations,
            }),
            Err(e) => log::warn!("[update] skipping {filename}: {e}"),
        }
    }
    let added: Vec<String> = records.iter().map(|r| r.filename.clone()).collect();
    store.append_batch(records)?;
    snapshot::save(&snapshot_path, &store)?;

    // Bookkeeping only after the snapshot rename has landed.
    let today = chrono::Local::now().format("%m/%d/%y").to_string();
    std::fs::write(&last_updated_path, &today)?;
    let mut log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(cli.data_dir.join("data-updates-log"))?;
    writeln!(log_file, "{today}: Added {} images ({})", added.len(), added.join(" "))?;
    log::info!("[update] updated snapshot with {} images", added.len());
    Ok(())
}

/// The metadata endpoint returns headerless CSV rows of
/// `filename,stage,locations`; only the filename column matters here.
fn parse_metadata_filenames(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.split(',').next())
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
