//! # Sunmoon Tide Command Line
//!
//! Thin host around the library:
//!
//! ```text
//! sunmoon-tide [-v|-vv|-vvv] [--config FILE] predict [--lat LAT --lon LON] [--name NAME]
//!                                                    [--date YYYY-MM-DD] [--graph] [--json]
//! sunmoon-tide [-v] package --out DIR [--secret SECRET]
//! sunmoon-tide [-v] verify --manifest FILE [--secret SECRET] [--tiles DIR]
//! ```
//!
//! `package` writes a directory that can be served as-is by any static file
//! server: `tiles/{tile_id}` bodies match the `GET /tiles/{tile_id}` response and
//! `manifest.json` indexes them.

// Test modules
#[cfg(test)]
mod tests;

use anyhow::{anyhow, bail, Context};
use chrono::{Local, NaiveDate};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sunmoon_tide_lib::config::Config;
use sunmoon_tide_lib::constituents::Region;
use sunmoon_tide_lib::harmonic::HarmonicSynthesizer;
use sunmoon_tide_lib::packager::{self, ManifestOptions, PackageOptions};
use sunmoon_tide_lib::renderer::render_text;
use sunmoon_tide_lib::service::{utc_offset_from_hours, PredictionRequest, TidePredictionService};
use sunmoon_tide_lib::storage::TileStorageManager;
use sunmoon_tide_lib::store::FileTileStore;
use sunmoon_tide_lib::tile::{TilePackage, TilePackageManifest};
use sunmoon_tide_lib::tile_fetch::TileClient;
use sunmoon_tide_lib::{logging, LocationData};

/// Parsed command line.
#[derive(Debug, Clone, PartialEq)]
struct Cli {
    verbosity: u8,
    config_path: Option<PathBuf>,
    command: Command,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Predict(PredictArgs),
    Package {
        out: PathBuf,
        secret: Option<String>,
    },
    Verify {
        manifest: PathBuf,
        secret: Option<String>,
        tiles: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
struct PredictArgs {
    lat: Option<f64>,
    lon: Option<f64>,
    name: Option<String>,
    date: Option<NaiveDate>,
    graph: bool,
    json: bool,
}

const USAGE: &str = "usage: sunmoon-tide [-v] [--config FILE] <predict|package|verify> [options]";

fn parse_args(args: &[String]) -> anyhow::Result<Cli> {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut command_name = None;
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "-vv" | "-vvv" => verbosity = verbosity.saturating_add((arg.len() - 1) as u8),
            "--verbose" => verbosity = verbosity.saturating_add(1),
            "--config" => {
                config_path = Some(PathBuf::from(
                    iter.next().ok_or_else(|| anyhow!("--config needs a path"))?,
                ))
            }
            other if command_name.is_none() && !other.starts_with('-') => {
                command_name = Some(other.to_string())
            }
            _ => rest.push(arg.clone()),
        }
    }

    let command = match command_name.as_deref() {
        Some("predict") => Command::Predict(parse_predict(&rest)?),
        Some("package") => {
            let mut out = None;
            let mut secret = None;
            let mut iter = rest.iter();
            while let Some(flag) = iter.next() {
                match flag.as_str() {
                    "--out" => out = Some(PathBuf::from(value(&mut iter, flag)?)),
                    "--secret" => secret = Some(value(&mut iter, flag)?.to_string()),
                    other => bail!("unknown package option {other}\n{USAGE}"),
                }
            }
            Command::Package {
                out: out.ok_or_else(|| anyhow!("package needs --out DIR"))?,
                secret,
            }
        }
        Some("verify") => {
            let mut manifest = None;
            let mut secret = None;
            let mut tiles = None;
            let mut iter = rest.iter();
            while let Some(flag) = iter.next() {
                match flag.as_str() {
                    "--manifest" => manifest = Some(PathBuf::from(value(&mut iter, flag)?)),
                    "--secret" => secret = Some(value(&mut iter, flag)?.to_string()),
                    "--tiles" => tiles = Some(PathBuf::from(value(&mut iter, flag)?)),
                    other => bail!("unknown verify option {other}\n{USAGE}"),
                }
            }
            Command::Verify {
                manifest: manifest.ok_or_else(|| anyhow!("verify needs --manifest FILE"))?,
                secret,
                tiles,
            }
        }
        Some(other) => bail!("unknown command {other}\n{USAGE}"),
        None => bail!("{USAGE}"),
    };

    Ok(Cli {
        verbosity,
        config_path,
        command,
    })
}

fn parse_predict(args: &[String]) -> anyhow::Result<PredictArgs> {
    let mut parsed = PredictArgs::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--lat" => parsed.lat = Some(value(&mut iter, flag)?.parse().context("--lat")?),
            "--lon" => parsed.lon = Some(value(&mut iter, flag)?.parse().context("--lon")?),
            "--name" => parsed.name = Some(value(&mut iter, flag)?.to_string()),
            "--date" => {
                parsed.date = Some(
                    NaiveDate::parse_from_str(value(&mut iter, flag)?, "%Y-%m-%d")
                        .context("--date expects YYYY-MM-DD")?,
                )
            }
            "--graph" => parsed.graph = true,
            "--json" => parsed.json = true,
            other => bail!("unknown predict option {other}\n{USAGE}"),
        }
    }
    if parsed.lat.is_some() != parsed.lon.is_some() {
        bail!("--lat and --lon must be given together");
    }
    Ok(parsed)
}

fn value<'a>(iter: &mut std::slice::Iter<'a, String>, flag: &str) -> anyhow::Result<&'a str> {
    iter.next()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{flag} needs a value"))
}

async fn open_storage(config: &Config) -> anyhow::Result<Arc<TileStorageManager<FileTileStore>>> {
    let store = FileTileStore::open(&config.storage.dir).await?;
    let storage = Arc::new(TileStorageManager::new(store, config.storage.to_options()));
    storage.init().await?;
    Ok(storage)
}

/// Predict one local day and render it as text or JSON.
async fn run_predict(config: &Config, args: &PredictArgs) -> anyhow::Result<String> {
    let location = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => {
            LocationData::new(lat, lon, args.name.clone().unwrap_or_else(|| format!("{lat}, {lon}")))
        }
        _ => config.location.to_location(),
    };
    let offset = utc_offset_from_hours(config.location.utc_offset_hours)?;
    let date = args
        .date
        .unwrap_or_else(|| Local::now().with_timezone(&offset).date_naive());

    let synthesizer =
        HarmonicSynthesizer::new().with_sample_interval(config.prediction.sample_interval_minutes);
    let mut service = TidePredictionService::new(synthesizer)
        .with_utc_offset(offset)
        .with_graph_interval(config.prediction.graph_interval_minutes);

    // The cache directory is only created when there is a server to fill it from
    if config.tiles.base_url.is_some() || config.storage.dir.exists() {
        match open_storage(config).await {
            Ok(storage) => service = service.with_storage(storage),
            Err(e) => tracing::warn!(error = %e, "tile cache unavailable, predicting without it"),
        }
    }
    if let Some(base_url) = &config.tiles.base_url {
        let client = TileClient::new(base_url.clone(), Duration::from_secs(config.tiles.timeout_secs))?;
        service = service.with_client(client);
    }

    let mut request = PredictionRequest::new(location, date);
    if args.graph {
        request = request.with_graph(None);
    }
    let response = service.get_predictions(&request).await?;

    if let Some(storage) = service.storage() {
        if let Err(e) = storage.close().await {
            tracing::warn!(error = %e, "could not persist tile cache metadata");
        }
    }

    if args.json {
        Ok(serde_json::to_string_pretty(&response)?)
    } else {
        Ok(render_text(&response, offset))
    }
}

/// Package every region tile and every 1°×1° cell of the Thai coast into `out`.
fn run_package(config: &Config, out: &Path, secret: Option<&str>) -> anyhow::Result<TilePackageManifest> {
    let options = PackageOptions {
        model: config.tiles.model.clone(),
        datum: config.tiles.datum.clone(),
        version: config.tiles.version.clone(),
        ..PackageOptions::default()
    };

    let mut packages = Vec::new();
    for region in Region::ALL {
        packages.push(packager::package_region(region, &options)?);
    }
    for lat in 5..=13 {
        for lon in 97..=104 {
            packages.push(packager::package_cell(lat as f64 + 0.5, lon as f64 + 0.5, &options)?);
        }
    }

    let tiles_dir = out.join("tiles");
    fs::create_dir_all(&tiles_dir).with_context(|| format!("creating {}", tiles_dir.display()))?;
    for package in &packages {
        fs::write(tiles_dir.join(package.tile_id()), serde_json::to_vec(package)?)?;
    }

    let manifest = packager::manifest(
        &packages,
        &ManifestOptions {
            version: config.tiles.version.clone(),
            hmac_secret: secret.or(config.tiles.hmac_secret.as_deref()),
        },
    )?;
    fs::write(out.join("manifest.json"), serde_json::to_vec_pretty(&manifest)?)?;

    tracing::info!(
        tiles = packages.len(),
        signed = manifest.signature.is_some(),
        out = %out.display(),
        "wrote tile package"
    );
    Ok(manifest)
}

/// Check a manifest's signature and, optionally, every tile it lists.
fn run_verify(
    config: &Config,
    manifest_path: &Path,
    secret: Option<&str>,
    tiles_dir: Option<&Path>,
) -> anyhow::Result<String> {
    let manifest: TilePackageManifest = serde_json::from_slice(
        &fs::read(manifest_path).with_context(|| format!("reading {}", manifest_path.display()))?,
    )?;

    let mut report = Vec::new();
    match secret.or(config.tiles.hmac_secret.as_deref()) {
        Some(secret) => {
            if !packager::verify_manifest_signature(&manifest, secret)? {
                bail!("manifest signature is invalid");
            }
            report.push("signature ok".to_string());
        }
        None => report.push("signature not checked (no secret)".to_string()),
    }

    if let Some(dir) = tiles_dir {
        for entry in &manifest.tiles {
            let path = dir.join(&entry.tile_id);
            let package: TilePackage = serde_json::from_slice(
                &fs::read(&path).with_context(|| format!("reading {}", path.display()))?,
            )?;
            packager::verify_against_manifest(&manifest, &package)?;
            packager::unpack(&package)?;
        }
        report.push(format!("{} tiles ok", manifest.tiles.len()));
    }
    Ok(report.join("\n"))
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = parse_args(&args)?;
    logging::init(cli.verbosity);

    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    match &cli.command {
        Command::Predict(predict) => {
            // Create Tokio runtime for async operations
            let rt = tokio::runtime::Runtime::new()?;
            println!("{}", rt.block_on(run_predict(&config, predict))?);
        }
        Command::Package { out, secret } => {
            let manifest = run_package(&config, out, secret.as_deref())?;
            println!(
                "Packaged {} tiles into {}{}",
                manifest.tiles.len(),
                out.display(),
                if manifest.signature.is_some() { " (signed)" } else { "" }
            );
        }
        Command::Verify {
            manifest,
            secret,
            tiles,
        } => {
            println!(
                "{}",
                run_verify(&config, manifest, secret.as_deref(), tiles.as_deref())?
            );
        }
    }
    Ok(())
}
