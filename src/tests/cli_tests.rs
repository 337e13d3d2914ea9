//! Command line parsing and the package / verify / predict commands.

use crate::{parse_args, run_package, run_predict, run_verify, Cli, Command, PredictArgs};
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;
use sunmoon_tide_lib::config::Config;
use sunmoon_tide_lib::tile::TilePackage;
use tempfile::TempDir;

fn args(line: &str) -> Vec<String> {
    line.split_whitespace().map(String::from).collect()
}

/// Config whose cache directory lives in a scratch dir and is never created.
fn scratch_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.dir = dir.path().join("no-cache");
    config
}

#[test]
fn parses_predict_with_location_and_date() {
    let cli = parse_args(&args(
        "-vv predict --lat 7.8804 --lon 98.3923 --name Phuket --date 2025-03-14 --graph",
    ))
    .unwrap();
    assert_eq!(
        cli,
        Cli {
            verbosity: 2,
            config_path: None,
            command: Command::Predict(PredictArgs {
                lat: Some(7.8804),
                lon: Some(98.3923),
                name: Some("Phuket".to_string()),
                date: NaiveDate::from_ymd_opt(2025, 3, 14),
                graph: true,
                json: false,
            }),
        }
    );
}

#[test]
fn parses_package_and_verify() {
    let cli = parse_args(&args("--config site.toml package --out dist --secret s3")).unwrap();
    assert_eq!(cli.config_path, Some(PathBuf::from("site.toml")));
    assert_eq!(
        cli.command,
        Command::Package {
            out: PathBuf::from("dist"),
            secret: Some("s3".to_string()),
        }
    );

    let cli = parse_args(&args("verify --manifest dist/manifest.json --tiles dist/tiles")).unwrap();
    assert_eq!(
        cli.command,
        Command::Verify {
            manifest: PathBuf::from("dist/manifest.json"),
            secret: None,
            tiles: Some(PathBuf::from("dist/tiles")),
        }
    );
}

#[test]
fn rejects_bad_command_lines() {
    assert!(parse_args(&[]).is_err());
    assert!(parse_args(&args("forecast")).is_err());
    assert!(parse_args(&args("package")).is_err());
    assert!(parse_args(&args("predict --lat 13.7")).is_err());
    assert!(parse_args(&args("predict --date 14/03/2025")).is_err());
    assert!(parse_args(&args("verify --manifest")).is_err());
}

#[test]
fn negative_coordinates_are_values_not_flags() {
    let cli = parse_args(&args("predict --lat -0.5 --lon -45.25")).unwrap();
    match cli.command {
        Command::Predict(p) => {
            assert_eq!(p.lat, Some(-0.5));
            assert_eq!(p.lon, Some(-45.25));
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn package_then_verify_roundtrip() {
    let dir = TempDir::new().unwrap();
    let config = scratch_config(&dir);
    let out = dir.path().join("dist");

    let manifest = run_package(&config, &out, Some("test-secret")).unwrap();
    assert_eq!(manifest.tiles.len(), 2 + 9 * 8);
    assert!(manifest.signature.is_some());
    assert!(out.join("tiles").join("cell_13_100").exists());
    assert!(out.join("tiles").join("region_andaman_sea").exists());

    let report = run_verify(
        &config,
        &out.join("manifest.json"),
        Some("test-secret"),
        Some(&out.join("tiles")),
    )
    .unwrap();
    assert!(report.contains("signature ok"));
    assert!(report.contains("74 tiles ok"));

    assert!(run_verify(&config, &out.join("manifest.json"), Some("wrong-secret"), None).is_err());
}

#[test]
fn verify_catches_tampered_tile_file() {
    let dir = TempDir::new().unwrap();
    let config = scratch_config(&dir);
    let out = dir.path().join("dist");
    run_package(&config, &out, None).unwrap();

    let path = out.join("tiles").join("cell_7_98");
    let mut package: TilePackage = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    package.payload[3] ^= 0x20;
    fs::write(&path, serde_json::to_vec(&package).unwrap()).unwrap();

    let err = run_verify(&config, &out.join("manifest.json"), None, Some(&out.join("tiles")))
        .unwrap_err();
    assert!(err.to_string().contains("cell_7_98"));
}

#[tokio::test]
async fn predict_renders_text_and_json() {
    let dir = TempDir::new().unwrap();
    let config = scratch_config(&dir);

    let text = run_predict(
        &config,
        &PredictArgs {
            date: NaiveDate::from_ymd_opt(2025, 3, 14),
            graph: true,
            ..PredictArgs::default()
        },
    )
    .await
    .unwrap();
    assert!(text.starts_with("Bangkok"));
    assert!(text.contains("ESTIMATED"));
    assert!(text.contains('•'));

    let json = run_predict(
        &config,
        &PredictArgs {
            lat: Some(7.8804),
            lon: Some(98.3923),
            name: Some("Phuket".to_string()),
            date: NaiveDate::from_ymd_opt(2025, 3, 14),
            json: true,
            ..PredictArgs::default()
        },
    )
    .await
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["location"]["name"], "Phuket");
    assert_eq!(value["dataSource"], "harmonic");
    assert!(!config.storage.dir.exists());
}

#[tokio::test]
async fn predict_survives_a_damaged_cache_directory() {
    let dir = TempDir::new().unwrap();
    let mut config = scratch_config(&dir);
    config.storage.dir = dir.path().join("cache");
    fs::create_dir_all(config.storage.dir.join("tiles")).unwrap();
    fs::write(config.storage.dir.join("metadata.json"), "{ not json").unwrap();

    let json = run_predict(
        &config,
        &PredictArgs {
            date: NaiveDate::from_ymd_opt(2025, 3, 14),
            json: true,
            ..PredictArgs::default()
        },
    )
    .await
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["dataSource"], "harmonic");
}
