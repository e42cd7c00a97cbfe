use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;
use zip::write::FileOptions;

fn write(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn flat_terrain(size: u32) -> Vec<u8> {
    let n = (size * size) as usize;
    let mut data = vec![8u8];
    data.extend_from_slice(&size.to_le_bytes());
    for _ in 0..n {
        data.extend_from_slice(&128u16.to_le_bytes());
    }
    data.extend(std::iter::repeat(0u8).take(n));
    data.extend(std::iter::repeat(0u8).take(n * 4));
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&5u32.to_le_bytes());
    data.extend_from_slice(b"grass");
    data
}

/// A minimal game install: one level on disk, a second inside a content
/// zip the way stock levels ship.
fn build_game_root() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path();

    write(game, "levels/flatgrid/info.json", br#"{title = "Flat Grid"}"#);
    write(
        game,
        "levels/flatgrid/main/items.level.json",
        concat!(
            r#"{"class": "TerrainBlock", "terrainFile": "flat.ter", "#,
            r#""squareSize": 1, "maxHeight": 256}"#,
            "\n",
            r#"{"class": "DecalRoad", "name": "loop", "material": "asphalt", "#,
            r#""nodes": ["2 2 20 3", "8 2 20 3", "8 8 20 3"]}"#,
            "\n",
            r#"{"class": "TSStatic", "shapeName": "art/shapes/barrel.dae"}"#,
            "\n",
        )
        .as_bytes(),
    );
    write(game, "levels/flatgrid/flat.ter", &flat_terrain(12));

    let zip_path = game.join("content").join("levels.zip");
    fs::create_dir_all(zip_path.parent().unwrap()).unwrap();
    let mut writer = zip::ZipWriter::new(File::create(zip_path).unwrap());
    writer
        .start_file("levels/zipped/info.json", FileOptions::default())
        .unwrap();
    writer
        .write_all(br#"{"title": "From The Zip"}"#)
        .unwrap();
    writer.finish().unwrap();

    dir
}

#[test]
fn cli_lists_levels_from_disk_and_zips() {
    let game = build_game_root();
    let mut cmd = Command::cargo_bin("beamlevel").expect("binary exists");
    cmd.arg(game.path()).arg("--list").arg("--index-stats");
    cmd.assert()
        .success()
        .stdout(contains("Found 2 level(s)"))
        .stdout(contains(" - flatgrid (Flat Grid)"))
        .stdout(contains(" - zipped (From The Zip)"));
}

#[test]
fn cli_imports_a_level_and_reports_geometry() {
    let game = build_game_root();
    let mut cmd = Command::cargo_bin("beamlevel").expect("binary exists");
    cmd.arg(game.path()).arg("--level").arg("flatgrid");
    cmd.assert()
        .success()
        .stdout(contains("Level flatgrid:"))
        .stdout(contains("1 TerrainBlock"))
        .stdout(contains("1 DecalRoad"))
        .stdout(contains("1 TSStatic"))
        .stdout(contains(" - loop:"))
        .stdout(contains(" - barrel.dae: 1 instances"));
}

#[test]
fn cli_rejects_unknown_arguments() {
    let game = build_game_root();
    let mut cmd = Command::cargo_bin("beamlevel").expect("binary exists");
    cmd.arg(game.path()).arg("--frobnicate");
    cmd.assert()
        .failure()
        .stderr(contains("Unknown argument"));
}

#[test]
fn cli_fails_on_missing_level() {
    let game = build_game_root();
    let mut cmd = Command::cargo_bin("beamlevel").expect("binary exists");
    cmd.arg(game.path()).arg("--level").arg("nosuch");
    cmd.assert()
        .failure()
        .stderr(contains("not found in the file index"));
}
