mod common;

use std::fs;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use rstest::*;
use serde_json::Value;

use common::populate;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[fixture]
fn images() -> TempDir {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 4).unwrap();
    dir
}

#[rstest]
fn build_then_reuse(images: TempDir) -> Result<()> {
    cargo_run!("imclip", "-i", images.path(), "--thumbnail-size", "48", "build")
        .success()
        .stdout(predicate::str::contains("indexed 4 images, 0 failed"));

    assert!(images.path().join(".index/index.npy").exists());

    cargo_run!("imclip", "-i", images.path(), "build")
        .success()
        .stdout(predicate::str::contains("up to date"));

    cargo_run!("imclip", "-i", images.path(), "build", "--force")
        .success()
        .stdout(predicate::str::contains("indexed 4 images"));
    Ok(())
}

#[rstest]
fn search_like_lists_itself_first(images: TempDir) -> Result<()> {
    let assert =
        cargo_run!("imclip", "-i", images.path(), "search", "--like", "img2.png", "-c", "3").success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    let lines = stdout.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("\timg2.png"));
    assert!(lines[0].starts_with("1.0000") || lines[0].starts_with("0.9999"));
    Ok(())
}

#[rstest]
fn search_image_json(images: TempDir) -> Result<()> {
    let query = images.path().join("img1.png");
    let assert = cargo_run!(
        "imclip",
        "-i",
        images.path(),
        "search",
        "--image",
        &query,
        "--exclude",
        "img0.png",
        "--output-format",
        "json"
    )
    .success();

    let result: Value = serde_json::from_slice(&assert.get_output().stdout)?;
    let hits = result[0]["hits"].as_array().expect("hits should be an array");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0]["path"], "img1.png");
    assert!(hits.iter().all(|hit| hit["path"] != "img0.png"));
    Ok(())
}

#[rstest]
fn search_mean_of_images(images: TempDir) -> Result<()> {
    let a = images.path().join("img1.png");
    let b = images.path().join("img3.png");
    cargo_run!(
        "imclip",
        "-i",
        images.path(),
        "search",
        "--image",
        &a,
        "--image",
        &b,
        "--mean",
        "--output-format",
        "json"
    )
    .success()
    .stdout(predicate::str::contains("_mean_"));
    Ok(())
}

#[rstest]
fn search_unknown_key_fails(images: TempDir) -> Result<()> {
    cargo_run!("imclip", "-i", images.path(), "search", "--like", "missing.png").failure();
    Ok(())
}

#[rstest]
fn search_requires_a_query(images: TempDir) -> Result<()> {
    cargo_run!("imclip", "-i", images.path(), "search").failure();
    Ok(())
}

#[rstest]
fn thumb_to_file(images: TempDir) -> Result<()> {
    let output = images.path().join("thumb.jpg");
    cargo_run!("imclip", "-i", images.path(), "thumb", "img0.png", "-o", &output).success();

    let data = fs::read(&output)?;
    assert_eq!(&data[..2], &[0xff, 0xd8]);
    Ok(())
}

#[rstest]
fn thumb_to_stdout(images: TempDir) -> Result<()> {
    let assert = cargo_run!("imclip", "-i", images.path(), "thumb", "img3.png").success();
    assert!(assert.get_output().stdout.starts_with(&[0xff, 0xd8]));
    Ok(())
}

#[rstest]
fn thumb_unknown_key_is_empty(images: TempDir) -> Result<()> {
    cargo_run!("imclip", "-i", images.path(), "thumb", "missing.png")
        .success()
        .stdout(predicate::str::is_empty());
    Ok(())
}

#[rstest]
fn missing_images_dir_fails() -> Result<()> {
    let dir = TempDir::new()?;
    cargo_run!("imclip", "-i", dir.path().join("nope"), "build").failure();
    Ok(())
}
