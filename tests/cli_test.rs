//! CLI end-to-end tests
//!
//! Tests for the atomkit command-line interface.

use assert_cmd::prelude::*;
use atomkit_media::{AacDescriptor, AvcDescriptor, Mp4File, Muxer, Packet, Timestamp};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the atomkit binary
#[allow(deprecated)]
fn atomkit_cmd() -> Command {
    Command::cargo_bin("atomkit").unwrap()
}

/// Write a two-track file: 10 video frames at 25 fps, 12 AAC frames.
fn write_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("input.mp4");
    let video = AvcDescriptor::new(1280, 720, vec![0x01, 0x64, 0x00, 0x1F]);
    let audio = AacDescriptor::new(2, 48000, vec![0x11, 0x90]);

    let mut muxer = Muxer::new(fs::File::create(&path).unwrap());
    muxer.write_header(&[&video, &audio]).unwrap();
    for i in 0..10i64 {
        let packet = Packet::new(0, Timestamp::new(i * 3600, 90000), vec![i as u8; 200])
            .keyframe(i % 5 == 0);
        muxer.write_packet(packet).unwrap();
    }
    for i in 0..12i64 {
        let packet = Packet::new(1, Timestamp::new(i * 1920, 90000), vec![0xAA; 40]).keyframe(true);
        muxer.write_packet(packet).unwrap();
    }
    muxer.write_trailer().unwrap();
    drop(muxer.into_inner().unwrap());
    path
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = atomkit_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_flag() {
    let mut cmd = atomkit_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("atomkit"));
}

#[test]
fn test_cli_inspect_help() {
    let mut cmd = atomkit_cmd();
    cmd.args(["inspect", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Show the tracks"));
}

#[test]
fn test_cli_inspect_summary() {
    let dir = tempdir().unwrap();
    let input = write_fixture(dir.path());

    let mut cmd = atomkit_cmd();
    cmd.arg("inspect")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Tracks: 2"))
        .stdout(predicate::str::contains("vide avc1 1280x720, 10 samples"))
        .stdout(predicate::str::contains("soun mp4a 2ch 48000Hz, 12 samples"))
        .stdout(predicate::str::contains("keyframes: 2"));
}

#[test]
fn test_cli_inspect_tree() {
    let dir = tempdir().unwrap();
    let input = write_fixture(dir.path());

    let mut cmd = atomkit_cmd();
    cmd.args(["inspect", "--tree"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ftyp size=32 offset=0"))
        .stdout(predicate::str::contains("mdat"))
        .stdout(predicate::str::contains("  trak"))
        .stdout(predicate::str::contains("stco"));
}

#[test]
fn test_cli_inspect_nonexistent_file() {
    let mut cmd = atomkit_cmd();
    cmd.args(["inspect", "/nonexistent/file.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_inspect_garbage_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("garbage.mp4");
    fs::write(&path, b"this is not an mp4 file at all").unwrap();

    let mut cmd = atomkit_cmd();
    cmd.arg("inspect")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse"));
}

#[test]
fn test_cli_remux_round_trip() {
    let dir = tempdir().unwrap();
    let input = write_fixture(dir.path());
    let output = dir.path().join("output.mp4");

    let mut cmd = atomkit_cmd();
    cmd.arg("remux")
        .arg(&input)
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 tracks, 22 samples"));

    let before = Mp4File::open(&input).unwrap();
    let after = Mp4File::open(&output).unwrap();
    assert_eq!(after.tracks.len(), 2);
    for (a, b) in before.tracks.iter().zip(&after.tracks) {
        assert_eq!(a.samples.len(), b.samples.len());
        assert_eq!(a.keyframe_indices(), b.keyframe_indices());
        assert_eq!(a.sample_entry, b.sample_entry);
    }
}

#[test]
fn test_cli_remux_with_config() {
    let dir = tempdir().unwrap();
    let input = write_fixture(dir.path());
    let output = dir.path().join("output.mp4");
    let config = dir.path().join("atomkit.toml");
    fs::write(&config, "[muxer]\ntimescale = 1000\nwrite_ftyp = false\n").unwrap();

    let mut cmd = atomkit_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("remux")
        .arg(&input)
        .arg(&output)
        .assert()
        .success();

    let data = fs::read(&output).unwrap();
    assert_eq!(&data[4..8], b"mdat");

    let file = Mp4File::open(&output).unwrap();
    assert!(file.ftyp.is_none());
    assert_eq!(file.tracks[0].timescale, 1000);
    let dts: Vec<u64> = file.tracks[0].samples.iter().map(|s| s.dts).take(3).collect();
    assert_eq!(dts, vec![0, 40, 80]);
}

#[test]
fn test_cli_remux_invalid_config() {
    let dir = tempdir().unwrap();
    let input = write_fixture(dir.path());
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[muxer]\nbuffer_size = 0\n").unwrap();

    let mut cmd = atomkit_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("remux")
        .arg(&input)
        .arg(dir.path().join("out.mp4"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("buffer_size"));
}
