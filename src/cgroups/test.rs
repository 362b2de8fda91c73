#![cfg(test)]

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;

pub fn set_fixture(temp_dir: &Path, filename: &str, val: &str) -> Result<PathBuf> {
    let full_path = temp_dir.join(filename);

    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&full_path)?
        .write_all(val.as_bytes())?;

    Ok(full_path)
}

pub fn setup(cgroup_file: &str) -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().expect("create temp directory for test");
    let full_path = set_fixture(tmp.path(), cgroup_file, "")
        .unwrap_or_else(|_| panic!("set test fixture for {}", cgroup_file));
    (tmp, full_path)
}
