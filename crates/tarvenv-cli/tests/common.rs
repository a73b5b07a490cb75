#![allow(dead_code)]

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use serde_json::Value;
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;

pub const ROOT: &str = "authproxy-6.0.2-0f1e2d3-src";

/// Writes a gzip tarball; names ending in `/` become directories.
pub fn write_tarball(path: &Path, entries: &[(&str, &str)]) {
    let file = File::create(path).expect("create tarball");
    let mut builder = Builder::new(GzEncoder::new(file, flate2::Compression::default()));
    for (name, contents) in entries {
        let mut header = Header::new_gnu();
        if name.ends_with('/') {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder
                .append_data(&mut header, name, io::empty())
                .expect("append dir");
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(contents.len() as u64);
            builder
                .append_data(&mut header, name, contents.as_bytes())
                .expect("append file");
        }
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip");
}

pub fn vendor_tarball() -> (TempDir, PathBuf) {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("authproxy.tgz");
    let entries = [
        format!("{ROOT}/"),
        format!("{ROOT}/pkgs/"),
        format!("{ROOT}/pkgs/six-1.16.0-py2.py3-none-any.whl"),
        format!("{ROOT}/pkgs/Python-3.8.13/setup.py"),
        format!("{ROOT}/pkgs/duo_client_python-4.2.1/setup.py"),
        format!("{ROOT}/pkgs/Twisted-22.4.0/pyproject.toml"),
    ];
    let contents = ["", "", "wheel", "# interpreter", "setup()", "[build-system]"];
    let pairs: Vec<(&str, &str)> = entries
        .iter()
        .map(String::as_str)
        .zip(contents)
        .collect();
    write_tarball(&path, &pairs);
    (temp, path)
}

pub fn parse_json(stdout: &[u8]) -> Value {
    serde_json::from_slice(stdout).expect("json envelope")
}
