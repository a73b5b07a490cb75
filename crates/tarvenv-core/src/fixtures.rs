use std::fs::File;
use std::io;
use std::path::Path;

use anyhow::Result;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};

pub(crate) const ROOT: &str = "acme-2.4.0-f00dfeed-src";

/// Writes a gzip tarball; names ending in `/` become directories.
pub(crate) fn write_tarball(path: &Path, entries: &[(String, &str)]) -> Result<()> {
    let encoder = GzEncoder::new(File::create(path)?, flate2::Compression::default());
    let mut builder = Builder::new(encoder);
    for (name, contents) in entries {
        let mut header = Header::new_gnu();
        if name.ends_with('/') {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, name, io::empty())?;
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(contents.len() as u64);
            builder.append_data(&mut header, name, contents.as_bytes())?;
        }
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

/// One bundled wheel, one source tree and one directory with neither.
pub(crate) fn write_vendor_tarball(path: &Path) -> Result<()> {
    write_tarball(
        path,
        &[
            (format!("{ROOT}/"), ""),
            (format!("{ROOT}/pkgs/"), ""),
            (format!("{ROOT}/pkgs/six-1.16.0-py2.py3-none-any.whl"), "six wheel"),
            (
                format!("{ROOT}/pkgs/Twisted-22.4.0/setup.py"),
                "from setuptools import setup\nsetup()\n",
            ),
            (format!("{ROOT}/pkgs/Twisted-22.4.0/src/twisted/__init__.py"), ""),
            (format!("{ROOT}/pkgs/docs/index.txt"), "docs"),
        ],
    )
}
