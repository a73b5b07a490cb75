use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use tar::{Builder, EntryType, Header};

use crate::reader::Compression;

pub(crate) enum Node<'a> {
    Dir(&'a str),
    File(&'a str, &'a [u8]),
    Symlink(&'a str, &'a Path),
}

pub(crate) fn write_tarball(path: &Path, compression: Compression, nodes: &[Node<'_>]) -> Result<()> {
    let file = File::create(path)?;
    match compression {
        Compression::None => {
            finish(append_nodes(Builder::new(file), nodes)?)?;
        }
        Compression::Gzip => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            finish(append_nodes(Builder::new(encoder), nodes)?)?.finish()?;
        }
        Compression::Bzip2 => {
            let encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
            finish(append_nodes(Builder::new(encoder), nodes)?)?.finish()?;
        }
    }
    Ok(())
}

fn append_nodes<W: Write>(mut builder: Builder<W>, nodes: &[Node<'_>]) -> Result<Builder<W>> {
    for node in nodes {
        let mut header = Header::new_gnu();
        match node {
            Node::Dir(path) => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, path, io::empty())?;
            }
            Node::File(path, contents) => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(contents.len() as u64);
                builder.append_data(&mut header, path, *contents)?;
            }
            Node::Symlink(path, target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, path, target)?;
            }
        }
    }
    Ok(builder)
}

fn finish<W: Write>(builder: Builder<W>) -> Result<W> {
    Ok(builder.into_inner()?)
}

/// A vendor-style tarball exercising every classification path.
pub(crate) fn vendor_nodes() -> Vec<Node<'static>> {
    vec![
        Node::Dir("duoauthproxy-6.0.0-abc123-src/"),
        Node::File("duoauthproxy-6.0.0-abc123-src/install.py", b"print('install')"),
        Node::Dir("duoauthproxy-6.0.0-abc123-src/pkgs/"),
        Node::File("duoauthproxy-6.0.0-abc123-src/pkgs/.DS_Store", b"junk"),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/Python-3.8.13/setup.py",
            b"# interpreter",
        ),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/six-1.16.0-py2.py3-none-any.whl",
            b"wheel",
        ),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/cryptography-41.0.1-cp37-abi3-manylinux_2_17_x86_64.whl",
            b"wheel",
        ),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/cryptography-41.0.1-cp37-abi3-win_amd64.whl",
            b"wheel",
        ),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/Twisted-22.4.0/setup.py",
            b"from setuptools import setup\nsetup()\n",
        ),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/Twisted-22.4.0/src/twisted/__init__.py",
            b"",
        ),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/duo_client_python-4.4.0/pyproject.toml",
            b"[project]\nname = 'duo_client'\n",
        ),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/six-1.15.0/setup.py",
            b"setup()",
        ),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/vendored-bundle/nested/zope.interface-5.4.0-cp38-cp38-manylinux1_x86_64.whl",
            b"wheel",
        ),
        Node::File(
            "duoauthproxy-6.0.0-abc123-src/pkgs/docs-only/README",
            b"nothing to install",
        ),
    ]
}
