use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    /// Picks the codec from the file name, falling back to the magic bytes
    /// for archives with an unhelpful extension.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened for sniffing.
    pub fn detect(path: &Path) -> io::Result<Self> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            return Ok(Self::Gzip);
        }
        if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            return Ok(Self::Bzip2);
        }
        if name.ends_with(".tar") {
            return Ok(Self::None);
        }
        let mut magic = [0_u8; 3];
        let mut file = File::open(path)?;
        let read = file.read(&mut magic)?;
        Ok(match &magic[..read] {
            [0x1f, 0x8b, ..] => Self::Gzip,
            [b'B', b'Z', b'h'] => Self::Bzip2,
            _ => Self::None,
        })
    }
}

pub(crate) fn open_stream(path: &Path, compression: Compression) -> io::Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    Ok(match compression {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Bzip2 => Box::new(BzDecoder::new(file)),
    })
}
