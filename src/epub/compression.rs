use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use log::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{CONTENT_DIR, META_INF_DIR, MIMETYPE};
use crate::error::Result;

pub struct EpubCompressor;

impl EpubCompressor {
    pub fn new() -> Self {
        Self
    }

    /// Packs `staging` into `out`. The `mimetype` entry goes first and is
    /// stored uncompressed, everything else is deflated. The archive is built
    /// next to `out` and renamed into place once complete.
    pub fn compress(&self, staging: &Path, out: &Path) -> Result<()> {
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = out.with_extension("epub.tmp");
        let file = File::create(&tmp_path)?;
        let mut zip = ZipWriter::new(file);

        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file("mimetype", stored)?;
        zip.write_all(MIMETYPE.as_bytes())?;

        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for dir in [META_INF_DIR, CONTENT_DIR] {
            add_directory(&mut zip, staging, &staging.join(dir), deflated)?;
        }

        zip.finish()?;
        fs::rename(&tmp_path, out)?;
        debug!("archive written to {}", out.display());
        Ok(())
    }
}

impl Default for EpubCompressor {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn add_directory<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> Result<()> {
    zip.add_directory(entry_name(root, dir)?, options)?;

    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            add_directory(zip, root, &path, options)?;
        } else {
            zip.start_file(entry_name(root, &path)?, options)?;
            let mut file = File::open(&path)?;
            io::copy(&mut file, zip)?;
        }
    }
    Ok(())
}
