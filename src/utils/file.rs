use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;

use crate::config::defs::PART_EXT;

/// Either a plain or a gzip-compressed input file.
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(GzDecoder<File>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(reader) => reader.read(buf),
            FileReader::Gzipped(reader) => reader.read(buf),
        }
    }
}

/// Opens `path`, transparently decompressing gzip input.
pub fn open_maybe_gzipped(path: &Path) -> io::Result<FileReader> {
    let gzipped = is_gzipped(path)?;
    let file = File::open(path)?;
    if gzipped {
        Ok(FileReader::Gzipped(GzDecoder::new(file)))
    } else {
        Ok(FileReader::Uncompressed(BufReader::new(file)))
    }
}

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn write_fasta_record<W: Write>(writer: &mut W, id: &str, desc: Option<&str>, seq: &[u8]) -> io::Result<()> {
    if let Some(desc) = desc {
        writeln!(writer, ">{} {}", id, desc)?;
    } else {
        writeln!(writer, ">{}", id)?;
    }
    writer.write_all(seq)?;
    writeln!(writer)?;
    Ok(())
}

/// Absolute paths pass through, relative ones are anchored at `base`.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Bare program names stay as-is for a `PATH` lookup; anything with a separator is a path.
pub fn resolve_program(base: &Path, program: &str) -> String {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        resolve_path(base, Path::new(program)).to_string_lossy().into_owned()
    } else {
        program.to_string()
    }
}

/// Sibling path that output is written to before being renamed into place.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(PART_EXT);
    path.with_file_name(name)
}

/// Renames a finished `.part` file over its final name.
pub fn commit_part(path: &Path) -> io::Result<()> {
    fs::rename(part_path(path), path)
}

/// Writes `contents` so that readers only ever see the complete file.
pub fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let part = part_path(path);
    fs::write(&part, contents)?;
    fs::rename(&part, path)
}

/// Unpacks the regular files of a `.tar.gz` archive into `target`, dropping their
/// directory components. Returns the number of files written.
pub fn extract_tar_gz_flat(archive_path: &Path, target: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut extracted = 0usize;

    for entry in archive.entries().context("Failed to read archive entries")? {
        let mut entry = entry.context("Failed to read archive entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path().context("Archive entry has an invalid path")?.into_owned();
        let name = flat_name(&entry_path)
            .ok_or_else(|| anyhow!("Archive entry {} has no usable file name", entry_path.display()))?;
        let destination = target.join(name);
        let mut output = File::create(&destination)
            .with_context(|| format!("Failed to create {}", destination.display()))?;
        io::copy(&mut entry, &mut output)
            .with_context(|| format!("Failed to extract {}", destination.display()))?;
        extracted += 1;
    }
    Ok(extracted)
}

fn flat_name(path: &Path) -> Option<&std::ffi::OsStr> {
    match path.components().next_back()? {
        Component::Normal(name) => Some(name),
        _ => None,
    }
}

/// Files directly inside `dir` with extension `ext`, sorted by name.
pub fn files_with_extension(dir: &Path, ext: &str) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
