use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// An error that occurred while packing or unpacking a layer archive.
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error while archiving layer: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file type in layer: {0}")]
    UnsupportedFileType(PathBuf),
}

/// Archives the `source` directory as an uncompressed tar at `dest` and
/// returns the stream's diff-id (`sha256:<hex>`).
///
/// The archive is deterministic: entries are sorted, modes normalized
/// (0o755 for directories and owner-executable files, 0o644 otherwise),
/// uid/gid zeroed and mtimes zeroed, so two archives of the same tree are
/// byte-identical. `prefix` roots the entries inside the archive; an empty
/// prefix archives the directory contents at the archive root.
pub fn archive(source: &Path, prefix: &str, dest: &Path) -> Result<String, ArchiveError> {
    let mut writer = DigestWriter {
        inner: File::create(dest)?,
        hasher: Sha256::new(),
    };

    {
        let mut builder = tar::Builder::new(&mut writer);
        builder.follow_symlinks(false);

        let mut archive_path = PathBuf::new();
        for component in Path::new(prefix).components() {
            archive_path.push(component);
            append_dir_header(&mut builder, &archive_path)?;
        }

        append_dir_entries(&mut builder, source, &archive_path)?;
        builder.finish()?;
    }

    Ok(format!("sha256:{}", hex::encode(writer.hasher.finalize())))
}

/// Unpacks an uncompressed tar stream into the given directory,
/// preserving entry permissions.
pub fn unpack(reader: impl Read, dest: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(dest)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(dest)?;

    Ok(())
}

/// Streams a file through SHA-256 and returns `sha256:<hex>`.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;

    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn append_dir_entries<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    archive_path: &Path,
) -> Result<(), ArchiveError> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        let entry_archive_path = archive_path.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            append_dir_header(builder, &entry_archive_path)?;
            append_dir_entries(builder, &path, &entry_archive_path)?;
        } else if file_type.is_file() {
            append_file(builder, &path, &entry_archive_path)?;
        } else if file_type.is_symlink() {
            append_symlink(builder, &path, &entry_archive_path)?;
        } else {
            return Err(ArchiveError::UnsupportedFileType(path));
        }
    }

    Ok(())
}

fn append_dir_header<W: Write>(
    builder: &mut tar::Builder<W>,
    archive_path: &Path,
) -> io::Result<()> {
    let mut header = normalized_header(tar::EntryType::Directory, 0o755, 0);
    // Trailing slash per tar convention for directory entries.
    builder.append_data(&mut header, archive_path.join(""), io::empty())
}

fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    archive_path: &Path,
) -> io::Result<()> {
    let metadata = fs::metadata(path)?;
    let mut header = normalized_header(
        tar::EntryType::Regular,
        normalized_mode(&metadata),
        metadata.len(),
    );

    builder.append_data(&mut header, archive_path, File::open(path)?)
}

fn append_symlink<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    archive_path: &Path,
) -> io::Result<()> {
    let mut header = normalized_header(tar::EntryType::Symlink, 0o777, 0);
    builder.append_link(&mut header, archive_path, fs::read_link(path)?)
}

fn normalized_header(entry_type: tar::EntryType, mode: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

#[cfg(target_family = "unix")]
fn normalized_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    if metadata.permissions().mode() & 0o111 == 0 {
        0o644
    } else {
        0o755
    }
}

#[cfg(not(target_family = "unix"))]
fn normalized_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}
