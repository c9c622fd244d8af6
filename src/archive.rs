use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read};

use bzip2::read::BzDecoder;
use camino::Utf8Path;
use flate2::read::MultiGzDecoder;
use xz2::read::XzDecoder;

use crate::error::TarKvError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = *b"BZh";
const XZ_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Plain,
    Gzip,
    Bzip2,
    Xz,
}

/// One regular-file member of an archive.
///
/// `path` carries the raw bytes recorded in the archive, unmodified; it is
/// the store key. `index` is the member's position among all entries so an
/// independent handle can relocate it.
#[derive(Debug, Clone)]
pub struct MemberDescriptor {
    pub path: Vec<u8>,
    pub size: u64,
    pub index: usize,
}

impl MemberDescriptor {
    pub fn display_path(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }
}

/// Sniffs the container kind from magic bytes. Plain tar is recognized by
/// the ustar magic, or by an all-zero leading block (an archive holding
/// nothing but the terminator).
pub fn detect_kind(archive_path: &Utf8Path) -> Result<ArchiveKind, TarKvError> {
    let mut file = File::open(archive_path.as_std_path())
        .map_err(|err| TarKvError::ArchiveFormat(format!("open {archive_path}: {err}")))?;
    let mut header = [0u8; 512];
    let mut filled = 0;
    while filled < header.len() {
        let read = file
            .read(&mut header[filled..])
            .map_err(|err| TarKvError::ArchiveFormat(format!("read {archive_path}: {err}")))?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    sniff_kind(&header[..filled]).ok_or_else(|| {
        TarKvError::ArchiveFormat(format!(
            "{archive_path} is not a tar, tar.gz, tar.bz2 or tar.xz archive"
        ))
    })
}

fn sniff_kind(header: &[u8]) -> Option<ArchiveKind> {
    if header.starts_with(&GZIP_MAGIC) {
        return Some(ArchiveKind::Gzip);
    }
    if header.starts_with(&BZIP2_MAGIC) {
        return Some(ArchiveKind::Bzip2);
    }
    if header.starts_with(&XZ_MAGIC) {
        return Some(ArchiveKind::Xz);
    }
    if is_ustar_header(header) || is_terminator_block(header) {
        return Some(ArchiveKind::Plain);
    }
    None
}

// Both POSIX ("ustar\0") and GNU ("ustar ") magic share the first five bytes.
fn is_ustar_header(header: &[u8]) -> bool {
    header.len() >= 262 && &header[257..262] == b"ustar"
}

fn is_terminator_block(header: &[u8]) -> bool {
    header.len() == 512 && header.iter().all(|byte| *byte == 0)
}

fn open_archive(archive_path: &Utf8Path) -> Result<tar::Archive<Box<dyn Read>>, TarKvError> {
    let kind = detect_kind(archive_path)?;
    let file = File::open(archive_path.as_std_path())
        .map_err(|err| TarKvError::Filesystem(format!("open {archive_path}: {err}")))?;
    let reader = BufReader::new(file);
    let decoded: Box<dyn Read> = match kind {
        ArchiveKind::Plain => Box::new(reader),
        ArchiveKind::Gzip => Box::new(MultiGzDecoder::new(reader)),
        ArchiveKind::Bzip2 => Box::new(BzDecoder::new(reader)),
        ArchiveKind::Xz => Box::new(XzDecoder::new(reader)),
    };
    Ok(tar::Archive::new(decoded))
}

/// Enumerates the archive's regular-file members in one sequential pass.
/// An archive with zero members is not an error.
pub fn list_members(archive_path: &Utf8Path) -> Result<Vec<MemberDescriptor>, TarKvError> {
    let mut archive = open_archive(archive_path)?;
    let entries = archive
        .entries()
        .map_err(|err| TarKvError::ArchiveFormat(format!("{archive_path}: {err}")))?;

    let mut members = Vec::new();
    for (index, entry) in entries.enumerate() {
        let entry = entry.map_err(|err| TarKvError::ArchiveFormat(format!("{archive_path}: {err}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        members.push(MemberDescriptor {
            path: entry.path_bytes().into_owned(),
            size: entry.size(),
            index,
        });
    }
    Ok(members)
}

/// Reads the given members out of its own freshly opened archive handle,
/// invoking `visit` exactly once per member, in order. A single sequential
/// reader is never shared across threads; each worker calls this with its
/// own slice.
///
/// `members` must be sorted by `index`. Per-member failures (the archive
/// changed underneath the listing, a corrupt stream) are delivered through
/// `visit`; they never abort the remaining members unless the stream itself
/// is unreadable past the failure point.
pub fn read_members(
    archive_path: &Utf8Path,
    members: &[MemberDescriptor],
    mut visit: impl FnMut(&MemberDescriptor, Result<Vec<u8>, TarKvError>),
) {
    debug_assert!(
        members.windows(2).all(|pair| pair[0].index < pair[1].index),
        "members must be sorted by archive index"
    );

    let mut archive = match open_archive(archive_path) {
        Ok(archive) => archive,
        Err(err) => {
            for member in members {
                visit(member, Err(err.clone()));
            }
            return;
        }
    };
    let mut entries = match archive.entries() {
        Ok(entries) => entries,
        Err(err) => {
            let err = TarKvError::ArchiveFormat(format!("{archive_path}: {err}"));
            for member in members {
                visit(member, Err(err.clone()));
            }
            return;
        }
    };

    let mut next_index = 0usize;
    for (position, member) in members.iter().enumerate() {
        loop {
            let Some(entry) = entries.next() else {
                visit(
                    member,
                    Err(TarKvError::MemberMissing(format!(
                        "{} no longer present in {archive_path}",
                        member.display_path()
                    ))),
                );
                break;
            };
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // The stream is unreadable past a corrupt header; every
                    // member from here on fails with the same cause.
                    let err = TarKvError::ArchiveFormat(format!("{archive_path}: {err}"));
                    visit(member, Err(err.clone()));
                    for rest in &members[position + 1..] {
                        visit(rest, Err(err.clone()));
                    }
                    return;
                }
            };
            let index = next_index;
            next_index += 1;
            if index < member.index {
                continue;
            }

            if entry.path_bytes().as_ref() != member.path.as_slice() {
                visit(
                    member,
                    Err(TarKvError::MemberMissing(format!(
                        "{} no longer at its recorded position in {archive_path}",
                        member.display_path()
                    ))),
                );
                break;
            }
            let mut content = Vec::with_capacity(member.size as usize);
            let outcome = entry
                .read_to_end(&mut content)
                .map(|_| content)
                .map_err(|err| {
                    TarKvError::Filesystem(format!("read {}: {err}", member.display_path()))
                });
            visit(member, outcome);
            break;
        }
    }
}
