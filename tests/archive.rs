use std::fs;
use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;

use tarkv::archive::{self, ArchiveKind};
use tarkv::error::TarKvError;

fn build_tar(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

fn build_tar_with_dir(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut dir_header = tar::Header::new_gnu();
    dir_header.set_size(0);
    dir_header.set_entry_type(tar::EntryType::Directory);
    dir_header.set_mode(0o755);
    dir_header.set_cksum();
    builder
        .append_data(&mut dir_header, "nested/", std::io::empty())
        .unwrap();
    for (path, content) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

fn write_archive(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
    fs::write(path.as_std_path(), bytes).unwrap();
    path
}

#[test]
fn lists_regular_members_only() {
    let temp = tempfile::tempdir().unwrap();
    let tar_bytes = build_tar_with_dir(&[("nested/a.pdb", b"alpha"), ("b.pdb", b"beta-beta")]);
    let path = write_archive(&temp, "input.tar", &tar_bytes);

    let members = archive::list_members(&path).unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].path, b"nested/a.pdb");
    assert_eq!(members[0].size, 5);
    assert_eq!(members[1].path, b"b.pdb");
    assert_eq!(members[1].size, 9);
    // The directory entry occupies index 0 but is not listed.
    assert_eq!(members[0].index, 1);
    assert_eq!(members[1].index, 2);
}

#[test]
fn empty_archive_lists_no_members() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_archive(&temp, "empty.tar", &build_tar(&[]));
    assert!(archive::list_members(&path).unwrap().is_empty());
}

#[test]
fn garbage_is_not_an_archive() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_archive(&temp, "junk.bin", b"this is not an archive of any kind");
    assert_matches!(
        archive::list_members(&path),
        Err(TarKvError::ArchiveFormat(_))
    );
}

#[test]
fn detects_compression_from_magic_bytes() {
    let temp = tempfile::tempdir().unwrap();
    let tar_bytes = build_tar(&[("a.pdb", b"alpha")]);

    let plain = write_archive(&temp, "plain.dat", &tar_bytes);
    assert_eq!(archive::detect_kind(&plain).unwrap(), ArchiveKind::Plain);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    let gz = write_archive(&temp, "gz.dat", &encoder.finish().unwrap());
    assert_eq!(archive::detect_kind(&gz).unwrap(), ArchiveKind::Gzip);

    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    let bz2 = write_archive(&temp, "bz2.dat", &encoder.finish().unwrap());
    assert_eq!(archive::detect_kind(&bz2).unwrap(), ArchiveKind::Bzip2);

    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(&tar_bytes).unwrap();
    let xz = write_archive(&temp, "xz.dat", &encoder.finish().unwrap());
    assert_eq!(archive::detect_kind(&xz).unwrap(), ArchiveKind::Xz);
}

#[test]
fn compressed_listing_matches_plain() {
    let temp = tempfile::tempdir().unwrap();
    let tar_bytes = build_tar(&[("a.pdb", b"alpha"), ("b.pdb", b"beta")]);

    let plain = write_archive(&temp, "input.tar", &tar_bytes);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    let gz = write_archive(&temp, "input.tar.gz", &encoder.finish().unwrap());

    let plain_members = archive::list_members(&plain).unwrap();
    let gz_members = archive::list_members(&gz).unwrap();
    assert_eq!(plain_members.len(), gz_members.len());
    for (a, b) in plain_members.iter().zip(&gz_members) {
        assert_eq!(a.path, b.path);
        assert_eq!(a.size, b.size);
        assert_eq!(a.index, b.index);
    }
}

#[test]
fn read_members_skips_to_assigned_subset() {
    let temp = tempfile::tempdir().unwrap();
    let tar_bytes = build_tar(&[
        ("a.pdb", b"alpha"),
        ("b.pdb", b"beta"),
        ("c.pdb", b"gamma"),
        ("d.pdb", b"delta"),
    ]);
    let path = write_archive(&temp, "input.tar", &tar_bytes);

    let members = archive::list_members(&path).unwrap();
    let assigned = [members[1].clone(), members[3].clone()];

    let mut seen = Vec::new();
    archive::read_members(&path, &assigned, |member, content| {
        seen.push((member.path.clone(), content.unwrap()));
    });

    assert_eq!(
        seen,
        vec![
            (b"b.pdb".to_vec(), b"beta".to_vec()),
            (b"d.pdb".to_vec(), b"delta".to_vec()),
        ]
    );
}

#[test]
fn read_members_reports_vanished_members() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_archive(
        &temp,
        "input.tar",
        &build_tar(&[("a.pdb", b"alpha"), ("b.pdb", b"beta")]),
    );
    let members = archive::list_members(&path).unwrap();

    // The archive is replaced between listing and read.
    fs::write(
        path.as_std_path(),
        build_tar(&[("z.pdb", b"something else")]),
    )
    .unwrap();

    let mut outcomes = Vec::new();
    archive::read_members(&path, &members, |member, content| {
        outcomes.push((member.path.clone(), content));
    });

    assert_eq!(outcomes.len(), 2);
    assert_matches!(&outcomes[0].1, Err(TarKvError::MemberMissing(_)));
    assert_matches!(&outcomes[1].1, Err(TarKvError::MemberMissing(_)));
}
