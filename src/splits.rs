// Shardmap is an open source distributed word-count engine.
// Copyright (C) 2024 Shardmap contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Split inventory and the offline input-chunking tool. Pure byte I/O,
//! independent of the execution engine.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MANIFEST_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// All regular files in `dir`, sorted by path. Roster order plus this
/// ordering makes split assignment deterministic across runs.
pub fn list_splits(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    Ok(files)
}

fn write_chunks<R: Read>(
    mut reader: R,
    dst_dir: &Path,
    chunk_size: u64,
    index: &mut usize,
    name: impl Fn(usize) -> String,
) -> io::Result<()> {
    let mut buf = vec![0u8; chunk_size as usize];

    loop {
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        *index += 1;
        let mut out = File::create(dst_dir.join(name(*index)))?;
        out.write_all(&buf[..filled])?;
    }

    Ok(())
}

/// Chunk one file into `chunk_001`, `chunk_002`, … Returns how many
/// chunks were written.
pub fn split_file(src: &Path, dst_dir: &Path, chunk_size: u64) -> io::Result<usize> {
    std::fs::create_dir_all(dst_dir)?;

    let mut index = 0;
    write_chunks(File::open(src)?, dst_dir, chunk_size, &mut index, |i| {
        format!("chunk_{i:03}")
    })?;

    Ok(index)
}

/// Chunk every file named in a manifest (one path per line) into a single
/// shared `chunk_00001`, … sequence.
pub fn split_manifest(manifest: &Path, dst_dir: &Path, chunk_size: u64) -> io::Result<usize> {
    std::fs::create_dir_all(dst_dir)?;

    let mut index = 0;
    for line in BufReader::new(File::open(manifest)?).lines() {
        let line = line?;
        let src = line.trim();
        if src.is_empty() {
            continue;
        }
        write_chunks(File::open(src)?, dst_dir, chunk_size, &mut index, |i| {
            format!("chunk_{i:05}")
        })?;
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_is_sorted_and_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b"), "b").unwrap();
        std::fs::write(dir.path().join("a"), "a").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let splits = list_splits(dir.path()).unwrap();
        assert_eq!(splits, vec![dir.path().join("a"), dir.path().join("b")]);
    }

    #[test]
    fn chunks_reassemble_to_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("input");
        let payload: Vec<u8> = (0..1000u32).flat_map(|i| i.to_le_bytes()).collect();
        std::fs::write(&src, &payload).unwrap();

        let dst = dir.path().join("chunks");
        let written = split_file(&src, &dst, 1024).unwrap();
        assert_eq!(written, 4);

        let mut reassembled = Vec::new();
        for chunk in list_splits(&dst).unwrap() {
            reassembled.extend(std::fs::read(chunk).unwrap());
        }
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn manifest_splitting_numbers_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::write(&first, vec![1u8; 300]).unwrap();
        std::fs::write(&second, vec![2u8; 100]).unwrap();

        let manifest = dir.path().join("manifest");
        std::fs::write(
            &manifest,
            format!("{}\n\n{}\n", first.display(), second.display()),
        )
        .unwrap();

        let dst = dir.path().join("chunks");
        let written = split_manifest(&manifest, &dst, 200).unwrap();
        assert_eq!(written, 3);
        assert!(dst.join("chunk_00001").exists());
        assert!(dst.join("chunk_00003").exists());
        assert_eq!(std::fs::read(dst.join("chunk_00003")).unwrap(), vec![2u8; 100]);
    }

    #[test]
    fn empty_source_writes_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty");
        std::fs::write(&src, b"").unwrap();

        let written = split_file(&src, &dir.path().join("chunks"), 64).unwrap();
        assert_eq!(written, 0);
    }
}
