/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Read and write vectors in the `.fvecs` / `.ivecs` format.
//!
//! The format has no file header. Every record is:
//! - `dim` (u32 LE)
//! - `dim` elements of `T` (4 bytes each, LE)
//!
//! All records of a valid file share the same `dim`.

use std::{
    fs::File,
    io::{BufWriter, Read, Seek, Write},
    path::Path,
    sync::Arc,
};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{
    collection::{Storage, VectorCollection},
    element::VecElement,
    error::{IrisError, IrisResult},
};

/// Largest file [`read`] materializes in memory unless told otherwise: 64 GiB.
pub const DEFAULT_IN_MEMORY_LIMIT: u64 = 64 * 1024 * 1024 * 1024;

const WORD_SIZE: u64 = 4;

/// How a vector file is brought into memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Always materialize with [`read`].
    InMemory,
    /// Always map with [`read_mapped`].
    Mapped,
    /// Materialize when the file fits under the in-memory limit, map otherwise.
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    dim: usize,
    len: usize,
}

impl Layout {
    fn new(path: &Path, file_len: u64, first_word: [u8; 4]) -> IrisResult<Self> {
        let dim = u32::from_le_bytes(first_word) as u64;
        if dim == 0 {
            return Err(IrisError::format(
                path,
                "first record declares dimensionality 0",
            ));
        }

        let record_bytes = WORD_SIZE * (dim + 1);
        if file_len % record_bytes != 0 {
            return Err(IrisError::format(
                path,
                format!(
                    "file length {file_len} is not a multiple of the record size {record_bytes} \
                     implied by dimensionality {dim}"
                ),
            ));
        }

        let len = file_len / record_bytes;
        if len > u32::MAX as u64 {
            return Err(IrisError::format(
                path,
                format!("{len} records exceed the u32 id space"),
            ));
        }

        Ok(Self {
            dim: dim as usize,
            len: len as usize,
        })
    }

    fn stride(&self) -> usize {
        self.dim + 1
    }
}

fn check_not_truncated(path: &Path, file_len: u64) -> IrisResult<()> {
    if file_len == 0 {
        return Err(IrisError::format(path, "file is empty"));
    }
    if file_len < WORD_SIZE {
        return Err(IrisError::format(path, "file is shorter than one header"));
    }
    Ok(())
}

fn check_headers<T: VecElement>(
    path: &Path,
    words: &[T],
    layout: Layout,
    records: impl IntoIterator<Item = usize>,
) -> IrisResult<()> {
    for i in records {
        let found = words[i * layout.stride()].header();
        if found as usize != layout.dim {
            return Err(IrisError::format(
                path,
                format!(
                    "record {i} declares dimensionality {found}, expected {}",
                    layout.dim
                ),
            ));
        }
    }
    Ok(())
}

/// Fully materializes a vector file, refusing files over [`DEFAULT_IN_MEMORY_LIMIT`].
pub fn read<T: VecElement>(path: impl AsRef<Path>) -> IrisResult<VectorCollection<T>> {
    read_with_limit(path, DEFAULT_IN_MEMORY_LIMIT)
}

/// Fully materializes a vector file, refusing files larger than `limit` bytes.
///
/// Every record header is validated.
pub fn read_with_limit<T: VecElement>(
    path: impl AsRef<Path>,
    limit: u64,
) -> IrisResult<VectorCollection<T>> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    check_not_truncated(path, file_len)?;

    let mut first_word = [0u8; 4];
    file.read_exact(&mut first_word)?;
    let layout = Layout::new(path, file_len, first_word)?;

    let out_of_memory = || IrisError::OutOfMemory {
        path: path.display().to_string(),
        required: file_len,
        limit,
    };
    if file_len > limit {
        return Err(out_of_memory());
    }

    let num_words = (file_len / WORD_SIZE) as usize;
    let mut words: Vec<T> = Vec::new();
    words
        .try_reserve_exact(num_words)
        .map_err(|_| out_of_memory())?;
    words.resize(num_words, <T as bytemuck::Zeroable>::zeroed());

    file.rewind()?;
    file.read_exact(bytemuck::cast_slice_mut(&mut words))?;
    check_headers(path, &words, layout, 0..layout.len)?;

    debug!(
        path = %path.display(),
        num_vectors = layout.len,
        dim = layout.dim,
        "loaded vector file into memory"
    );
    Ok(VectorCollection::from_storage(
        Storage::Owned(Arc::new(words)),
        layout.dim,
        layout.len,
    ))
}

/// Maps a vector file read-only. Only the first and last record headers are validated.
pub fn read_mapped<T: VecElement>(path: impl AsRef<Path>) -> IrisResult<VectorCollection<T>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    check_not_truncated(path, file_len)?;

    // SAFETY: the mapping is read-only and lives as long as the collection. Callers must
    // not truncate or rewrite the file while the collection is in use.
    let mmap = unsafe { Mmap::map(&file)? };
    let first_word = [mmap[0], mmap[1], mmap[2], mmap[3]];
    let layout = Layout::new(path, file_len, first_word)?;

    let words: &[T] = bytemuck::try_cast_slice(&mmap[..])
        .map_err(|err| IrisError::format(path, format!("unaligned mapping: {err}")))?;
    check_headers(path, words, layout, [0, layout.len - 1])?;

    debug!(
        path = %path.display(),
        num_vectors = layout.len,
        dim = layout.dim,
        "mapped vector file"
    );
    Ok(VectorCollection::from_storage(
        Storage::Mapped(Arc::new(mmap)),
        layout.dim,
        layout.len,
    ))
}

/// Loads a vector file according to `mode`.
pub fn load<T: VecElement>(
    path: impl AsRef<Path>,
    mode: LoadMode,
    limit: u64,
) -> IrisResult<VectorCollection<T>> {
    let path = path.as_ref();
    match mode {
        LoadMode::InMemory => read_with_limit(path, limit),
        LoadMode::Mapped => read_mapped(path),
        LoadMode::Auto => {
            let file_len = std::fs::metadata(path)?.len();
            if file_len > limit {
                debug!(
                    path = %path.display(),
                    file_len,
                    limit,
                    "file exceeds the in-memory limit, mapping it"
                );
                read_mapped(path)
            } else {
                read_with_limit(path, limit)
            }
        }
    }
}

/// Writes a whole collection. Returns the number of bytes written.
pub fn write<T: VecElement>(
    path: impl AsRef<Path>,
    collection: &VectorCollection<T>,
) -> IrisResult<u64> {
    write_atomically(path, |writer| {
        writer.write_all(collection.as_bytes())?;
        Ok(())
    })?;
    Ok(collection.size_in_bytes())
}

/// Writes the records selected by `ids`, in that order, straight from the source
/// collection. Returns the number of bytes written.
pub fn write_records<T: VecElement>(
    path: impl AsRef<Path>,
    collection: &VectorCollection<T>,
    ids: &[u32],
) -> IrisResult<u64> {
    if let Some(&id) = ids.iter().find(|&&id| id as usize >= collection.len()) {
        return Err(IrisError::invalid_parameter(format!(
            "vector id {id} is out of range for a collection of {} vectors",
            collection.len()
        )));
    }

    write_atomically(path, |writer| {
        for &id in ids {
            writer.write_all(bytemuck::cast_slice(collection.record(id as usize)))?;
        }
        Ok(())
    })?;
    Ok((ids.len() * collection.stride() * std::mem::size_of::<T>()) as u64)
}

/// Runs `f` against a buffered temporary file next to `path` and renames the file onto
/// `path` only if `f` succeeds. A failed or interrupted write never leaves a partial
/// file under the final name.
pub fn write_atomically<R, F>(path: impl AsRef<Path>, f: F) -> IrisResult<R>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> IrisResult<R>,
{
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    let result = {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let result = f(&mut writer)?;
        writer.flush()?;
        result
    };
    tmp.persist(path).map_err(|err| IrisError::Io(err.error))?;
    Ok(result)
}
