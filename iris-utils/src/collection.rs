/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! In-memory and memory-mapped vector collections.
//!
//! A [`VectorCollection`] keeps vectors in their on-disk record layout: every record is a
//! header word holding the dimensionality followed by `dim` elements. Keeping the headers
//! means a collection (or any subset of its records) can be written back without any
//! re-encoding, and a memory map of a file is already a valid collection.
//!
//! The backing buffer is shared, so [`VectorCollection::prefix`] views the leading
//! records of a collection without copying them.

use std::sync::Arc;

use memmap2::Mmap;

use crate::{
    element::VecElement,
    error::{IrisError, IrisResult},
};

/// Backing buffer of a [`VectorCollection`]. It may hold more records than the
/// collection exposes.
#[derive(Debug, Clone)]
pub enum Storage<T> {
    /// Records fully materialized in memory.
    Owned(Arc<Vec<T>>),
    /// Records paged in on demand from a read-only file mapping.
    Mapped(Arc<Mmap>),
}

/// `len` vectors of dimensionality `dim`, read-only once constructed.
#[derive(Debug, Clone)]
pub struct VectorCollection<T: VecElement> {
    storage: Storage<T>,
    dim: usize,
    len: usize,
}

impl<T: VecElement> VectorCollection<T> {
    /// Builds an owned collection from tightly packed vector data (no headers).
    pub fn from_flat(dim: usize, data: &[T]) -> IrisResult<Self> {
        if dim == 0 {
            return Err(IrisError::invalid_parameter(
                "vector dimensionality must be positive",
            ));
        }
        if data.len() % dim != 0 {
            return Err(IrisError::invalid_parameter(format!(
                "{} values do not split into vectors of dimension {}",
                data.len(),
                dim
            )));
        }

        let len = data.len() / dim;
        check_count(len)?;
        let header = T::from_header(dim as u32);
        let mut words = Vec::with_capacity(len * (dim + 1));
        for vector in data.chunks_exact(dim) {
            words.push(header);
            words.extend_from_slice(vector);
        }

        Ok(Self {
            storage: Storage::Owned(Arc::new(words)),
            dim,
            len,
        })
    }

    /// Builds an owned collection from individual vectors, all of length `dim`.
    pub fn from_rows<'a, I>(dim: usize, rows: I) -> IrisResult<Self>
    where
        I: IntoIterator<Item = &'a [T]>,
    {
        let mut data = Vec::new();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dim {
                return Err(IrisError::dimension_mismatch(
                    format!("row {i}"),
                    dim,
                    row.len(),
                ));
            }
            data.extend_from_slice(row);
        }
        Self::from_flat(dim, &data)
    }

    /// Wraps already validated storage. Callers guarantee that the buffer holds at least
    /// `len` records of `dim + 1` words.
    pub(crate) fn from_storage(storage: Storage<T>, dim: usize, len: usize) -> Self {
        Self { storage, dim, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of words per record, header included.
    pub fn stride(&self) -> usize {
        self.dim + 1
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    /// Size of the serialized collection in bytes.
    pub fn size_in_bytes(&self) -> u64 {
        (self.len * self.stride() * std::mem::size_of::<T>()) as u64
    }

    fn words(&self) -> &[T] {
        let words: &[T] = match &self.storage {
            Storage::Owned(words) => words.as_slice(),
            // The mapping length and alignment were checked when it was wrapped.
            Storage::Mapped(mmap) => bytemuck::cast_slice(&mmap[..]),
        };
        &words[..self.len * self.stride()]
    }

    /// The serialized form of the whole collection.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.words())
    }

    /// The first `len` vectors, sharing this collection's buffer.
    pub fn prefix(&self, len: usize) -> IrisResult<Self> {
        if len > self.len {
            return Err(IrisError::invalid_parameter(format!(
                "cannot take {len} vectors from a collection of {}",
                self.len
            )));
        }
        Ok(Self {
            storage: self.storage.clone(),
            dim: self.dim,
            len,
        })
    }

    /// The elements of vector `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`.
    pub fn vector(&self, i: usize) -> &[T] {
        let start = i * self.stride() + 1;
        &self.words()[start..start + self.dim]
    }

    /// The full record of vector `i`, header included.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`.
    pub fn record(&self, i: usize) -> &[T] {
        let start = i * self.stride();
        &self.words()[start..start + self.stride()]
    }

    pub fn get(&self, i: usize) -> Option<&[T]> {
        (i < self.len).then(|| self.vector(i))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[T]> + '_ {
        self.words()
            .chunks_exact(self.stride())
            .map(|record| &record[1..])
    }

    /// Copies the selected vectors, in the given order, into a new owned collection.
    pub fn gather(&self, ids: &[u32]) -> IrisResult<Self> {
        let mut words = Vec::with_capacity(ids.len() * self.stride());
        for &id in ids {
            let id = id as usize;
            if id >= self.len {
                return Err(IrisError::invalid_parameter(format!(
                    "vector id {id} is out of range for a collection of {} vectors",
                    self.len
                )));
            }
            words.extend_from_slice(self.record(id));
        }

        Ok(Self {
            storage: Storage::Owned(Arc::new(words)),
            dim: self.dim,
            len: ids.len(),
        })
    }
}

/// Vector ids are `u32`, so a collection may hold at most `u32::MAX` vectors.
pub(crate) fn check_count(len: usize) -> IrisResult<()> {
    if len as u64 > u32::MAX as u64 {
        return Err(IrisError::invalid_parameter(format!(
            "{len} vectors exceed the u32 id space"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> VectorCollection<f32> {
        VectorCollection::from_flat(2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap()
    }

    #[test]
    fn from_flat_lays_out_records() {
        let c = small();
        assert_eq!(c.len(), 3);
        assert_eq!(c.dim(), 2);
        assert_eq!(c.stride(), 3);
        assert!(!c.is_mapped());
        assert_eq!(c.vector(1), &[3.0, 4.0]);
        assert_eq!(c.record(2)[0].to_bits(), 2);
        assert_eq!(c.record(2)[1..], [5.0, 6.0]);
        assert_eq!(c.size_in_bytes(), 36);
        assert_eq!(c.as_bytes().len(), 36);
        assert!(c.get(3).is_none());
    }

    #[test]
    fn from_flat_rejects_bad_shapes() {
        assert!(VectorCollection::<f32>::from_flat(0, &[]).is_err());
        assert!(VectorCollection::<f32>::from_flat(3, &[1.0, 2.0]).is_err());
        let empty = VectorCollection::<i32>::from_flat(4, &[]).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.iter().count(), 0);
    }

    #[test]
    fn from_rows_checks_every_row() {
        let rows: Vec<&[i32]> = vec![&[1, 2], &[3]];
        let err = VectorCollection::from_rows(2, rows).unwrap_err();
        assert!(matches!(err, IrisError::DimensionMismatch { found: 1, .. }));
    }

    #[test]
    fn gather_preserves_requested_order() {
        let c = small();
        let g = c.gather(&[2, 0]).unwrap();
        let rows: Vec<&[f32]> = g.iter().collect();
        assert_eq!(rows, vec![&[5.0, 6.0][..], &[1.0, 2.0][..]]);
        assert!(c.gather(&[3]).is_err());
    }

    #[test]
    fn prefix_shares_the_buffer() {
        let c = small();
        let p = c.prefix(2).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.vector(1), &[3.0, 4.0]);
        assert_eq!(p.as_bytes(), &c.as_bytes()[..24]);
        assert_eq!(p.iter().count(), 2);
        assert_eq!(p.size_in_bytes(), 24);
        match (p.storage(), c.storage()) {
            (Storage::Owned(a), Storage::Owned(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected owned storage"),
        }

        assert!(c.prefix(3).is_ok());
        let err = c.prefix(4).unwrap_err();
        assert!(matches!(err, IrisError::InvalidParameter(_)));
    }
}
