/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

/// A 4-byte element stored in a `.fvecs` or `.ivecs` file.
///
/// Both formats share one record layout, a little-endian `u32` dimensionality followed
/// by that many elements, so the header word of every record is reinterpreted through
/// [`VecElement::from_header`] and [`VecElement::header`].
pub trait VecElement:
    bytemuck::Pod + Copy + Send + Sync + PartialEq + std::fmt::Debug + 'static
{
    /// File extension used for collections of this element type.
    const EXTENSION: &'static str;

    /// Reinterprets a dimensionality header as an element slot.
    fn from_header(dim: u32) -> Self;

    /// Reinterprets an element slot as a dimensionality header.
    fn header(self) -> u32;

    fn as_f32(self) -> f32;
}

impl VecElement for f32 {
    const EXTENSION: &'static str = "fvecs";

    fn from_header(dim: u32) -> Self {
        f32::from_bits(dim)
    }

    fn header(self) -> u32 {
        self.to_bits()
    }

    fn as_f32(self) -> f32 {
        self
    }
}

impl VecElement for i32 {
    const EXTENSION: &'static str = "ivecs";

    fn from_header(dim: u32) -> Self {
        dim as i32
    }

    fn header(self) -> u32 {
        self as u32
    }

    fn as_f32(self) -> f32 {
        self as f32
    }
}

/// Squared Euclidean distance between two vectors of equal length.
#[inline]
pub fn squared_l2<T: VecElement>(a: &[T], b: &[T]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x.as_f32() - y.as_f32();
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_survive_reinterpretation() {
        assert_eq!(f32::from_header(128).header(), 128);
        assert_eq!(i32::from_header(100).header(), 100);
        assert_eq!(i32::from_header(100), 100);
    }

    #[test]
    fn squared_l2_matches_hand_computation() {
        assert_eq!(squared_l2(&[0.0f32, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_l2(&[1i32, 2, 3], &[1, 2, 3]), 0.0);
        assert_eq!(squared_l2(&[-1i32], &[2]), 9.0);
    }
}
