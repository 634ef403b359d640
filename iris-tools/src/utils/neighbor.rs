/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::cmp::Ordering;

//////////////
// Neighbor //
//////////////

/// A candidate base vector and its distance to a query.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Neighbor {
    /// The base vector id.
    pub id: u32,

    /// Squared Euclidean distance from the query.
    pub distance: f32,
}

impl Neighbor {
    pub fn new(id: u32, distance: f32) -> Self {
        Self { id, distance }
    }

    /// Total order used for ranking: ascending distance, ties broken by the lower id.
    pub fn rank(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

///////////////////
// NeighborQueue //
///////////////////

/// A bounded list of the best neighbors seen so far, kept sorted by [`Neighbor::rank`].
///
/// Insertion is a binary search plus a shift, which is cheap for the small capacities
/// (K ≤ a few hundred) used for ground truth.
#[derive(Debug, Clone)]
pub struct NeighborQueue {
    capacity: usize,
    items: Vec<Neighbor>,
}

impl NeighborQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    /// Offers a candidate. It is kept only if it ranks among the best `capacity` seen.
    pub fn insert(&mut self, nbr: Neighbor) {
        if self.capacity == 0 {
            return;
        }
        if self.is_full() {
            match self.items.last() {
                Some(worst) if nbr.rank(worst) == Ordering::Less => {}
                _ => return,
            }
        }

        let index = self
            .items
            .partition_point(|item| item.rank(&nbr) == Ordering::Less);
        if self.is_full() {
            self.items.pop();
        }
        self.items.insert(index, nbr);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// The currently worst retained neighbor.
    pub fn worst(&self) -> Option<&Neighbor> {
        self.items.last()
    }

    pub fn as_slice(&self) -> &[Neighbor] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Neighbor> {
        self.items
    }
}
