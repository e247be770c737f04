//! Authoritative per-node, per-group unit ledger.
//!
//! Every increment and decrement happens under one mutex, so concurrent
//! reservations can never oversell a node. The routing side only ever sees a
//! copy of these levels (see [`Inventory::apply_to`]).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use lifeline_core::{BloodGroup, NodeId};

use crate::error::InventoryError;
use crate::store::LocationGraph;

type Levels = HashMap<(NodeId, BloodGroup), u32>;

/// Units taken out of the ledger and not yet committed or returned.
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    pub node_id: NodeId,
    pub blood_group: BloodGroup,
    pub units: u32,
}

#[derive(Debug, Default)]
pub struct Inventory {
    levels: Mutex<Levels>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the ledger from the stock recorded in a graph snapshot.
    pub fn from_graph(graph: &LocationGraph) -> Self {
        let mut levels = Levels::new();
        for node in graph.nodes.values() {
            for (group, units) in &node.stock {
                levels.insert((node.id.clone(), *group), *units);
            }
        }
        Self {
            levels: Mutex::new(levels),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Levels>, InventoryError> {
        self.levels
            .lock()
            .map_err(|e| InventoryError::LockPoisoned(format!("inventory ledger: {e}")))
    }

    pub fn level(&self, node_id: &str, group: BloodGroup) -> Result<u32, InventoryError> {
        let levels = self.lock()?;
        Ok(levels.get(&(node_id.to_string(), group)).copied().unwrap_or(0))
    }

    /// Atomically check and decrement. Fails without touching the ledger
    /// when fewer than `units` are on hand.
    pub fn reserve(
        &self,
        node_id: &str,
        group: BloodGroup,
        units: u32,
    ) -> Result<Reservation, InventoryError> {
        let mut levels = self.lock()?;
        let key = (node_id.to_string(), group);
        let available = levels.get(&key).copied().unwrap_or(0);
        if available < units {
            return Err(InventoryError::Insufficient {
                node_id: node_id.to_string(),
                blood_group: group,
                requested: units,
                available,
            });
        }
        levels.insert(key, available - units);
        Ok(Reservation {
            node_id: node_id.to_string(),
            blood_group: group,
            units,
        })
    }

    /// Return reserved units to the ledger.
    pub fn release(&self, reservation: Reservation) -> Result<(), InventoryError> {
        let mut levels = self.lock()?;
        let entry = levels
            .entry((reservation.node_id, reservation.blood_group))
            .or_insert(0);
        *entry = entry.saturating_add(reservation.units);
        Ok(())
    }

    /// Overwrite a level (external inventory update).
    pub fn set_level(
        &self,
        node_id: &str,
        group: BloodGroup,
        units: u32,
    ) -> Result<(), InventoryError> {
        let mut levels = self.lock()?;
        levels.insert((node_id.to_string(), group), units);
        Ok(())
    }

    /// Copy of `graph` carrying the ledger's current levels as node stock.
    pub fn apply_to(&self, graph: &LocationGraph) -> Result<LocationGraph, InventoryError> {
        let levels = self.lock()?;
        let mut copy = graph.clone();
        for node in copy.nodes.values_mut() {
            node.stock.clear();
        }
        for ((node_id, group), units) in levels.iter() {
            if let Some(node) = copy.nodes.get_mut(node_id) {
                node.stock.insert(*group, *units);
            }
        }
        Ok(copy)
    }

    pub fn total_units(&self) -> Result<u64, InventoryError> {
        let levels = self.lock()?;
        Ok(levels.values().map(|u| u64::from(*u)).sum())
    }
}
