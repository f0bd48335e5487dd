//! Fixed Connection Slot Pool
//!
//! All connection records are allocated once, when the server starts. Slot
//! indices move between a free list and an active list; together the two
//! lists always cover every slot exactly once.
//!
//! When the free list is empty the server stops accepting, and new peers wait
//! in the kernel's listen backlog until a slot is reaped.

use crate::connection::handler::Connection;
use crate::connection::request::ConnectionId;
use std::net::SocketAddr;

/// Fixed-capacity arena of [`Connection`] slots.
pub struct ConnectionPool<T> {
    slots: Box<[Connection<T>]>,
    /// Free slot indices; the next slot handed out is at the end.
    free: Vec<usize>,
    /// Active slot indices in accept order.
    active: Vec<usize>,
    next_generation: u64,
}

impl<T> ConnectionPool<T> {
    /// Allocates `capacity` slots, each with a receive buffer of
    /// `recv_buffer_size` bytes.
    pub fn new(capacity: usize, recv_buffer_size: usize) -> Self {
        let slots: Vec<Connection<T>> = (0..capacity)
            .map(|slot| Connection::vacant(slot, recv_buffer_size))
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            // Reversed so the lowest index is handed out first
            free: (0..capacity).rev().collect(),
            active: Vec::with_capacity(capacity),
            next_generation: 1,
        }
    }

    /// Places `transport` in a free slot, or returns `None` when every slot is
    /// in use (the transport is dropped, closing it).
    pub fn acquire(&mut self, transport: T, peer: Option<SocketAddr>) -> Option<ConnectionId> {
        let index = self.free.pop()?;
        let generation = self.next_generation;
        self.next_generation += 1;

        let conn = &mut self.slots[index];
        conn.open(transport, peer, generation);
        let id = conn.id();
        self.active.push(index);

        debug_assert_eq!(self.free.len() + self.active.len(), self.slots.len());
        Some(id)
    }

    /// Returns the slot at `position` in the active list to the free list.
    ///
    /// The connection must be closed and fully drained.
    pub(crate) fn release_at(&mut self, position: usize) -> ConnectionId {
        let index = self.active.remove(position);
        let conn = &mut self.slots[index];
        debug_assert!(conn.is_reapable(), "released a connection still in use");

        let id = conn.id();
        conn.reset();
        self.free.push(index);

        debug_assert_eq!(self.free.len() + self.active.len(), self.slots.len());
        id
    }

    /// The connection at `position` in the active list.
    pub(crate) fn active_mut(&mut self, position: usize) -> &mut Connection<T> {
        let index = self.active[position];
        &mut self.slots[index]
    }

    /// Iterates over active connections in accept order.
    pub fn active(&self) -> impl Iterator<Item = &Connection<T>> + '_ {
        self.active.iter().map(move |&index| &self.slots[index])
    }

    /// Looks up an active connection, ignoring stale ids from earlier
    /// occupants of the same slot.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection<T>> {
        self.position_of(id).map(|position| &self.slots[self.active[position]])
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<T>> {
        let position = self.position_of(id)?;
        let index = self.active[position];
        Some(&mut self.slots[index])
    }

    fn position_of(&self, id: ConnectionId) -> Option<usize> {
        let position = self.active.iter().position(|&index| index == id.slot)?;
        (self.slots[id.slot].id() == id).then_some(position)
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
