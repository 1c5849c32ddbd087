// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory coil/register storage shared by server connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, RwLock};

use crate::frame::{Address, Coil, Quantity, Word};

/// Default capacity of each array, matching the full 16-bit address space.
pub const DEFAULT_CAPACITY: usize = 0x10000;

/// The only failure mode a [`DataBank`] operation can report: an access
/// outside the fixed capacity established at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadAddress;

/// Identifies who triggered a mutation, for inclusion in [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The mutation was made by the embedding application, not a wire write.
    Internal,
    /// The mutation was made by a client connected from this peer address.
    Remote(SocketAddr),
}

/// Which wire-writable array changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Coils,
    Holding,
}

/// A single change notification, emitted synchronously after the mutation
/// that produced it commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub address: Address,
    pub values: ChangeValues,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeValues {
    Coils(Vec<Coil>),
    Holding(Vec<Word>),
}

/// An opaque handle returned by [`DataBank::subscribe`], used to cancel a
/// subscription again. Holding a token does not keep the subscription's
/// receiver alive, and the [`DataBank`] never holds a strong reference back
/// to a subscriber: subscribers only see a channel, never the bank itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionToken(u64);

struct Subscriber {
    token: SubscriptionToken,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

/// Four independently-lockable arrays (coils, discrete inputs, holding
/// registers, input registers) with change notifications on the two
/// wire-writable arrays.
///
/// Arrays never resize after construction; every address is validated
/// against the capacity fixed at creation time.
pub struct DataBank {
    coils: RwLock<Vec<Coil>>,
    discrete_inputs: RwLock<Vec<Coil>>,
    holding_registers: RwLock<Vec<Word>>,
    input_registers: RwLock<Vec<Word>>,
    subscribers: StdMutex<Vec<Subscriber>>,
    next_token: AtomicU64,
}

impl std::fmt::Debug for DataBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBank").finish_non_exhaustive()
    }
}

impl Default for DataBank {
    fn default() -> Self {
        Self::new()
    }
}

impl DataBank {
    /// Creates a bank with the default capacity (`0x10000`) for every array.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(
            DEFAULT_CAPACITY,
            DEFAULT_CAPACITY,
            DEFAULT_CAPACITY,
            DEFAULT_CAPACITY,
        )
    }

    /// Creates a bank with an explicit, fixed capacity for each array.
    #[must_use]
    pub fn with_capacity(
        coils: usize,
        discrete_inputs: usize,
        holding_registers: usize,
        input_registers: usize,
    ) -> Self {
        Self {
            coils: RwLock::new(vec![false; coils]),
            discrete_inputs: RwLock::new(vec![false; discrete_inputs]),
            holding_registers: RwLock::new(vec![0; holding_registers]),
            input_registers: RwLock::new(vec![0; input_registers]),
            subscribers: StdMutex::new(Vec::new()),
            next_token: AtomicU64::new(0),
        }
    }

    pub async fn get_coils(&self, start: Address, qty: Quantity) -> Result<Vec<Coil>, BadAddress> {
        get_range(&self.coils, start, qty).await
    }

    pub async fn get_discrete_inputs(
        &self,
        start: Address,
        qty: Quantity,
    ) -> Result<Vec<Coil>, BadAddress> {
        get_range(&self.discrete_inputs, start, qty).await
    }

    pub async fn get_holding_registers(
        &self,
        start: Address,
        qty: Quantity,
    ) -> Result<Vec<Word>, BadAddress> {
        get_range(&self.holding_registers, start, qty).await
    }

    pub async fn get_input_registers(
        &self,
        start: Address,
        qty: Quantity,
    ) -> Result<Vec<Word>, BadAddress> {
        get_range(&self.input_registers, start, qty).await
    }

    pub async fn set_coils(
        &self,
        start: Address,
        values: &[Coil],
        origin: Origin,
    ) -> Result<(), BadAddress> {
        set_range(&self.coils, start, values).await?;
        self.notify(ChangeEvent {
            kind: ChangeKind::Coils,
            address: start,
            values: ChangeValues::Coils(values.to_vec()),
            origin,
        });
        Ok(())
    }

    pub async fn set_discrete_inputs(&self, start: Address, values: &[Coil]) -> Result<(), BadAddress> {
        set_range(&self.discrete_inputs, start, values).await
    }

    pub async fn set_holding_registers(
        &self,
        start: Address,
        values: &[Word],
        origin: Origin,
    ) -> Result<(), BadAddress> {
        set_range(&self.holding_registers, start, values).await?;
        self.notify(ChangeEvent {
            kind: ChangeKind::Holding,
            address: start,
            values: ChangeValues::Holding(values.to_vec()),
            origin,
        });
        Ok(())
    }

    pub async fn set_input_registers(&self, start: Address, values: &[Word]) -> Result<(), BadAddress> {
        set_range(&self.input_registers, start, values).await
    }

    /// Subscribes to change notifications, returning a token for
    /// [`unsubscribe`](Self::unsubscribe) and the receiving end of the
    /// channel.
    pub fn subscribe(&self) -> (SubscriptionToken, mpsc::UnboundedReceiver<ChangeEvent>) {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Subscriber { token, sender });
        (token, receiver)
    }

    /// Cancels a subscription. A no-op if the token is unknown or the
    /// subscriber already dropped its receiver.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|s| s.token != token);
    }

    fn notify(&self, event: ChangeEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|s| s.sender.send(event.clone()).is_ok());
    }
}

async fn get_range<T: Copy>(
    array: &RwLock<Vec<T>>,
    start: Address,
    qty: Quantity,
) -> Result<Vec<T>, BadAddress> {
    let array = array.read().await;
    let start = start as usize;
    let end = start + qty as usize;
    array.get(start..end).map(<[T]>::to_vec).ok_or(BadAddress)
}

async fn set_range<T: Copy>(
    array: &RwLock<Vec<T>>,
    start: Address,
    values: &[T],
) -> Result<(), BadAddress> {
    let mut array = array.write().await;
    let start = start as usize;
    let end = start + values.len();
    let slice = array.get_mut(start..end).ok_or(BadAddress)?;
    slice.copy_from_slice(values);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_after_write_holding_registers() {
        let bank = DataBank::with_capacity(8, 8, 8, 8);
        bank.set_holding_registers(2, &[44, 55], Origin::Internal)
            .await
            .unwrap();
        let values = bank.get_holding_registers(2, 2).await.unwrap();
        assert_eq!(values, vec![44, 55]);
    }

    #[tokio::test]
    async fn out_of_bounds_read_is_bad_address() {
        let bank = DataBank::with_capacity(100, 8, 8, 8);
        assert_eq!(bank.get_coils(95, 10).await, Err(BadAddress));
    }

    #[tokio::test]
    async fn set_coils_emits_change_event_with_origin() {
        let bank = DataBank::with_capacity(16, 16, 16, 16);
        let (_token, mut rx) = bank.subscribe();
        bank.set_coils(10, &[true], Origin::Internal).await.unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Coils);
        assert_eq!(event.address, 10);
        assert_eq!(event.origin, Origin::Internal);
    }

    #[tokio::test]
    async fn set_discrete_inputs_does_not_notify() {
        let bank = DataBank::with_capacity(16, 16, 16, 16);
        let (_token, mut rx) = bank.subscribe();
        bank.set_discrete_inputs(0, &[true]).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_notifications() {
        let bank = DataBank::with_capacity(16, 16, 16, 16);
        let (token, mut rx) = bank.subscribe();
        bank.unsubscribe(token);
        bank.set_coils(0, &[true], Origin::Internal).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
