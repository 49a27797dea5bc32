use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, instrument, trace};
use uuid::Uuid;

use super::channel::{Notification, NotificationChannel};
use crate::error::BleError;

/// Maps application-chosen keys to notification channels and fans incoming values out to them.
///
/// Each channel has a single intended reader. A value for a characteristic is
/// copied into every channel subscribed to it.
#[derive(Debug, Default)]
pub struct NotificationRegistry {
    channels: Mutex<HashMap<String, Arc<NotificationChannel>>>,
}

impl NotificationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel for `key` watching exactly `characteristics`.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::DuplicateKey`] if `key` is already registered; the
    /// existing channel is left untouched.
    #[instrument(skip(self, characteristics), level = "debug", fields(%key))]
    pub fn register(
        &self,
        key: &str,
        characteristics: impl IntoIterator<Item = Uuid>,
    ) -> Result<(), BleError> {
        let mut channels = self.channels();
        if channels.contains_key(key) {
            return Err(BleError::DuplicateKey {
                key: key.to_string(),
            });
        }
        let characteristics = characteristics.into_iter().collect();
        channels.insert(
            key.to_string(),
            Arc::new(NotificationChannel::new(key.to_string(), characteristics)),
        );
        debug!(channel_count = channels.len(), "notification channel registered");
        Ok(())
    }

    /// Removes the channel for `key`, waking its blocked reader with [`BleError::NoData`].
    ///
    /// # Errors
    ///
    /// Returns [`BleError::UnknownKey`] if `key` is not registered.
    #[instrument(skip(self), level = "debug")]
    pub fn unregister(&self, key: &str) -> Result<(), BleError> {
        let channel = self
            .channels()
            .remove(key)
            .ok_or_else(|| unknown_key(key))?;
        channel.close();
        Ok(())
    }

    /// Wakes the blocked reader of `key` without data.
    ///
    /// With no reader waiting the cancel is latched: queued items are still
    /// served, then the next read on the empty queue returns [`BleError::NoData`].
    ///
    /// # Errors
    ///
    /// Returns [`BleError::UnknownKey`] if `key` is not registered.
    #[instrument(skip(self), level = "debug")]
    pub fn cancel_read(&self, key: &str) -> Result<(), BleError> {
        self.channel(key)?.cancel();
        Ok(())
    }

    /// Drops everything queued for `key` and returns how many items were dropped.
    ///
    /// The channel stays registered and blocked readers stay blocked.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::UnknownKey`] if `key` is not registered.
    #[instrument(skip(self), level = "debug")]
    pub fn reset_read(&self, key: &str) -> Result<usize, BleError> {
        Ok(self.channel(key)?.reset())
    }

    /// Blocks until an item arrives for `key`, then returns up to `max_count`
    /// items in arrival order.
    ///
    /// # Errors
    ///
    /// - [`BleError::UnknownKey`] if `key` is not registered.
    /// - [`BleError::Timeout`] if nothing arrived within `timeout`.
    /// - [`BleError::NoData`] if the read was cancelled or the key unregistered.
    #[instrument(skip(self), level = "debug", fields(timeout = %humantime::format_duration(timeout)))]
    pub fn read(
        &self,
        key: &str,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<Notification>, BleError> {
        let channel = self.channel(key)?;
        channel.read(max_count, timeout)
    }

    /// Copies one characteristic value into every channel watching it.
    ///
    /// Returns the number of channels that received it.
    pub fn dispatch(&self, characteristic: Uuid, payload: &[u8]) -> usize {
        let subscribed: Vec<Arc<NotificationChannel>> = self
            .channels()
            .values()
            .filter(|channel| channel.watches(characteristic))
            .cloned()
            .collect();

        let delivered = subscribed
            .iter()
            .filter(|channel| channel.push(Notification::new(characteristic, payload.to_vec())))
            .count();
        trace!(%characteristic, payload_len = payload.len(), delivered, "notification dispatched");
        delivered
    }

    /// Unregisters every channel and returns how many were removed.
    #[instrument(skip(self), level = "debug")]
    pub fn reset_all(&self) -> usize {
        let removed: Vec<Arc<NotificationChannel>> =
            self.channels().drain().map(|(_key, channel)| channel).collect();
        for channel in &removed {
            channel.close();
        }
        debug!(removed = removed.len(), "notification registry reset");
        removed.len()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.channels().contains_key(key)
    }

    /// Returns the registered keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.channels().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of items waiting in `key`'s queue.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::UnknownKey`] if `key` is not registered.
    pub fn queued(&self, key: &str) -> Result<usize, BleError> {
        Ok(self.channel(key)?.queued())
    }

    fn channel(&self, key: &str) -> Result<Arc<NotificationChannel>, BleError> {
        self.channels()
            .get(key)
            .cloned()
            .ok_or_else(|| unknown_key(key))
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, Arc<NotificationChannel>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unknown_key(key: &str) -> BleError {
    BleError::UnknownKey {
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    const LEVEL: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb);
    const RX: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);

    #[test]
    fn duplicate_registration_is_rejected_and_keeps_original_subscription() {
        let registry = NotificationRegistry::new();
        registry.register("battery", [LEVEL]).expect("first registration");

        let result = registry.register("battery", [RX]);

        assert_matches!(result, Err(BleError::DuplicateKey { key }) if key == "battery");
        assert_eq!(1, registry.dispatch(LEVEL, &[0x64]));
        assert_eq!(0, registry.dispatch(RX, &[0x01]));
    }

    #[test]
    fn dispatch_ignores_unwatched_characteristics() {
        let registry = NotificationRegistry::new();
        registry.register("uart", [RX]).expect("registration");

        assert_eq!(0, registry.dispatch(LEVEL, &[0x64]));
        assert_eq!(Some(0), registry.queued("uart").ok());
    }

    #[test]
    fn operations_on_unknown_keys_fail() {
        let registry = NotificationRegistry::new();

        assert_matches!(registry.unregister("ghost"), Err(BleError::UnknownKey { .. }));
        assert_matches!(registry.cancel_read("ghost"), Err(BleError::UnknownKey { .. }));
        assert_matches!(registry.reset_read("ghost"), Err(BleError::UnknownKey { .. }));
        assert_matches!(
            registry.read("ghost", 1, Duration::from_millis(1)),
            Err(BleError::UnknownKey { .. })
        );
    }

    #[test]
    fn keys_are_sorted() {
        let registry = NotificationRegistry::new();
        registry.register("uart", [RX]).expect("registration");
        registry.register("battery", [LEVEL]).expect("registration");

        assert_eq!(vec!["battery".to_string(), "uart".to_string()], registry.keys());
    }
}
