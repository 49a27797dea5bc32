use std::collections::VecDeque;

use tokio::sync::oneshot;
use tracing::trace;

use super::state::OperationKind;
use crate::central::{CharacteristicInfo, PeripheralInfo, ServiceInfo, StackError};

/// Why a blocked caller woke up.
#[derive(Debug)]
pub(crate) enum Wake<T> {
    /// The completion event for this category arrived.
    Completed(T),
    /// The active peripheral disconnected while the call was pending.
    LinkLost(Option<StackError>),
    /// Woken by `unlock` or `reset` without a completion.
    Unlocked,
}

/// Receiving half of one pending call.
pub(crate) struct Slot<T> {
    receiver: oneshot::Receiver<Wake<T>>,
}

impl<T> Slot<T> {
    /// Blocks the calling thread until the slot is resolved.
    ///
    /// A slot discarded by `reset` reads as [`Wake::Unlocked`].
    pub(crate) fn wait(self) -> Wake<T> {
        self.receiver.blocking_recv().unwrap_or(Wake::Unlocked)
    }
}

/// FIFO of pending calls for one operation category.
pub(crate) struct Waiters<T> {
    kind: OperationKind,
    queue: VecDeque<oneshot::Sender<Wake<T>>>,
}

impl<T> Waiters<T> {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn register(&mut self) -> Slot<T> {
        let (sender, receiver) = oneshot::channel();
        self.queue.push_back(sender);
        trace!(kind = %self.kind, pending = self.queue.len(), "completion slot registered");
        Slot { receiver }
    }

    /// Resolves the oldest live waiter. Returns `false` when nobody was waiting.
    pub(crate) fn complete(&mut self, value: T) -> bool {
        self.wake_oldest(Wake::Completed(value))
    }

    fn wake_oldest(&mut self, mut wake: Wake<T>) -> bool {
        while let Some(sender) = self.queue.pop_front() {
            match sender.send(wake) {
                Ok(()) => return true,
                // Caller went away; hand the outcome to the next one.
                Err(returned) => wake = returned,
            }
        }
        false
    }

    /// Resolves every waiter with a fresh value from `make`.
    pub(crate) fn wake_all(&mut self, make: impl Fn() -> Wake<T>) -> usize {
        let mut woken = 0;
        for sender in self.queue.drain(..) {
            if sender.send(make()).is_ok() {
                woken += 1;
            }
        }
        woken
    }

    /// Forgets waiters whose caller has gone away.
    pub(crate) fn prune(&mut self) {
        self.queue.retain(|sender| !sender.is_closed());
    }

    /// Drops every waiter; their callers wake as unlocked.
    fn clear(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        discarded
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Pending blocking calls of every category.
pub(crate) struct PendingRequests {
    pub(crate) connect: Waiters<Result<PeripheralInfo, Option<StackError>>>,
    pub(crate) disconnect: Waiters<Option<StackError>>,
    pub(crate) services: Waiters<Result<Vec<ServiceInfo>, StackError>>,
    pub(crate) characteristics: Waiters<Result<Vec<CharacteristicInfo>, StackError>>,
    pub(crate) configure: Waiters<Result<bool, StackError>>,
    pub(crate) write: Waiters<Result<(), StackError>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self {
            connect: Waiters::new(OperationKind::Connect),
            disconnect: Waiters::new(OperationKind::Disconnect),
            services: Waiters::new(OperationKind::DiscoverServices),
            characteristics: Waiters::new(OperationKind::DiscoverCharacteristics),
            configure: Waiters::new(OperationKind::ConfigureNotification),
            write: Waiters::new(OperationKind::WriteWithResponse),
        }
    }
}

impl PendingRequests {
    /// Number of callers blocked in `kind`.
    pub(crate) fn len(&self, kind: OperationKind) -> usize {
        match kind {
            OperationKind::Connect => self.connect.len(),
            OperationKind::Disconnect => self.disconnect.len(),
            OperationKind::DiscoverServices => self.services.len(),
            OperationKind::DiscoverCharacteristics => self.characteristics.len(),
            OperationKind::ConfigureNotification => self.configure.len(),
            OperationKind::WriteWithResponse => self.write.len(),
        }
    }

    /// Wakes every pending call of every category as unlocked.
    pub(crate) fn unlock(&mut self) -> usize {
        self.connect.wake_all(|| Wake::Unlocked)
            + self.disconnect.wake_all(|| Wake::Unlocked)
            + self.services.wake_all(|| Wake::Unlocked)
            + self.characteristics.wake_all(|| Wake::Unlocked)
            + self.configure.wake_all(|| Wake::Unlocked)
            + self.write.wake_all(|| Wake::Unlocked)
    }

    /// Resolves every GATT call as interrupted by a lost link.
    ///
    /// Disconnect waiters are left alone; the caller completes them.
    pub(crate) fn link_lost(&mut self, error: Option<&StackError>) -> usize {
        self.connect.wake_all(link_lost(error))
            + self.services.wake_all(link_lost(error))
            + self.characteristics.wake_all(link_lost(error))
            + self.configure.wake_all(link_lost(error))
            + self.write.wake_all(link_lost(error))
    }

    /// Discards every pending call without resolving it.
    pub(crate) fn clear(&mut self) -> usize {
        self.connect.clear()
            + self.disconnect.clear()
            + self.services.clear()
            + self.characteristics.clear()
            + self.configure.clear()
            + self.write.clear()
    }
}

fn link_lost<T>(error: Option<&StackError>) -> impl Fn() -> Wake<T> + '_ {
    move || Wake::LinkLost(error.cloned())
}
