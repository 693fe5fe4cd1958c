/**
 * maild SMTP receiving daemon
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
**/

/// An event which can be dispatched by an [`EventBus`]
pub trait BusEvent {
    /// discriminant used to route the event to its subscribers
    type Kind: Copy + Eq + std::hash::Hash + std::fmt::Debug;

    ///
    fn kind(&self) -> Self::Kind;
}

/// Callback invoked on the publisher's task
pub type Handler<E> = std::sync::Arc<dyn Fn(&E) + Send + Sync>;

/// Returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Synchronous publish/subscribe register.
///
/// Handlers run on the publisher's task, in subscription order. The list of
/// handlers is copied before dispatch, so a handler can publish, subscribe or
/// unsubscribe without deadlocking.
pub struct EventBus<E: BusEvent> {
    next_token: std::sync::atomic::AtomicU64,
    #[allow(clippy::type_complexity)]
    handlers: std::sync::Mutex<
        std::collections::HashMap<E::Kind, Vec<(SubscriptionToken, Handler<E>)>>,
    >,
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            next_token: std::sync::atomic::AtomicU64::new(0),
            handlers: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl<E: BusEvent> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.lock();
        f.debug_struct("EventBus")
            .field(
                "handlers",
                &handlers
                    .iter()
                    .map(|(kind, list)| (kind, list.len()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<E: BusEvent> EventBus<E> {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::type_complexity)]
    fn lock(
        &self,
    ) -> std::sync::MutexGuard<
        '_,
        std::collections::HashMap<E::Kind, Vec<(SubscriptionToken, Handler<E>)>>,
    > {
        // handlers never run under the lock, a poisoned map is still consistent
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register `handler` for every event of `kind`
    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> SubscriptionToken
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let token = SubscriptionToken(
            self.next_token
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        );
        self.lock()
            .entry(kind)
            .or_default()
            .push((token, std::sync::Arc::new(handler)));
        token
    }

    /// Remove a handler, returns false if the token was unknown for this kind
    pub fn unsubscribe(&self, kind: E::Kind, token: SubscriptionToken) -> bool {
        match self.lock().get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(t, _)| *t != token);
                before != list.len()
            }
            None => false,
        }
    }

    /// Invoke every handler currently subscribed to the event's kind
    pub fn publish(&self, event: &E) {
        let snapshot = self
            .lock()
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect::<Vec<_>>())
            .unwrap_or_default();

        for handler in snapshot {
            handler(event);
        }
    }

    /// number of handlers for `kind`
    #[must_use]
    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }
}
