//! A simulated party: a [`Client`] connected to a [`MemoryRelay`] with a
//! background task pumping relay events into it.
//!
//! Actions and per-event errors produced by the pump are queued so a test or
//! scenario can wait for specific outcomes.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use kemlink_client::{Client, ClientAction, ClientConfig, ClientError};
use kemlink_core::Environment;
use kemlink_crypto::Kem;
use kemlink_proto::PeerName;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    error::HarnessError,
    relay::{Inbox, MemoryRelay},
};

/// Outcome of handling one relay event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// An action the client produced
    Action(ClientAction),
    /// The event was rejected
    Error(ClientError),
}

/// Client plus event pump.
pub struct Party<E: Environment> {
    client: Arc<Client<E>>,
    observed: mpsc::UnboundedReceiver<Observed>,
    backlog: VecDeque<Observed>,
    pump: JoinHandle<()>,
}

impl<E: Environment> Party<E> {
    /// Register `name` on the relay, start the event pump and publish the
    /// party's public key.
    ///
    /// # Errors
    ///
    /// - `Transport` if the name is taken
    /// - `Client` if key generation fails
    pub async fn join(
        relay: &MemoryRelay<E>,
        name: &PeerName,
        env: E,
        kem: Arc<dyn Kem>,
        config: ClientConfig,
    ) -> Result<Self, HarnessError> {
        let (handle, inbox) = relay.register(name)?;
        let client = Arc::new(Client::new(name.clone(), env, kem, Arc::new(handle), config)?);

        let (tx, observed) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(Arc::clone(&client), inbox, tx));

        client.publish_identity().await?;
        Ok(Self { client, observed, backlog: VecDeque::new(), pump })
    }

    /// The party's client.
    pub fn client(&self) -> &Arc<Client<E>> {
        &self.client
    }

    /// The party's name.
    pub fn name(&self) -> &PeerName {
        self.client.name()
    }

    /// Wait up to `timeout` for an action matching `pred`.
    ///
    /// Non-matching outcomes stay queued for later waits.
    pub async fn wait_for<F>(&mut self, timeout: Duration, mut pred: F) -> Option<ClientAction>
    where
        F: FnMut(&ClientAction) -> bool,
    {
        let position = self
            .backlog
            .iter()
            .position(|o| matches!(o, Observed::Action(action) if pred(action)));
        if let Some(Observed::Action(action)) = position.and_then(|i| self.backlog.remove(i)) {
            return Some(action);
        }

        let backlog = &mut self.backlog;
        let observed = &mut self.observed;
        let search = async {
            while let Some(outcome) = observed.recv().await {
                match outcome {
                    Observed::Action(action) if pred(&action) => return Some(action),
                    other => backlog.push_back(other),
                }
            }
            None
        };
        tokio::time::timeout(timeout, search).await.ok().flatten()
    }

    /// Like [`Party::wait_for`], failing with `Timeout` naming `expected`.
    ///
    /// # Errors
    ///
    /// - `Timeout` if no matching action arrives
    pub async fn expect<F>(
        &mut self,
        timeout: Duration,
        expected: &str,
        pred: F,
    ) -> Result<ClientAction, HarnessError>
    where
        F: FnMut(&ClientAction) -> bool,
    {
        self.wait_for(timeout, pred).await.ok_or_else(|| HarnessError::Timeout {
            party: self.client.name().to_string(),
            expected: expected.to_string(),
        })
    }

    /// Everything observed so far and not yet consumed by a wait.
    pub fn drain(&mut self) -> Vec<Observed> {
        while let Ok(outcome) = self.observed.try_recv() {
            self.backlog.push_back(outcome);
        }
        self.backlog.drain(..).collect()
    }

    /// Errors observed so far; other outcomes stay queued.
    pub fn take_errors(&mut self) -> Vec<ClientError> {
        let (errors, rest): (Vec<_>, Vec<_>) =
            self.drain().into_iter().partition(|o| matches!(o, Observed::Error(_)));
        self.backlog.extend(rest);
        errors
            .into_iter()
            .filter_map(|o| match o {
                Observed::Error(e) => Some(e),
                Observed::Action(_) => None,
            })
            .collect()
    }
}

impl<E: Environment> Drop for Party<E> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump<E: Environment>(
    client: Arc<Client<E>>,
    mut inbox: Inbox,
    observed: mpsc::UnboundedSender<Observed>,
) {
    while let Some(event) = inbox.recv().await {
        let kind = event.name();
        match client.handle_event(event).await {
            Ok(actions) => {
                for action in actions {
                    if observed.send(Observed::Action(action)).is_err() {
                        return;
                    }
                }
            },
            Err(e) => {
                tracing::warn!(party = %client.name(), event = kind, error = %e, "event rejected");
                if observed.send(Observed::Error(e)).is_err() {
                    return;
                }
            },
        }
    }
    tracing::debug!(party = %client.name(), "relay connection closed");
}
