use crate::k8s_types::K8sType;
use crate::resource::ResourceKey;

use async_trait::async_trait;
use tokio::sync::mpsc;

use std::collections::VecDeque;
use std::fmt::{self, Display};

/// A notification that the resource with the given kind and key may have changed. Events carry
/// no payload, so reconcilers always read the current state from the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub kind: &'static K8sType,
    pub key: ResourceKey,
}

impl Event {
    pub fn new(kind: &'static K8sType, key: ResourceKey) -> Event {
        Event { kind, key }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.key)
    }
}

/// Anything that delivers events to the operator. Delivery may be duplicated or reordered.
/// Returning `None` means that no more events will ever arrive.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Option<Event>;
}

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

/// Creates a bounded channel. The receiving half is an `EventSource`, and the sending half is
/// handed to whatever watches the cluster.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

#[async_trait]
impl EventSource for EventReceiver {
    async fn next_event(&mut self) -> Option<Event> {
        self.recv().await
    }
}

/// A fixed list of events, for example the keys from an initial list of resources
#[async_trait]
impl EventSource for VecDeque<Event> {
    async fn next_event(&mut self) -> Option<Event> {
        self.pop_front()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::k8s_types::core::v1::Namespace;

    #[tokio::test]
    async fn channel_source_ends_when_all_senders_are_dropped() {
        let (tx, mut rx) = event_channel(2);
        let event = Event::new(Namespace, ResourceKey::cluster_scoped("alpha"));
        tx.send(event.clone()).await.unwrap();
        drop(tx);

        assert_eq!(Some(event), rx.next_event().await);
        assert_eq!(None, rx.next_event().await);
    }

    #[tokio::test]
    async fn list_source_yields_events_in_order() {
        let a = Event::new(Namespace, ResourceKey::cluster_scoped("a"));
        let b = Event::new(Namespace, ResourceKey::cluster_scoped("b"));
        let mut source: VecDeque<Event> = vec![a.clone(), b.clone()].into();

        assert_eq!(Some(a), source.next_event().await);
        assert_eq!(Some(b), source.next_event().await);
        assert_eq!(None, source.next_event().await);
    }
}
