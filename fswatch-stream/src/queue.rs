use std::collections::VecDeque;

use crate::event::Event;

/// Unbounded FIFO between the producer callback and the consumer.
///
/// There is no backpressure: a producer that outpaces the consumer grows
/// this without limit.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: VecDeque<Event>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub(crate) fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeEvent, ChangeKind, FileName};

    fn change(name: &str) -> Event {
        Event::Change(ChangeEvent::new(ChangeKind::Change, Some(FileName::from(name))))
    }

    #[test]
    fn pops_in_push_order() {
        let mut queue = EventQueue::new();
        queue.push(change("a"));
        queue.push(change("b"));
        queue.push(Event::Close);
        assert_eq!(queue.len(), 3);

        let names: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|event| match event {
                Event::Change(c) => c.name.map(|n| n.to_string()),
                Event::Close => Some("<close>".to_owned()),
                Event::Error(_) => None,
            })
            .collect();

        assert_eq!(
            names,
            vec![Some("a".into()), Some("b".into()), Some("<close>".into())]
        );
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let mut queue = EventQueue::new();
        queue.push(change("a"));
        queue.clear();
        assert!(queue.pop().is_none());
    }
}
