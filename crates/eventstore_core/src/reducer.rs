use crate::{Event, EventStoreResult};

/// Receives the events of a query one by one, in query order.
///
/// Returning an error stops the query and is handed back to its caller.
pub trait Reducer {
    fn reduce(&mut self, event: Event) -> EventStoreResult<()>;
}

impl<F> Reducer for F
where
    F: FnMut(Event) -> EventStoreResult<()>,
{
    fn reduce(&mut self, event: Event) -> EventStoreResult<()> {
        self(event)
    }
}

/// Collects every reduced event.
#[derive(Clone, Debug, Default)]
pub struct EventCollector {
    pub events: Vec<Event>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl Reducer for EventCollector {
    fn reduce(&mut self, event: Event) -> EventStoreResult<()> {
        self.events.push(event);
        Ok(())
    }
}
