use crate::{Event, EventCategory};

/// Events of one run in emission order.
///
/// Ordering is ascending by timestamp and stable, so events sharing an
/// instant keep the order they were constructed in.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Timeline {
    events: Vec<Event>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<Event>) -> Self {
        let mut timeline = Self { events };
        timeline.sort();
        timeline
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Restores timestamp order after pushes. `sort_by` is stable.
    pub fn sort(&mut self) {
        self.events
            .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Timestamp of the closing track.end, if the timeline has one.
    pub fn duration(&self) -> Option<f64> {
        self.events
            .iter()
            .rev()
            .find(|event| event.category() == EventCategory::TrackEnd)
            .map(|event| event.timestamp)
    }

    pub fn count(&self, category: EventCategory) -> usize {
        self.events
            .iter()
            .filter(|event| event.category() == category)
            .count()
    }

    pub fn of(&self, category: EventCategory) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter(move |event| event.category() == category)
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;

    #[test]
    fn sorting_is_stable_for_equal_timestamps() {
        let timeline = Timeline::from_events(vec![
            Event::new(1.0, Payload::Onset { strength: 1.0 }),
            Event::new(0.5, Payload::Beat { confidence: None }),
            Event::new(1.0, Payload::Beat { confidence: None }),
            Event::new(0.0, Payload::SilenceStart),
        ]);

        let order: Vec<_> = timeline.iter().map(Event::category).collect();
        assert_eq!(
            order,
            vec![
                EventCategory::SilenceStart,
                EventCategory::Beat,
                EventCategory::Onset,
                EventCategory::Beat
            ]
        );
    }

    #[test]
    fn duration_comes_from_track_end() {
        let mut timeline = Timeline::new();
        assert_eq!(timeline.duration(), None);
        timeline.push(Event::new(4.5, Payload::TrackEnd));
        assert_eq!(timeline.duration(), Some(4.5));
        assert_eq!(timeline.count(EventCategory::TrackEnd), 1);
    }
}
