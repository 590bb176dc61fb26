//! Observer fan-out with muting
//!
//! Multi-step operations (link chains, `go_to_state`, serialization repair)
//! mute the notifier while they step through the stacks and emit one
//! combined notification at the end. Mutes nest.

use timeline_core::{CommandSummary, HistoryEvent, HistoryObserver};

#[derive(Default)]
pub(crate) struct Notifier {
    observer: Option<Box<dyn HistoryObserver>>,
    muted: u32,
}

impl Notifier {
    pub(crate) fn set_observer(&mut self, observer: Box<dyn HistoryObserver>) {
        self.observer = Some(observer);
    }

    pub(crate) fn take_observer(&mut self) -> Option<Box<dyn HistoryObserver>> {
        self.observer.take()
    }

    pub(crate) fn mute(&mut self) {
        self.muted += 1;
    }

    pub(crate) fn unmute(&mut self) {
        self.muted = self.muted.saturating_sub(1);
    }

    pub(crate) fn emit(&mut self, event: HistoryEvent) {
        if self.muted > 0 {
            return;
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
    }

    /// History-changed followed by scene-changed
    pub(crate) fn changed(&mut self, summary: Option<CommandSummary>) {
        self.emit(HistoryEvent::HistoryChanged(summary));
        self.emit(HistoryEvent::SceneChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeline_core::EventRecorder;

    #[test]
    fn test_nested_mute() {
        let recorder = EventRecorder::new();
        let mut notifier = Notifier::default();
        notifier.set_observer(Box::new(recorder.clone()));

        notifier.mute();
        notifier.mute();
        notifier.emit(HistoryEvent::SceneChanged);
        notifier.unmute();
        notifier.emit(HistoryEvent::SceneChanged);
        notifier.unmute();
        notifier.changed(None);

        assert_eq!(
            recorder.events(),
            vec![HistoryEvent::HistoryChanged(None), HistoryEvent::SceneChanged]
        );
    }

    #[test]
    fn test_emit_without_observer() {
        let mut notifier = Notifier::default();
        notifier.emit(HistoryEvent::ExecuteStart);
        assert!(notifier.take_observer().is_none());
    }
}
