use std::sync::Arc;
use tauri::{AppHandle, EventId, Listener, Runtime, Wry};
use tracing::{debug, warn};

// App events raised by native menus or the frontend
pub const OPEN_DIRECTORY: &str = "journal://open-directory";
pub const NEW_ENTRY: &str = "journal://new-entry";
pub const SAVE: &str = "journal://save";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    OpenDirectory(String),
    NewEntry(Option<String>),
    Save,
}

/// Listeners for the external open-directory / new-entry / save triggers.
///
/// Registering twice gives two independent handles; dropping a handle removes
/// exactly the listeners it registered.
pub struct TriggerSubscription<R: Runtime = Wry> {
    app: AppHandle<R>,
    ids: Vec<EventId>,
}

impl<R: Runtime> TriggerSubscription<R> {
    pub fn register<F>(app: &AppHandle<R>, on_trigger: F) -> Self
    where
        F: Fn(Trigger) + Send + Sync + 'static,
    {
        let on_trigger = Arc::new(on_trigger);

        let handler = Arc::clone(&on_trigger);
        let open = app.listen_any(OPEN_DIRECTORY, move |event| {
            match serde_json::from_str::<String>(event.payload()) {
                Ok(path) => handler(Trigger::OpenDirectory(path)),
                Err(err) => warn!(error = %err, "open-directory trigger without a path"),
            }
        });

        let handler = Arc::clone(&on_trigger);
        let new_entry = app.listen_any(NEW_ENTRY, move |event| {
            let title = serde_json::from_str::<Option<String>>(event.payload())
                .ok()
                .flatten();
            handler(Trigger::NewEntry(title));
        });

        let handler = on_trigger;
        let save = app.listen_any(SAVE, move |_| handler(Trigger::Save));

        debug!("journal triggers registered");
        Self {
            app: app.clone(),
            ids: vec![open, new_entry, save],
        }
    }
}

impl<R: Runtime> Drop for TriggerSubscription<R> {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.app.unlisten(id);
        }
        debug!("journal triggers released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tauri::test::mock_app;
    use tauri::Emitter;

    fn recorder() -> (Arc<Mutex<Vec<Trigger>>>, impl Fn(Trigger) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |trigger| sink.lock().unwrap().push(trigger))
    }

    #[test]
    fn test_triggers_are_decoded() {
        let app = mock_app();
        let (seen, record) = recorder();
        let _subscription = TriggerSubscription::register(app.handle(), record);

        app.emit(OPEN_DIRECTORY, "/journal").unwrap();
        app.emit(NEW_ENTRY, "Trip").unwrap();
        app.emit(NEW_ENTRY, ()).unwrap();
        app.emit(SAVE, ()).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Trigger::OpenDirectory("/journal".into()),
                Trigger::NewEntry(Some("Trip".into())),
                Trigger::NewEntry(None),
                Trigger::Save,
            ]
        );
    }

    #[test]
    fn test_open_directory_without_path_is_ignored() {
        let app = mock_app();
        let (seen, record) = recorder();
        let _subscription = TriggerSubscription::register(app.handle(), record);

        app.emit(OPEN_DIRECTORY, ()).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_releases_only_its_own_listeners() {
        let app = mock_app();
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        let first_subscription = TriggerSubscription::register(app.handle(), first);
        let _second_subscription = TriggerSubscription::register(app.handle(), second);

        app.emit(SAVE, ()).unwrap();
        drop(first_subscription);
        app.emit(SAVE, ()).unwrap();
        app.emit(OPEN_DIRECTORY, "/journal").unwrap();

        assert_eq!(*first_seen.lock().unwrap(), vec![Trigger::Save]);
        assert_eq!(
            *second_seen.lock().unwrap(),
            vec![
                Trigger::Save,
                Trigger::Save,
                Trigger::OpenDirectory("/journal".into()),
            ]
        );
    }
}
