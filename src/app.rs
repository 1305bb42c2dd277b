use anyhow::Result;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tauri::{AppHandle, Emitter, Manager, RunEvent, State};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::gateway::FsGateway;
use crate::session::{JournalController, SessionEvent, SessionView};
use crate::settings::SettingsStore;
use crate::triggers::{Trigger, TriggerSubscription};
use crate::watcher::DirectoryWatcher;

// Frontend event carrying every SessionEvent
const SESSION_EVENT: &str = "journal-event";

// App state
pub struct AppState {
    pub settings: SettingsStore,
    pub journal: AsyncMutex<JournalController<FsGateway>>,
    pub watcher: Mutex<Option<DirectoryWatcher>>,
    pub triggers: Mutex<Option<TriggerSubscription>>,
}

// Get settings file path
fn get_settings_path(app: &AppHandle) -> Result<PathBuf> {
    let app_data = app.path().app_data_dir()?;
    std::fs::create_dir_all(&app_data)?;
    Ok(app_data.join("settings.json"))
}

/// Points the journal at `path`. On success the folder is remembered (when
/// `remember` is set) and the directory watcher is restarted on it.
async fn open_directory(app: &AppHandle, path: String, remember: bool) -> SessionView {
    let state = app.state::<AppState>();
    let mut journal = state.journal.lock().await;

    if journal.select_directory(&path).await {
        if remember {
            if let Err(err) = state.settings.set_journal_folder(&path) {
                warn!(error = %err, "could not persist journal folder");
            }
        }
        start_watching(app, Path::new(&path));
    }
    journal.view()
}

async fn save_active(app: &AppHandle) -> SessionView {
    let state = app.state::<AppState>();
    let mut journal = state.journal.lock().await;
    journal.save().await;
    journal.view()
}

async fn create_new_entry(app: &AppHandle, title: Option<String>) -> SessionView {
    let state = app.state::<AppState>();
    let mut journal = state.journal.lock().await;
    journal
        .create_entry(title.as_deref(), Local::now().date_naive())
        .await;
    journal.view()
}

// Runs an external trigger against the journal
fn dispatch_trigger(app: AppHandle) -> impl Fn(Trigger) + Send + Sync + 'static {
    move |trigger| {
        let app = app.clone();
        tauri::async_runtime::spawn(async move {
            match trigger {
                Trigger::OpenDirectory(path) => {
                    open_directory(&app, path, true).await;
                }
                Trigger::NewEntry(title) => {
                    create_new_entry(&app, title).await;
                }
                Trigger::Save => {
                    save_active(&app).await;
                }
            }
        });
    }
}

// Replace the directory watcher; external changes trigger a refresh
fn start_watching(app: &AppHandle, directory: &Path) {
    let state = app.state::<AppState>();
    let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

    let watcher = match DirectoryWatcher::start(directory, tx) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(directory = %directory.display(), error = %err, "journal directory not watched");
            state.watcher.lock().expect("watcher mutex").take();
            return;
        }
    };
    *state.watcher.lock().expect("watcher mutex") = Some(watcher);

    // Ends once the watcher is replaced and its sender dropped
    let handle = app.clone();
    tauri::async_runtime::spawn(async move {
        while let Some(path) = rx.recv().await {
            // Collapse a burst of changes into one rescan
            while rx.try_recv().is_ok() {}
            debug!(path = %path.display(), "refreshing after external change");
            let state = handle.state::<AppState>();
            state.journal.lock().await.refresh().await;
        }
    });
}

fn forward_events(app: AppHandle, mut events: broadcast::Receiver<SessionEvent>) {
    tauri::async_runtime::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let _ = app.emit(SESSION_EVENT, &event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session events dropped before reaching the frontend");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// Tauri commands

#[tauri::command]
fn get_journal_folder(state: State<AppState>) -> Option<String> {
    state.settings.journal_folder()
}

#[tauri::command]
async fn select_directory(app: AppHandle, path: String) -> Result<SessionView, String> {
    Ok(open_directory(&app, path, true).await)
}

#[tauri::command]
async fn get_session(state: State<'_, AppState>) -> Result<SessionView, String> {
    Ok(state.journal.lock().await.view())
}

#[tauri::command]
async fn select_entry(index: usize, state: State<'_, AppState>) -> Result<SessionView, String> {
    let mut journal = state.journal.lock().await;
    journal.select_entry(index).await;
    Ok(journal.view())
}

#[tauri::command]
async fn edit_buffer(text: String, state: State<'_, AppState>) -> Result<bool, String> {
    Ok(state.journal.lock().await.edit_buffer(text))
}

#[tauri::command]
async fn save_entry(app: AppHandle) -> Result<SessionView, String> {
    Ok(save_active(&app).await)
}

#[tauri::command]
async fn create_entry(app: AppHandle, title: Option<String>) -> Result<SessionView, String> {
    Ok(create_new_entry(&app, title).await)
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    crate::init_tracing();

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_fs::init())
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let settings = SettingsStore::open(get_settings_path(app.handle())?);
            let restored = settings.journal_folder();

            let journal = JournalController::new(FsGateway);
            forward_events(app.handle().clone(), journal.subscribe());

            app.manage(AppState {
                settings,
                journal: AsyncMutex::new(journal),
                watcher: Mutex::new(None),
                triggers: Mutex::new(Some(TriggerSubscription::register(
                    app.handle(),
                    dispatch_trigger(app.handle().clone()),
                ))),
            });

            // Restore the last journal folder
            if let Some(folder) = restored {
                info!(folder = %folder, "restoring journal folder");
                let handle = app.handle().clone();
                tauri::async_runtime::spawn(async move {
                    open_directory(&handle, folder, false).await;
                });
            }
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_journal_folder,
            select_directory,
            get_session,
            select_entry,
            edit_buffer,
            save_entry,
            create_entry,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app, event| {
            if let RunEvent::Exit = event {
                let state = app.state::<AppState>();
                state.triggers.lock().expect("triggers mutex").take();
                state.watcher.lock().expect("watcher mutex").take();
                tauri::async_runtime::block_on(async {
                    state.journal.lock().await.shutdown().await;
                });
            }
        });
}
