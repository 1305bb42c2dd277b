pub mod entry;
pub mod error;
pub mod flush;
pub mod gateway;
pub mod index;
pub mod session;
pub mod settings;
pub mod watcher;

#[cfg(feature = "desktop")]
mod app;
#[cfg(feature = "desktop")]
pub mod triggers;

#[cfg(feature = "desktop")]
pub use app::run;

pub use entry::{Entry, EntryDate, EntryView};
pub use error::JournalError;
pub use gateway::{FsGateway, Gateway};
pub use index::{build_index, JournalIndex};
pub use session::{JournalController, Phase, SessionEvent, SessionView};

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default
/// `journal_lib=info` filter; calling this more than once is harmless.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("journal_lib=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
