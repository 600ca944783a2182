/* src/lib.rs */

// Modules shared by the binary and the tests
pub mod console;
pub mod control;
pub mod error;
pub mod history;
pub mod logger;
pub mod parse;
pub mod pipeline;
pub mod processor;
pub mod runtime;
pub mod signals;
pub mod state;
pub mod watchdog;

// Fakes for the process, spawner and console seams, also used by tests/
#[doc(hidden)]
pub mod test_helpers;

pub use console::{Console, Terminal};
pub use control::{Interrupt, ProcessHandle, Shutdown};
pub use error::ProxyError;
pub use processor::{Color, LineContext, LineProcessor, LineType, ProcessedLine};
pub use runtime::{CommandLine, Outcome, ProcessSpawner, Settings, Supervisor, TokioSpawner};
pub use state::{RestartPolicy, SharedState};
