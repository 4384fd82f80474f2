pub mod bootstrap;
pub mod common;
pub mod completions;
pub mod export;
pub mod ops;
pub mod record;
pub mod state;
pub mod sync;
pub mod watch;
