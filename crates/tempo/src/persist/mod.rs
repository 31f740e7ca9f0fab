mod atomic_io;
mod snapshot_file;

pub use snapshot_file::{
    load_clock_snapshot, save_clock_snapshot, try_load_clock_snapshot, PersistError, SAVE_VERSION,
};
