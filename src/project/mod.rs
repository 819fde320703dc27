//! User-authored script files

mod script_loader;

pub use script_loader::{load_scripts, script_identity};
