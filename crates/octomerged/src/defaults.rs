use camino::{Utf8Path, Utf8PathBuf};
use dirs::home_dir;

pub const DEFAULT_OCTOMERGE_HOME: &str = ".octomerge";

pub fn default_node_dir() -> Utf8PathBuf {
    if let Some(home) = home_dir().as_deref().and_then(Utf8Path::from_path) {
        return home.join(DEFAULT_OCTOMERGE_HOME);
    }

    Utf8PathBuf::default()
}
