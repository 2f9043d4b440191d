//! Default on-disk location for engine state, grounded on the data-dir
//! resolution the teacher crate uses for its own canonical storage root.

use std::path::PathBuf;

/// `{data_dir}/agenterm` (e.g. `~/.local/share/agenterm` on Linux,
/// `~/Library/Application Support/agenterm` on macOS). Falls back to
/// `.agenterm` under the current directory if the platform data dir cannot
/// be resolved (e.g. a minimal container with no `HOME`).
pub fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|base| base.join("agenterm"))
        .unwrap_or_else(|| PathBuf::from(".agenterm"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ends_in_agenterm_or_falls_back() {
        let dir = default_state_dir();
        let name = dir.file_name().and_then(|n| n.to_str());
        assert!(name == Some("agenterm") || dir == PathBuf::from(".agenterm"));
    }
}
