pub mod tmux;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Snapshot of the pane a notification was fired from
///
/// Captured once per notify call and replayed later purely as data. The pane
/// may no longer exist by the time it is replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TmuxContext {
    /// tmux binary used for the query, reused for replay
    pub tmux_bin: String,
    pub socket_path: String,
    #[serde(rename = "clientTTY")]
    pub client_tty: String,
    pub session_name: String,
    pub window_id: String,
    pub window_index: u32,
    pub pane_id: String,
    pub pane_index: u32,
    pub pane_current_command: String,
}

/// Narrow interface over the terminal multiplexer
pub trait Multiplexer {
    /// Read the coordinates of `target_pane` (or the current pane)
    fn query_context(&self, target_pane: Option<&str>) -> Result<TmuxContext>;

    /// Switch client, window and pane back to `context`
    fn focus(&self, context: &TmuxContext) -> Result<()>;
}

pub use self::tmux::TmuxMultiplexer;
