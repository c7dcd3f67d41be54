//! Session Persistence
//!
//! JSON load/save of the agent's system prompt and history for durable
//! resume. Saves are atomic: the file is written to a temp sibling and
//! renamed into place, with owner-only permissions.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::services::agent::orchestrator::Agent;
use crate::services::llm::types::Message;
use crate::utils::error::AppResult;

/// Persistable agent state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub system_prompt: String,
    pub history: Vec<Message>,
}

impl Agent {
    /// Save the agent's current state to a file.
    pub fn save_session(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let session = Session {
            system_prompt: self.system_prompt().to_string(),
            history: self.history().to_vec(),
        };
        let data = serde_json::to_vec_pretty(&session)?;

        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        std::fs::write(&tmp, &data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load agent state from a file, replacing the system prompt and
    /// history.
    pub fn load_session(&mut self, path: impl AsRef<Path>) -> AppResult<()> {
        let data = std::fs::read_to_string(path)?;
        let session: Session = serde_json::from_str(&data)?;
        self.set_system_prompt(session.system_prompt);
        self.replace_history(session.history);
        Ok(())
    }
}
