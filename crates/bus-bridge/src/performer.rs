//! Host Action Performer
//!
//! Runs signal actions on a Linux host. Shell commands go through `sh -c`,
//! root key events through `su -c input keyevent`; actions that only make
//! sense on a handset (volume, media keys, intents, automation tasks) are
//! reported as unsupported.

use async_trait::async_trait;
use signal_processor::{Action, ActionError, ActionPerformer};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct HostActionPerformer;

impl HostActionPerformer {
    async fn run(&self, program: &str, args: &[&str]) -> Result<(), ActionError> {
        debug!("Running {} {:?}", program, args);

        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| ActionError::Failed(format!("{}: {}", program, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(ActionError::Failed(format!("{} exited with {}", program, status)))
        }
    }
}

#[async_trait]
impl ActionPerformer for HostActionPerformer {
    async fn perform_action(&self, spec: &str) -> Result<(), ActionError> {
        match Action::parse(spec)? {
            Action::Alert(text) => {
                self.alert(&text);
                Ok(())
            }
            Action::Shell(command) => self.run("sh", &["-c", &command]).await,
            Action::RootButton(keycode) => {
                let command = format!("input keyevent {}", keycode);
                self.run("su", &["-c", &command]).await
            }
            Action::Volume { .. }
            | Action::MediaButton(_)
            | Action::Intent { .. }
            | Action::Tasker { .. } => Err(ActionError::Unsupported(spec.to_string())),
        }
    }

    fn alert(&self, text: &str) {
        warn!("ALERT: {}", text);
    }
}
