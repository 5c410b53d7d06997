use facegate_capture::VoicePrompt;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};

/// Speaks prompts through an external text-to-speech program.
///
/// `{locale}` in the arguments is replaced with the prompt locale and the
/// text is appended last. Speech runs in the background: finished children
/// are reaped with `try_wait` before each new prompt and when the voice is
/// dropped, so the caller never waits for speech to finish.
pub struct CommandVoice {
    program: String,
    args: Vec<String>,
    pending: Mutex<Vec<Child>>,
}

impl CommandVoice {
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
            pending: Mutex::default(),
        })
    }

    fn pending(&self) -> MutexGuard<'_, Vec<Child>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Collect exited children; returns how many are still speaking.
    fn reap(&self) -> usize {
        let mut pending = self.pending();
        pending.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    tracing::debug!(pid = child.id(), %status, "voice command exited with failure");
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(pid = child.id(), error = %e, "voice command wait failed");
                false
            }
        });
        pending.len()
    }

    fn command(&self, text: &str, locale: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|a| a.replace("{locale}", locale)))
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl VoicePrompt for CommandVoice {
    fn speak(&self, text: &str, locale: &str) {
        let speaking = self.reap();
        if speaking > 0 {
            tracing::trace!(speaking, "previous prompts still speaking");
        }
        match self.command(text, locale).spawn() {
            Ok(child) => self.pending().push(child),
            Err(e) => tracing::warn!(program = %self.program, error = %e, "voice command failed to start"),
        }
    }
}

impl Drop for CommandVoice {
    fn drop(&mut self) {
        let speaking = self.reap();
        if speaking > 0 {
            tracing::debug!(speaking, "voice commands still running at shutdown");
        }
    }
}
