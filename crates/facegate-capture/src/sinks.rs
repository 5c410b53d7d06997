//! Output seams for prompts: spoken cues and on-screen status text.

/// Speaks a prompt aloud. Implementations must return without waiting for
/// the utterance to finish; the capture loop calls this between ticks.
pub trait VoicePrompt: Send + Sync {
    fn speak(&self, text: &str, locale: &str);
}

/// Receives status text for display.
pub trait StatusSink: Send + Sync {
    fn status(&self, text: &str);
}

impl<F> StatusSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn status(&self, text: &str) {
        self(text)
    }
}

/// Discards every prompt.
pub struct SilentVoice;

impl VoicePrompt for SilentVoice {
    fn speak(&self, _text: &str, _locale: &str) {}
}

/// Writes prompts to the tracing log instead of a speaker.
pub struct LogVoice;

impl VoicePrompt for LogVoice {
    fn speak(&self, text: &str, locale: &str) {
        tracing::info!(text, locale, "voice prompt");
    }
}

/// Writes status lines to the tracing log.
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn status(&self, text: &str) {
        tracing::debug!(text, "status");
    }
}
