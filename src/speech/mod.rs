//! Speech collaborators.
//!
//! Synthesis engines live outside this crate. The dispatcher drives a
//! `SpeechEngine` (blocking `speak`). Engines that instead produce audio
//! (`SpeechRenderer`) are adapted by `RenderedSpeech`, which hands each
//! artifact to the host for playback.

mod command;

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::mpsc;

pub use command::CommandSpeech;

/// Blocking speech engine. Called from the dispatcher worker only.
pub trait SpeechEngine: Send {
    fn name(&self) -> &'static str;

    /// Speak `text`, returning once playback (or hand-off) has finished.
    fn speak(&mut self, text: &str) -> Result<()>;

    /// Release engine resources. Called once, when the worker exits.
    fn release(&mut self) {}
}

/// Playable audio produced by a renderer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioArtifact {
    File(PathBuf),
    Bytes { mime: String, data: Vec<u8> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedAudio {
    pub text: String,
    pub artifact: AudioArtifact,
}

/// Pure text-to-audio renderer.
pub trait SpeechRenderer: Send {
    fn name(&self) -> &'static str;

    fn render(&mut self, text: &str) -> Result<AudioArtifact>;
}

/// Adapts a `SpeechRenderer` to `SpeechEngine` by forwarding each rendered
/// artifact to the host through a channel.
pub struct RenderedSpeech<R> {
    renderer: R,
    outbox: mpsc::Sender<RenderedAudio>,
}

impl<R: SpeechRenderer> RenderedSpeech<R> {
    pub fn new(renderer: R) -> (Self, mpsc::Receiver<RenderedAudio>) {
        let (outbox, inbox) = mpsc::channel();
        (Self { renderer, outbox }, inbox)
    }
}

impl<R: SpeechRenderer> SpeechEngine for RenderedSpeech<R> {
    fn name(&self) -> &'static str {
        self.renderer.name()
    }

    fn speak(&mut self, text: &str) -> Result<()> {
        let artifact = self.renderer.render(text)?;
        self.outbox
            .send(RenderedAudio {
                text: text.to_string(),
                artifact,
            })
            .map_err(|_| anyhow!("rendered audio receiver dropped"))
    }
}

/// Writes announcements to the log instead of a speaker.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSpeech;

impl SpeechEngine for LogSpeech {
    fn name(&self) -> &'static str {
        "log"
    }

    fn speak(&mut self, text: &str) -> Result<()> {
        log::info!("speak: {}", text);
        Ok(())
    }
}

impl<T: SpeechEngine + ?Sized> SpeechEngine for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn speak(&mut self, text: &str) -> Result<()> {
        (**self).speak(text)
    }

    fn release(&mut self) {
        (**self).release()
    }
}
