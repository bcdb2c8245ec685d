use anyhow::{anyhow, Context, Result};
use std::process::{Command, Stdio};

use super::SpeechEngine;

/// Speaks through an external text-to-speech program (espeak, say, ...).
///
/// The text is passed as the final operand after `--`, so recognized text
/// starting with `-` is never parsed as an option. `speak` blocks until the
/// program exits.
#[derive(Clone, Debug)]
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `say` on macOS, `espeak -s 150` elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("say", vec![])
        } else {
            Self::new("espeak", vec!["-s".into(), "150".into()])
        }
    }
}

impl SpeechEngine for CommandSpeech {
    fn name(&self) -> &'static str {
        "command"
    }

    fn speak(&mut self, text: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg("--")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .with_context(|| format!("spawn speech program {}", self.program))?;
        if !status.success() {
            return Err(anyhow!("speech program {} exited with {}", self.program, status));
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn exit_status_is_checked() {
        assert!(CommandSpeech::new("true", vec![]).speak("hello").is_ok());
        assert!(CommandSpeech::new("false", vec![]).speak("hello").is_err());
    }

    #[test]
    fn leading_dash_text_is_an_operand() {
        // `ls -d` would succeed; `ls -- -d` looks for a file named "-d".
        let mut engine = CommandSpeech::new("ls", vec![]);
        assert!(engine.speak("-d").is_err());
    }

    #[test]
    fn missing_program_is_an_error() {
        let mut engine = CommandSpeech::new("walkbuddy-no-such-tts", vec![]);
        assert!(engine.speak("hello").is_err());
    }
}
