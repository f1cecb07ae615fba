use crate::Result;
use crate::callbacks::{Callback, StepEvent};
use async_trait::async_trait;
use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::Write;
use std::sync::Mutex;

/// Writes every step event as a markdown transcript.
pub struct TranscriptLogger<W: Write + Send> {
    inner: Mutex<Transcript<W>>,
}

struct Transcript<W> {
    seen_hashes: HashSet<u64>,
    writer: W,
    step: u32,
}

impl<W: Write + Send> TranscriptLogger<W> {
    pub fn new(name: &str, mut writer: W) -> Result<Box<Self>> {
        write!(writer, "## {}\n\n", name)?;

        Ok(Box::new(Self {
            inner: Mutex::new(Transcript {
                seen_hashes: HashSet::new(),
                writer,
                step: 0,
            }),
        }))
    }

    pub fn into_inner(self) -> W {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .writer
    }
}

impl<W: Write> Transcript<W> {
    fn display_event(&mut self, event: &StepEvent<'_>) -> Result<()> {
        let origin = if event.cached { " (cached)" } else { "" };
        write!(
            self.writer,
            "### Step {}: {} `{}`{}\n\n",
            self.step, event.step, event.subject, origin
        )?;

        let mut hasher = DefaultHasher::new();
        event.artifact.hash(&mut hasher);

        if self.seen_hashes.insert(hasher.finish()) {
            write!(self.writer, "{}\n\n", event.artifact.trim_end())?;
        } else {
            write!(self.writer, "[SAME ARTIFACT AS ABOVE]\n\n")?;
        }

        write!(self.writer, "---\n")?;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> Callback for TranscriptLogger<W> {
    async fn call(&self, event: &StepEvent<'_>) -> Result<()> {
        let mut transcript = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        transcript.display_event(event)?;
        transcript.writer.flush()?;
        transcript.step += 1;

        Ok(())
    }
}
