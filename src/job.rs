//! Document jobs and their page units.

use crate::config::OutputFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Page-local payload of a [`PageUnit`].
#[derive(Clone)]
pub enum PagePayload {
    /// A page image, PNG-encoded and base64-wrapped for the wire.
    Image { png_base64: String },
    /// Text already extracted from the source format.
    Text(String),
}

impl PagePayload {
    pub fn is_text(&self) -> bool {
        matches!(self, PagePayload::Text(_))
    }
}

impl fmt::Debug for PagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagePayload::Image { png_base64 } => f
                .debug_struct("Image")
                .field("base64_len", &png_base64.len())
                .finish(),
            PagePayload::Text(t) => f.debug_tuple("Text").field(&t.len()).finish(),
        }
    }
}

/// Smallest unit of inference work: one page or slide.
#[derive(Debug, Clone)]
pub struct PageUnit {
    /// 0-based; defines final ordering.
    pub index: usize,
    pub payload: PagePayload,
}

impl PageUnit {
    pub fn image(index: usize, png_base64: String) -> Self {
        Self {
            index,
            payload: PagePayload::Image { png_base64 },
        }
    }

    pub fn text(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            payload: PagePayload::Text(text.into()),
        }
    }
}

/// Lifecycle of a [`DocumentJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// One extraction request in flight: the fingerprint it is keyed by, its
/// page units in order and where it stands.
///
/// Page units are owned by the job; the dispatch engine consumes them.
#[derive(Debug)]
pub struct DocumentJob {
    pub fingerprint: String,
    pub filename: String,
    pub format: OutputFormat,
    pub prompt: String,
    pub units: Vec<PageUnit>,
    status: JobStatus,
}

impl DocumentJob {
    pub fn new(
        fingerprint: impl Into<String>,
        filename: impl Into<String>,
        format: OutputFormat,
        prompt: impl Into<String>,
        units: Vec<PageUnit>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            filename: filename.into(),
            format,
            prompt: prompt.into(),
            units,
            status: JobStatus::Pending,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn total_pages(&self) -> usize {
        self.units.len()
    }

    /// Move to `next`. Terminal states are sticky.
    pub fn transition(&mut self, next: JobStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        let mut job = DocumentJob::new("fp", "a.pdf", OutputFormat::Markdown, "p", vec![]);
        assert_eq!(job.status(), JobStatus::Pending);
        job.transition(JobStatus::Running);
        job.transition(JobStatus::Failed);
        job.transition(JobStatus::Done);
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn payload_debug_hides_content() {
        let unit = PageUnit::image(0, "A".repeat(1000));
        let shown = format!("{:?}", unit);
        assert!(shown.contains("base64_len"));
        assert!(shown.len() < 200);
        assert!(PageUnit::text(1, "hi").payload.is_text());
    }
}
