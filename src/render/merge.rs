//! Folding secondary results into the primary accumulation buffer.

use super::worker::Mailbox;
use crate::device::RenderDevice;
use crate::util::Result;

/// Merges published partial results into the primary device.
///
/// Runs on the driving thread only. Each mailbox is taken-and-cleared, so a
/// publish is merged at most once.
#[derive(Debug, Default)]
pub struct AccumulationMerger {
    merges: u64,
    merged_samples: u64,
}

impl AccumulationMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every pending result. Returns how many were merged.
    pub fn merge<'a>(
        &mut self,
        primary: &mut dyn RenderDevice,
        mailboxes: impl IntoIterator<Item = &'a Mailbox>,
    ) -> Result<usize> {
        let mut merged = 0;
        for mailbox in mailboxes {
            let Some(result) = mailbox.take() else {
                continue;
            };
            primary.write_staging(&result.pixels)?;
            primary.accumulate_staging()?;
            merged += 1;
            self.merged_samples += u64::from(result.samples);
        }
        self.merges += merged as u64;
        Ok(merged)
    }

    /// Total results merged since creation.
    pub fn merges(&self) -> u64 {
        self.merges
    }

    /// Sum of the sample counts carried by merged results.
    pub fn merged_samples(&self) -> u64 {
        self.merged_samples
    }
}
