//! Single-line progress bar, redrawn in place.

use std::io::Write;

use skiff_core::Progress;

const WIDTH: usize = 50;

pub struct ProgressBar<W: Write> {
    out: W,
    drawn: bool,
}

impl<W: Write> ProgressBar<W> {
    pub fn new(out: W) -> Self {
        Self { out, drawn: false }
    }

    pub fn update(&mut self, progress: Progress) {
        // Receiver side: chunk count unknown until the request arrives.
        if progress.total == 0 {
            return;
        }
        // Display only; a closed stderr must not fail the transfer.
        let _ = write!(self.out, "\r{}", render(progress, WIDTH));
        let _ = self.out.flush();
        self.drawn = true;
    }

    /// End the bar's line so later output starts fresh.
    pub fn finish(&mut self) {
        if self.drawn {
            let _ = writeln!(self.out);
            self.drawn = false;
        }
    }
}

/// `[0000------] | done/total`, filled to the nearest cell. An empty
/// transfer renders as full.
pub fn render(progress: Progress, width: usize) -> String {
    let Progress { done, total } = progress;
    let filled = if total == 0 {
        width
    } else {
        let (done, total) = (done.min(total) as usize, total as usize);
        (done * width + total / 2) / total
    };
    format!(
        "[{}{}] | {}/{}",
        "0".repeat(filled),
        "-".repeat(width - filled),
        done,
        total
    )
}
