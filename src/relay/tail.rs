//! Following lines appended to a growing file.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use crate::worker::CancelToken;

/// Follow `path` from its current end, calling `on_line` for every complete
/// line appended afterwards.
///
/// A partially written line is held back until its newline arrives. Bytes
/// that are not valid UTF-8 are replaced rather than failing the read. If
/// the file shrinks below the read position it was truncated in place, and
/// reading restarts from the top.
///
/// Returns `Ok(())` once `cancel` fires; any I/O error is returned to the
/// caller, which decides whether to retry.
pub fn follow(
    path: &Path,
    poll: Duration,
    cancel: &CancelToken,
    mut on_line: impl FnMut(&str),
) -> io::Result<()> {
    let mut file = File::open(path)?;
    let mut position = file.seek(SeekFrom::End(0))?;
    let mut reader = BufReader::new(file);
    let mut pending = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let read = reader.read_until(b'\n', &mut pending)?;
        if read > 0 {
            position += read as u64;
            if pending.ends_with(b"\n") {
                let line = String::from_utf8_lossy(&pending);
                on_line(line.trim_end_matches(['\r', '\n']));
                pending.clear();
            }
            continue;
        }

        let length = std::fs::metadata(path)?.len();
        if length < position {
            tracing::debug!(path = %path.display(), "Log file truncated, rewinding");
            position = reader.seek(SeekFrom::Start(0))?;
            pending.clear();
            continue;
        }

        if cancel.wait(poll) {
            return Ok(());
        }
    }
}
