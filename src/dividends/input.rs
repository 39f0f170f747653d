//! Line-oriented query input
//!
//! Reads run on a plain OS thread that nothing joins. A blocked read never
//! holds up runtime shutdown: once the receiver is gone the thread exits on
//! its next line, or with the process.

use std::io::BufRead;
use tokio::sync::mpsc;

/// Forward every line of `reader` over a bounded channel
///
/// The channel closes at EOF, after the first read error (which is
/// forwarded), or when the receiver is dropped.
pub fn spawn_line_reader<R>(reader: R, buffer: usize) -> mpsc::Receiver<std::io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));

    std::thread::spawn(move || {
        for line in reader.lines() {
            let failed = line.is_err();
            if tx.blocking_send(line).is_err() || failed {
                return;
            }
        }
        log::debug!("Line reader reached end of input");
    });

    rx
}
