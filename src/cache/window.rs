//! Bounded line windows over cache artifacts.

use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Number of lines served per scroll request
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Read up to `max_lines` lines starting at line index `start_line`.
///
/// The file is streamed; reading stops as soon as the window is full. A
/// `start_line` past the end of the file yields an empty window, and a short
/// file yields a partial one. Trailing `\n` / `\r\n` is stripped from every
/// line and invalid UTF-8 is replaced lossily.
pub async fn read_window(path: &Path, start_line: u64, max_lines: usize) -> io::Result<Vec<String>> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);

    let mut window = Vec::with_capacity(max_lines.min(DEFAULT_WINDOW_SIZE));
    if max_lines == 0 {
        return Ok(window);
    }

    let mut line = Vec::new();
    let mut index: u64 = 0;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if index >= start_line {
            window.push(decode_line(&line));
            if window.len() >= max_lines {
                break;
            }
        }
        index += 1;
    }

    Ok(window)
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
