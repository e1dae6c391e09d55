//! Line-by-line file processing.
//!
//! A [`Processor`] handles one line at a time; [`process_file`] feeds it every
//! line of a local copy and fails the whole file on the first bad line.

pub mod error;
mod prime;

pub use self::prime::PrimeNumberProcessor;
use self::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fmt::Debug;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Business logic applied to each line of a transferred file.
pub trait Processor: Send + Sync {
    type Output: Debug;

    fn process(&self, line: &str) -> Result<Self::Output>;
}

/// Run every line of the file at `path` through `processor`.
///
/// Lines are read as UTF-8; a final line without a trailing newline is still
/// processed, but no empty line is synthesised after the last newline.
/// Returns the number of lines processed.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub async fn process_file<P: Processor + ?Sized>(processor: &P, path: &Path) -> Result<usize> {
    let file = File::open(path).await.or_raise(|| ErrorKind::Read(path.to_path_buf()))?;
    let mut lines = BufReader::new(file).lines();
    let mut number = 0;
    while let Some(line) = lines.next_line().await.or_raise(|| ErrorKind::Read(path.to_path_buf()))? {
        number += 1;
        match processor.process(&line) {
            Ok(output) => tracing::trace!(number, ?output, "Processed line"),
            Err(err) => {
                let reason = (*err).to_string();
                return Err(err.raise(ErrorKind::InvalidLine { number, reason }));
            },
        }
    }
    Ok(number)
}
