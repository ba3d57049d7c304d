//! Hash command implementation.

use shelfsync_engine::content_hash;
use std::path::PathBuf;
use tracing::warn;

/// Runs the hash command.
///
/// Prints `<hash>  <path>` per file. Unreadable files are reported and make
/// the command fail after every file has been tried.
pub fn run(files: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    let mut failed = 0;
    for path in files {
        match content_hash(path) {
            Ok(hash) => println!("{hash}  {}", path.display()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot hash file");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} file(s) could not be hashed").into());
    }
    Ok(())
}
