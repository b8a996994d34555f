use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::task;

pub const DIGEST_HEX_LEN: usize = 32;

pub fn is_digest_hex(token: &str) -> bool {
    token.len() == DIGEST_HEX_LEN && is_lower_hex(token)
}

pub fn is_lower_hex(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Case-insensitive digest comparison; both sides are lowercased first.
pub fn digests_match(actual: &str, expected: &str) -> bool {
    actual.to_ascii_lowercase() == expected.to_ascii_lowercase()
}

pub async fn digest_file(path: &Path) -> Result<String> {
    let path_owned = path.to_owned();
    task::spawn_blocking(move || compute_md5(&path_owned)).await?
}

fn compute_md5(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("failed to read {:?}", path))?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(hex::encode(context.compute().0))
}
