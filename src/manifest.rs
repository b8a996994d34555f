//! Upload manifest parsing.
//!
//! Every significant manifest line is a free-form upload record, roughly
//!
//! ```text
//! ant file download --retries 20 <address> holiday.tar # md5 <digest> 1.2 MB 0.0004 ANT 15/06/23
//! ```
//!
//! The line is tokenized once and each field is pulled out by its own
//! extractor, in a fixed order, with a fallback chain for the filename.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use thiserror::Error;

use crate::checksum::{is_digest_hex, is_lower_hex};

pub const ADDRESS_HEX_LEN: usize = 64;
pub const DEFAULT_RETRY_MARKER: &str = "--retries";
const FALLBACK_EXTENSION: &str = ".bin";
const CHECKSUM_LABELS: [&str; 3] = ["md5sum", "md5", "checksum"];
const QUOTES: [char; 2] = ['\'', '"'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// 1-based manifest line, 0 when parsed outside a manifest.
    pub line: usize,
    pub address: String,
    pub filename: String,
    pub expected_checksum: String,
    pub upload_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no 64-character content address after the retry marker")]
    MissingAddress,
    #[error("no 32-character checksum after a checksum label")]
    MissingChecksum,
}

#[derive(Debug, Clone)]
pub struct RecordParser {
    retry_marker: String,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_MARKER)
    }
}

impl RecordParser {
    pub fn new(retry_marker: impl Into<String>) -> Self {
        Self {
            retry_marker: retry_marker.into(),
        }
    }

    /// Blank lines and `#` comments carry no record.
    pub fn is_record(line: &str) -> bool {
        let trimmed = line.trim_start();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    }

    pub fn parse(&self, line: &str) -> Result<DownloadJob, ParseError> {
        let tokens = tokenize(line);

        let address_idx =
            find_address(&tokens, &self.retry_marker).ok_or(ParseError::MissingAddress)?;
        let (checksum_idx, checksum) = find_checksum(&tokens).ok_or(ParseError::MissingChecksum)?;
        let address = unquote(tokens[address_idx].text);

        let comment_start = line[tokens[address_idx].end..]
            .find('#')
            .map(|offset| tokens[address_idx].end + offset);

        let filename = filename_between(line, tokens[address_idx].end, comment_start)
            .or_else(|| filename_after_checksum(&tokens, checksum_idx, comment_start))
            .or_else(|| first_single_quoted(line))
            .and_then(|name| sanitize_filename(&name))
            .unwrap_or_else(|| format!("{}{FALLBACK_EXTENSION}", &address[..16]));

        Ok(DownloadJob {
            line: 0,
            address: address.to_string(),
            filename,
            expected_checksum: checksum.to_string(),
            upload_date: trailing_date(&tokens).map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

fn tokenize(line: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (idx, ch) in line.char_indices() {
        if ch.is_whitespace() {
            if let Some(begin) = start.take() {
                tokens.push(Token {
                    text: &line[begin..idx],
                    start: begin,
                    end: idx,
                });
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(begin) = start {
        tokens.push(Token {
            text: &line[begin..],
            start: begin,
            end: line.len(),
        });
    }
    tokens
}

fn unquote(token: &str) -> &str {
    token.trim_matches(&QUOTES[..])
}

fn is_address_hex(token: &str) -> bool {
    token.len() == ADDRESS_HEX_LEN && is_lower_hex(token)
}

fn is_marker(token: &str, marker: &str) -> bool {
    token == marker
        || token
            .strip_prefix(marker)
            .is_some_and(|rest| rest.starts_with('='))
}

fn find_address(tokens: &[Token<'_>], marker: &str) -> Option<usize> {
    let marker_idx = tokens.iter().position(|t| is_marker(t.text, marker))?;
    tokens[marker_idx + 1..]
        .iter()
        .position(|t| is_address_hex(unquote(t.text)))
        .map(|offset| marker_idx + 1 + offset)
}

/// `Some("")` for a bare label, `Some(rest)` for `label:rest` / `label=rest`.
fn split_label(token: &str) -> Option<&str> {
    let lower = token.to_ascii_lowercase();
    CHECKSUM_LABELS.iter().find_map(|label| {
        let rest = lower.strip_prefix(label)?;
        match rest.chars().next() {
            None => Some(""),
            Some(':' | '=') => Some(&token[label.len() + 1..]),
            Some(_) => None,
        }
    })
}

fn find_checksum<'a>(tokens: &[Token<'a>]) -> Option<(usize, &'a str)> {
    for (idx, token) in tokens.iter().enumerate() {
        let Some(glued) = split_label(token.text) else {
            continue;
        };
        let glued = unquote(glued);
        if is_digest_hex(glued) {
            return Some((idx, glued));
        }
        let found = tokens[idx + 1..]
            .iter()
            .enumerate()
            .find(|(_, t)| is_digest_hex(unquote(t.text)));
        if let Some((offset, t)) = found {
            return Some((idx + 1 + offset, unquote(t.text)));
        }
    }
    None
}

fn usable(name: &str) -> Option<String> {
    let name = name.trim().trim_matches(&QUOTES[..]).trim();
    if name.is_empty() || name == "." {
        None
    } else {
        Some(name.to_string())
    }
}

fn filename_between(line: &str, from: usize, comment_start: Option<usize>) -> Option<String> {
    let to = comment_start.unwrap_or(line.len());
    usable(&line[from..to])
}

fn filename_after_checksum(
    tokens: &[Token<'_>],
    checksum_idx: usize,
    comment_start: Option<usize>,
) -> Option<String> {
    let comment_start = comment_start?;
    let next = tokens.get(checksum_idx + 1)?;
    if next.start < comment_start {
        return None;
    }
    let name = usable(next.text)?;
    // The size column follows the checksum when the filename is absent.
    if name.parse::<f64>().is_ok() || name.contains('/') {
        return None;
    }
    Some(name)
}

fn first_single_quoted(line: &str) -> Option<String> {
    let open = line.find('\'')?;
    let rest = &line[open + 1..];
    let close = rest.find('\'')?;
    usable(&rest[..close])
}

/// Keeps only the final path component so downloads and cleanup stay inside
/// the download directory.
fn sanitize_filename(name: &str) -> Option<String> {
    let base = Path::new(name).file_name()?.to_str()?;
    usable(base)
}

fn is_date_token(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == 8
        && bytes[2] == b'/'
        && bytes[5] == b'/'
        && [0, 1, 3, 4, 6, 7].iter().all(|&i| bytes[i].is_ascii_digit())
}

fn trailing_date<'a>(tokens: &[Token<'a>]) -> Option<&'a str> {
    tokens.last().map(|t| t.text).filter(|t| is_date_token(t))
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub jobs: Vec<DownloadJob>,
    pub rejected: usize,
}

impl Manifest {
    pub fn load(path: &Path, parser: &RecordParser) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read manifest {:?}", path))?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes), parser))
    }

    pub fn parse(text: &str, parser: &RecordParser) -> Self {
        let mut manifest = Manifest::default();
        for (idx, line) in text.lines().enumerate() {
            if !RecordParser::is_record(line) {
                continue;
            }
            match parser.parse(line) {
                Ok(mut job) => {
                    job.line = idx + 1;
                    debug!(
                        "manifest line {}: {} -> {}",
                        job.line, job.address, job.filename
                    );
                    manifest.jobs.push(job);
                }
                Err(err) => {
                    warn!("skipping manifest line {}: {err}: {}", idx + 1, line.trim());
                    manifest.rejected += 1;
                }
            }
        }
        manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "4f8a1b2c3d4e5f60718293a4b5c6d7e8f90123456789abcdef0123456789abcd";
    const SUM: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn parse(line: &str) -> Result<DownloadJob, ParseError> {
        RecordParser::default().parse(line)
    }

    #[test]
    fn parses_a_complete_record() {
        let line = format!(
            "ant file download --retries 20 {ADDR} holiday.tar # md5 {SUM} 1.2 MB 0.0004 ANT 15/06/23"
        );
        let job = parse(&line).unwrap();
        assert_eq!(job.address, ADDR);
        assert_eq!(job.filename, "holiday.tar");
        assert_eq!(job.expected_checksum, SUM);
        assert_eq!(job.upload_date.as_deref(), Some("15/06/23"));
    }

    #[test]
    fn date_is_optional() {
        let line = format!("--retries 20 {ADDR} foo.bin # md5: {SUM} 3 KB");
        let job = parse(&line).unwrap();
        assert_eq!(job.filename, "foo.bin");
        assert_eq!(job.upload_date, None);
    }

    #[test]
    fn quoted_filename_with_spaces_is_trimmed() {
        let line = format!("--retries 20 {ADDR} \"my photos.zip\" # MD5={SUM} 1 GB");
        let job = parse(&line).unwrap();
        assert_eq!(job.filename, "my photos.zip");
        assert_eq!(job.expected_checksum, SUM);
    }

    #[test]
    fn placeholder_filename_falls_back_to_quoted_name() {
        let line = format!("--retries 20 {ADDR} . # md5 {SUM} 2.0 MB 'archive.tar' 01/01/24");
        let job = parse(&line).unwrap();
        assert_eq!(job.filename, "archive.tar");
    }

    #[test]
    fn placeholder_filename_falls_back_to_token_after_checksum() {
        let line = format!("--retries 20 {ADDR} . # md5 {SUM} notes.txt 2.0 MB");
        assert_eq!(parse(&line).unwrap().filename, "notes.txt");
    }

    #[test]
    fn unnamed_record_gets_address_derived_name() {
        let line = format!("--retries 20 {ADDR} # md5 {SUM} 2.0 MB 01/01/24");
        assert_eq!(parse(&line).unwrap().filename, "4f8a1b2c3d4e5f60.bin");
    }

    #[test]
    fn glued_label_is_accepted() {
        let line = format!("--retries 20 {ADDR} a.iso # md5:{SUM}");
        assert_eq!(parse(&line).unwrap().expected_checksum, SUM);
    }

    #[test]
    fn path_components_are_stripped() {
        let line = format!("--retries 20 {ADDR} ../../etc/passwd # md5 {SUM}");
        assert_eq!(parse(&line).unwrap().filename, "passwd");
    }

    #[test]
    fn address_must_follow_the_retry_marker() {
        let line = format!("{ADDR} --retries 20 foo # md5 {SUM}");
        assert_eq!(parse(&line), Err(ParseError::MissingAddress));
    }

    #[test]
    fn uppercase_or_short_hex_is_rejected() {
        let upper = ADDR.to_ascii_uppercase();
        let line = format!("--retries 20 {upper} foo # md5 {SUM}");
        assert_eq!(parse(&line), Err(ParseError::MissingAddress));

        let line = format!("--retries 20 {ADDR} foo # md5 {}", &SUM[..31]);
        assert_eq!(parse(&line), Err(ParseError::MissingChecksum));
    }

    #[test]
    fn custom_retry_marker() {
        let parser = RecordParser::new("-r");
        let line = format!("safe files download -r 20 {ADDR} x.bin # md5 {SUM}");
        assert_eq!(parser.parse(&line).unwrap().filename, "x.bin");
    }

    #[test]
    fn manifest_skips_comments_and_keeps_order() {
        let text = format!(
            "# uploads\n\n--retries 20 {ADDR} first # md5 {SUM}\n   # indented comment\nbroken line\n--retries 20 {ADDR} second # md5 {SUM}\n"
        );
        let manifest = Manifest::parse(&text, &RecordParser::default());
        let names: Vec<_> = manifest.jobs.iter().map(|j| j.filename.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(manifest.jobs[0].line, 3);
        assert_eq!(manifest.jobs[1].line, 6);
        assert_eq!(manifest.rejected, 1);
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(&dir.path().join("absent.log"), &RecordParser::default());
        assert!(err.is_err());
    }
}
