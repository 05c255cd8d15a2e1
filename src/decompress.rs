use std::io::{self, Cursor, Read};

use brotli::Decompressor;
use flate2::read::{DeflateDecoder, GzDecoder, MultiGzDecoder, ZlibDecoder};
use tracing::{debug, warn};
use zstd::stream::read::Decoder as ZstdDecoder;

/// One way of undoing a content-coding. Strategies for a token are tried in
/// order until one succeeds.
struct Strategy {
    name: &'static str,
    run: fn(&[u8]) -> io::Result<Vec<u8>>,
}

const GZIP: &[Strategy] = &[
    Strategy {
        name: "gzip",
        run: gzip_members,
    },
    Strategy {
        name: "gzip-lenient",
        run: gzip_lenient,
    },
];

const DEFLATE: &[Strategy] = &[
    Strategy {
        name: "zlib",
        run: zlib,
    },
    Strategy {
        name: "deflate-raw",
        run: deflate_raw,
    },
    Strategy {
        name: "zlib-lenient",
        run: zlib_lenient,
    },
];

const BROTLI: &[Strategy] = &[
    Strategy {
        name: "br",
        run: brotli,
    },
    Strategy {
        name: "br-lenient",
        run: brotli_lenient,
    },
];

const ZSTD: &[Strategy] = &[Strategy {
    name: "zstd",
    run: zstd,
}];

const HTML_MARKERS: &[&[u8]] = &[b"<!doctype", b"<html", b"<head", b"<body", b"<!--"];

fn gzip_members(input: &[u8]) -> io::Result<Vec<u8>> {
    read_all(MultiGzDecoder::new(Cursor::new(input)))
}

fn gzip_lenient(input: &[u8]) -> io::Result<Vec<u8>> {
    read_lenient(GzDecoder::new(Cursor::new(input)))
}

fn zlib(input: &[u8]) -> io::Result<Vec<u8>> {
    read_all(ZlibDecoder::new(Cursor::new(input)))
}

fn deflate_raw(input: &[u8]) -> io::Result<Vec<u8>> {
    read_all(DeflateDecoder::new(Cursor::new(input)))
}

fn zlib_lenient(input: &[u8]) -> io::Result<Vec<u8>> {
    read_lenient(ZlibDecoder::new(Cursor::new(input)))
}

fn brotli(input: &[u8]) -> io::Result<Vec<u8>> {
    read_all(Decompressor::new(Cursor::new(input), 4096))
}

fn brotli_lenient(input: &[u8]) -> io::Result<Vec<u8>> {
    read_lenient(Decompressor::new(Cursor::new(input), 4096))
}

fn zstd(input: &[u8]) -> io::Result<Vec<u8>> {
    read_all(ZstdDecoder::new(Cursor::new(input))?)
}

fn strategies_for(token: &str) -> Option<&'static [Strategy]> {
    match token {
        "gzip" | "x-gzip" => Some(GZIP),
        "deflate" => Some(DEFLATE),
        "br" => Some(BROTLI),
        "zstd" => Some(ZSTD),
        _ => None,
    }
}

/// Splits a `Content-Encoding` value into lowercase codings, dropping
/// `identity` and empty entries. Order is the order of application.
pub fn encoding_tokens(content_encoding: Option<&str>) -> Vec<String> {
    content_encoding
        .unwrap_or_default()
        .split(',')
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty() && token != "identity")
        .collect()
}

/// Whether a coding is one this module knows how to undo.
pub fn is_supported(token: &str) -> bool {
    strategies_for(token).is_some()
}

/// Decodes an upstream body. Never fails: when a coding cannot be undone the
/// input is returned unchanged.
pub fn decompress(bytes: &[u8], content_encoding: Option<&str>) -> Vec<u8> {
    let tokens = encoding_tokens(content_encoding);
    if tokens.is_empty() {
        return bytes.to_vec();
    }
    if looks_like_html(bytes) {
        debug!(encoding = ?content_encoding, "body is already markup; skipping decompression");
        return bytes.to_vec();
    }

    let mut current = bytes.to_vec();
    for token in tokens.iter().rev() {
        let Some(strategies) = strategies_for(token) else {
            warn!(%token, "unsupported content-encoding; passing body through");
            return bytes.to_vec();
        };
        match try_strategies(strategies, &current) {
            Some(decoded) => current = decoded,
            None => {
                warn!(%token, "every decoder failed; passing body through");
                return bytes.to_vec();
            }
        }
    }
    current
}

fn try_strategies(strategies: &[Strategy], input: &[u8]) -> Option<Vec<u8>> {
    for strategy in strategies {
        match (strategy.run)(input) {
            Ok(out) => {
                debug!(strategy = strategy.name, len = out.len(), "decoded body");
                return Some(out);
            }
            Err(err) => debug!(strategy = strategy.name, %err, "decoder failed"),
        }
    }
    None
}

/// Cheap sniff for bodies that are plain markup despite a `Content-Encoding`
/// header.
pub fn looks_like_html(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let head: Vec<u8> = bytes[start..]
        .iter()
        .take(9)
        .map(|b| b.to_ascii_lowercase())
        .collect();
    HTML_MARKERS.iter().any(|marker| head.starts_with(marker))
}

fn read_all(mut reader: impl Read) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

/// Keeps whatever decoded cleanly before the stream broke off, mirroring a
/// sync-flush decode of a truncated body.
fn read_lenient(mut reader: impl Read) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(out),
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                if out.is_empty() {
                    return Err(err);
                }
                return Ok(out);
            }
        }
    }
}
