//! A small `multipart/form-data` parser, used when the host has no form-data parsing of its own.

use crate::error::BridgeError;
use micro_wire::{Body, MultipartFile, WireError};
use mime::Mime;
use std::collections::BTreeMap;

const MAX_PART_HEADERS: usize = 16;

pub fn parse(content_type: &Mime, body: &[u8]) -> Result<Body, BridgeError> {
    let boundary = content_type
        .get_param(mime::BOUNDARY)
        .ok_or_else(|| WireError::invalid_form("multipart body without boundary"))?;
    let delimiter = format!("--{}", boundary.as_str());

    let mut fields = BTreeMap::new();
    let mut files = Vec::new();

    for part in split(body, delimiter.as_bytes()) {
        // a part starts right after the delimiter line; `--` marks the final delimiter
        if part.starts_with(b"--") {
            break;
        }
        let part = part.strip_prefix(b"\r\n").unwrap_or(part);
        let part = part.strip_suffix(b"\r\n").unwrap_or(part);

        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
        let (consumed, headers) = match httparse::parse_headers(part, &mut headers) {
            Ok(httparse::Status::Complete((consumed, headers))) => (consumed, headers),
            Ok(httparse::Status::Partial) => return Err(WireError::invalid_form("truncated multipart headers").into()),
            Err(e) => return Err(WireError::invalid_form(e).into()),
        };
        let content = &part[consumed..];

        let mut disposition = None;
        let mut part_type = None;
        for header in headers.iter() {
            let value = String::from_utf8_lossy(header.value).into_owned();
            if header.name.eq_ignore_ascii_case(http::header::CONTENT_DISPOSITION.as_str()) {
                disposition = Some(value);
            } else if header.name.eq_ignore_ascii_case(http::header::CONTENT_TYPE.as_str()) {
                part_type = Some(value);
            }
        }

        let Some(disposition) = disposition else {
            continue;
        };
        let Some(name) = disposition_param(&disposition, "name") else {
            continue;
        };

        match disposition_param(&disposition, "filename") {
            Some(filename) => {
                let mut file = MultipartFile::new(name, content).with_filename(filename);
                file.content_type = part_type;
                files.push(file);
            }
            None => {
                fields.insert(name, String::from_utf8_lossy(content).into_owned());
            }
        }
    }

    Ok(Body::Multipart { fields, files })
}

/// The chunks between occurrences of `delimiter`, skipping the preamble.
fn split<'a>(body: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut rest = match find(body, delimiter) {
        Some(at) => &body[at + delimiter.len()..],
        None => return parts,
    };
    loop {
        match find(rest, delimiter) {
            Some(at) => {
                parts.push(&rest[..at]);
                rest = &rest[at + delimiter.len()..];
            }
            None => {
                parts.push(rest);
                return parts;
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn disposition_param(disposition: &str, key: &str) -> Option<String> {
    disposition.split(';').skip(1).find_map(|param| {
        let (name, value) = param.trim().split_once('=')?;
        name.trim().eq_ignore_ascii_case(key).then(|| value.trim().trim_matches('"').to_owned())
    })
}
