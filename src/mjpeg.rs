//! MJPEG multipart plumbing: the reader side consumes a
//! `multipart/x-mixed-replace` body one JPEG part at a time, the writer
//! side encodes parts for streams this process produces.

use std::io::{self, BufRead};

use image::RgbImage;

pub const BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Extract the part boundary from a Content-Type header value, normalized to
/// its on-the-wire form with the leading dashes.
pub fn parse_boundary(content_type: &str) -> Option<String> {
    let idx = content_type.to_lowercase().find("boundary=")?;
    let after = &content_type[idx + "boundary=".len()..];
    let boundary = after.trim_matches(|c: char| c.is_whitespace() || c == ';' || c == '"');
    if boundary.is_empty() {
        return None;
    }
    if boundary.starts_with("--") {
        Some(boundary.to_string())
    } else {
        Some(format!("--{}", boundary))
    }
}

/// Find one complete JPEG (SOI `FFD8` through EOI `FFD9`) inside `buffer`,
/// returning its start and one-past-end offsets.
pub fn find_jpeg_frame(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer
        .get(start + 2..)?
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])
        .map(|p| start + 2 + p + 2)?;
    Some((start, end))
}

/// Pull parser over a multipart image stream. Generic over `BufRead` so the
/// source can be a live HTTP response body or an in-memory buffer.
pub struct MjpegReader<R: BufRead> {
    reader: R,
    boundary: String,
}

impl<R: BufRead> MjpegReader<R> {
    pub fn new(reader: R, boundary: impl Into<String>) -> Self {
        Self {
            reader,
            boundary: boundary.into(),
        }
    }

    /// Next JPEG part, or None once the stream has ended.
    ///
    /// Parts that advertise a Content-Length are read exactly; parts without
    /// one fall back to scanning for the JPEG end marker.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let Some(line) = read_ascii_line(&mut self.reader)? else {
                return Ok(None);
            };
            if !line.trim().starts_with(&self.boundary) {
                continue;
            }

            let mut content_length: Option<usize> = None;
            loop {
                let Some(header) = read_ascii_line(&mut self.reader)? else {
                    return Ok(None);
                };
                let header = header.trim();
                if header.is_empty() {
                    break;
                }
                if let Some(value) = header_value(header, "Content-Length") {
                    content_length = value.parse::<usize>().ok();
                }
            }

            match content_length {
                Some(len) => {
                    let mut frame = vec![0u8; len];
                    self.reader.read_exact(&mut frame)?;
                    return Ok(Some(frame));
                }
                None => {
                    if let Some(frame) = self.read_until_eoi()? {
                        return Ok(Some(frame));
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn read_until_eoi(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buffer = Vec::new();
        loop {
            let n = self.reader.read_until(0xD9, &mut buffer)?;
            if n == 0 {
                return Ok(None);
            }
            if buffer.len() >= 2 && buffer[buffer.len() - 2] == 0xFF {
                if let Some((start, end)) = find_jpeg_frame(&buffer) {
                    return Ok(Some(buffer[start..end].to_vec()));
                }
            }
            // Unpaired 0xD9 inside entropy-coded data, keep reading.
        }
    }
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value.trim())
    } else {
        None
    }
}

/// Read one `\n`-terminated line, tolerating non-UTF-8 bytes. None on EOF.
fn read_ascii_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buffer = Vec::new();
    let bytes_read = reader.read_until(b'\n', &mut buffer)?;
    if bytes_read == 0 {
        return Ok(None);
    }
    while buffer.ends_with(b"\n") || buffer.ends_with(b"\r") {
        buffer.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buffer).to_string()))
}

/// Encode one multipart part the way the produced streams frame it.
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

pub fn encode_jpeg(image: &RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 80);
    image.write_with_encoder(encoder)?;
    Ok(out)
}

pub fn decode_jpeg(bytes: &[u8]) -> anyhow::Result<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}
