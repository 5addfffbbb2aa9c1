//! Minimal `multipart/form-data` reader for the upload form.
//!
//! The body is fully buffered, so parts borrow from it.

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MultipartError {
    #[error("Content-Type is not multipart/form-data with a boundary")]
    MissingBoundary,

    #[error("Malformed multipart body: {0}")]
    Malformed(&'static str),
}

#[derive(Debug)]
pub struct Part<'a> {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: &'a [u8],
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary(content_type: &str) -> Result<String, MultipartError> {
    let mut params = content_type.split(';').map(str::trim);
    let mime = params.next().unwrap_or_default();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::MissingBoundary);
    }
    params
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
        .ok_or(MultipartError::MissingBoundary)
}

pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>, MultipartError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut closing = b"\r\n".to_vec();
    closing.extend_from_slice(&delimiter);

    let mut cursor = find(body, &delimiter, 0).ok_or(MultipartError::Malformed("no opening boundary"))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if rest.starts_with(b"\r\n") {
            cursor += 2;
        }

        let header_end = find(body, b"\r\n\r\n", cursor).ok_or(MultipartError::Malformed("unterminated headers"))?;
        let headers = std::str::from_utf8(&body[cursor..header_end])
            .map_err(|_| MultipartError::Malformed("headers are not UTF-8"))?;
        let data_start = header_end + 4;
        let data_end = find(body, &closing, data_start).ok_or(MultipartError::Malformed("unterminated part"))?;

        let mut part = Part {
            name: None,
            filename: None,
            content_type: None,
            data: &body[data_start..data_end],
        };
        for line in headers.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.eq_ignore_ascii_case("content-disposition") {
                for param in value.split(';').skip(1) {
                    if let Some((k, v)) = param.trim().split_once('=') {
                        let v = v.trim().trim_matches('"').to_string();
                        match k.trim() {
                            "name" => part.name = Some(v),
                            "filename" => part.filename = Some(v),
                            _ => {}
                        }
                    }
                }
            } else if key.eq_ignore_ascii_case("content-type") {
                part.content_type = Some(value.trim().to_string());
            }
        }
        parts.push(part);

        cursor = data_end + closing.len();
        if cursor > body.len() {
            return Err(MultipartError::Malformed("truncated body"));
        }
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
