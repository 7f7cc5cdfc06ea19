use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use percent_encoding::percent_decode_str;

use crate::storage::error::{invalid_argument, StorageResult};

/// How `upload_string` interprets its input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StringFormat {
    /// UTF-8 text, uploaded as-is.
    #[default]
    Raw,
    Base64,
    /// URL-safe alphabet; padding is optional.
    Base64Url,
    /// `data:[<mediatype>][;base64],<data>`; the media type becomes the content type.
    DataUrl,
}

/// Bytes produced from a string upload plus any content type carried by the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringPayload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl StringFormat {
    pub fn decode(self, value: &str) -> StorageResult<StringPayload> {
        let bytes = match self {
            StringFormat::Raw => value.as_bytes().to_vec(),
            StringFormat::Base64 => STANDARD
                .decode(value)
                .map_err(|err| invalid_argument(format!("Invalid base64 string: {err}")))?,
            StringFormat::Base64Url => URL_SAFE_NO_PAD
                .decode(value.trim_end_matches('='))
                .map_err(|err| invalid_argument(format!("Invalid base64url string: {err}")))?,
            StringFormat::DataUrl => return decode_data_url(value),
        };
        Ok(StringPayload {
            bytes,
            content_type: None,
        })
    }
}

fn decode_data_url(value: &str) -> StorageResult<StringPayload> {
    let rest = value
        .strip_prefix("data:")
        .ok_or_else(|| invalid_argument("Data URL must start with 'data:'."))?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| invalid_argument("Data URL is missing the ',' before its payload."))?;

    let (media_type, base64) = match header.strip_suffix(";base64") {
        Some(media_type) => (media_type, true),
        None => (header, false),
    };
    let content_type = Some(media_type.trim())
        .filter(|media_type| !media_type.is_empty())
        .map(str::to_string);

    let bytes = if base64 {
        STANDARD
            .decode(data)
            .map_err(|err| invalid_argument(format!("Invalid base64 data URL: {err}")))?
    } else {
        percent_decode_str(data).collect()
    };
    Ok(StringPayload {
        bytes,
        content_type,
    })
}
