use thiserror::Error;

/// Longest slice of an undecodable body that is echoed back in a decode error.
const MAX_BODY_PREVIEW: usize = 512;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("activation code not set")]
    MissingActivationCode,

    #[error("failed to GET {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read body for {url}: {source}")]
    Read {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {url} ('{body}'): {source}")]
    Decode {
        url: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub(crate) fn decode(url: &str, body: &[u8], source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.to_string(),
            body: body_preview(body),
            source,
        }
    }

    /// Short label used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::MissingActivationCode => "config",
            FetchError::Transport { .. } => "transport",
            FetchError::Read { .. } => "read",
            FetchError::Decode { .. } => "decode",
        }
    }
}

fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_BODY_PREVIEW {
        return text.into_owned();
    }
    let mut end = MAX_BODY_PREVIEW;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
