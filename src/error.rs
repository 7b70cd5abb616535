//! Error types for the screen-watermark crate.

/// Errors that can occur while embedding, detecting, or recording watermarks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The embedding strength is not a finite positive number.
    #[error("invalid strength {0}: must be a finite value greater than 0")]
    InvalidStrength(f32),

    /// The strength is positive but truncates to a zero pixel offset.
    #[error("strength {0} is below one intensity level and would embed nothing")]
    IneffectiveStrength(f32),

    /// The image has a zero dimension and contains no blocks.
    #[error("empty image ({width}x{height})")]
    EmptyImage {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },

    /// A bit sequence handed to the codec is not a positive multiple of 8 long.
    #[error("bit sequence of length {0} is not a positive multiple of 8")]
    Length(usize),

    /// A payload needs exactly 256 bits.
    #[error("expected exactly 256 payload bits, got {0}")]
    PayloadBits(usize),

    /// Recovered payload bytes are not valid UTF-8 after null-stripping.
    #[error("{field} is not valid UTF-8: {source}")]
    Decode {
        /// Which half of the payload failed (`device_id` or `session_id`).
        field: &'static str,
        /// The underlying UTF-8 error.
        source: std::str::Utf8Error,
    },

    /// A stored or transmitted payload could not be parsed back into 32 bytes.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// An identifier is empty or does not fit the 16-byte payload field.
    #[error("invalid identifier {0:?}: must be 1-16 bytes")]
    InvalidIdentifier(String),

    /// A required registry field was not supplied.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// No device is enrolled under the given identifier.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// No detection is recorded under the given identifier.
    #[error("detection not found: {0}")]
    DetectionNotFound(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The registry file could not be serialized or parsed.
    #[error("registry JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let empty = Error::EmptyImage {
            width: 0,
            height: 20,
        };
        assert!(empty.to_string().contains("0x20"));

        assert!(Error::Length(200 + 3).to_string().contains("203"));
        assert!(Error::InvalidStrength(-1.0).to_string().contains("-1"));
        assert_eq!(
            Error::PayloadBits(64).to_string(),
            "expected exactly 256 payload bits, got 64"
        );
        assert!(Error::IneffectiveStrength(0.5)
            .to_string()
            .contains("would embed nothing"));
        assert!(Error::MissingField("device_id")
            .to_string()
            .contains("device_id is required"));
    }

    #[test]
    fn decode_error_names_the_field() {
        let bad = [0xffu8, 0xfe];
        let source = std::str::from_utf8(&bad).unwrap_err();
        let err = Error::Decode {
            field: "session_id",
            source,
        };
        assert!(err.to_string().starts_with("session_id is not valid UTF-8"));
    }
}
