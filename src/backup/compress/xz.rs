use crate::backup::file_ext::FileExtProvider;
use crate::backup::result_error::result::Result;
use bon::Builder;
use liblzma::stream::{Check, MtStreamBuilder};
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use std::num::NonZero;
use validator::Validate;

/// Default compression level (balance of speed vs size)
static DEFAULT_COMPRESSION_LEVEL: u32 = 3;
/// Maximum threads to prevent resource exhaustion
static DEFAULT_MAX_PARALLELIZATION: usize = 32;

/// Configuration for XZ (LZMA) compression of dump artifacts
///
/// Supports parallel compression for better performance on multi-core systems.
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug, Builder, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct XzConfig {
    /// Compression level (0-9)
    ///
    /// - 0: Fastest, largest files
    /// - 3: Default balance (good speed/size ratio)
    /// - 9: Slowest, smallest files
    #[validate(range(min = 0, max = 9))]
    level: Option<u32>,

    /// Number of compression threads
    ///
    /// Defaults to half of the available cores, capped at 32.
    #[validate(range(min = 1))]
    thread: Option<u32>,
}

impl FileExtProvider for XzConfig {
    fn file_ext(&self) -> &'static str {
        "xz"
    }
}

impl XzConfig {
    /// Creates an XZ encoder with the configured settings
    ///
    /// Uses single-threaded compression for thread=1, otherwise the
    /// multi-threaded stream encoder.
    pub fn build_encoder<W: Write>(&self, writer: W) -> Result<XzEncoder<W>> {
        let level = self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL);

        let thread = self.thread.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZero::get)
                .map(|core| core / 2)
                .map(|t| t.max(1))
                .map(|t| t.min(DEFAULT_MAX_PARALLELIZATION) as u32)
                .unwrap_or(1)
        });

        tracing::debug!("Creating XZ compressor with level={}, threads={}", level, thread);

        if thread == 1 {
            Ok(XzEncoder::new(writer, level))
        } else {
            let stream = MtStreamBuilder::new()
                .preset(level)
                .check(Check::Crc64)
                .threads(thread)
                .encoder()?;
            Ok(XzEncoder::new_stream(writer, stream))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::finish::Finish;
    use std::io::{Cursor, Read};

    #[test]
    fn test_xz_config_default() {
        let config = XzConfig::default();
        assert!(config.level.is_none());
        assert!(config.thread.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_xz_config_validation() {
        let valid_configs = vec![
            XzConfig::builder().level(0).thread(1).build(),
            XzConfig::builder().level(5).thread(4).build(),
            XzConfig::builder().level(9).thread(8).build(),
        ];

        for config in valid_configs {
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_xz_config_invalid_level() {
        let config = XzConfig::builder().level(10).thread(1).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_xz_config_invalid_thread() {
        let config = XzConfig::builder().level(5).thread(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multi_thread_output_decodes() {
        let config = XzConfig::builder().level(1).thread(4).build();
        let mut encoder = config.build_encoder(Cursor::new(Vec::new())).unwrap();
        encoder.write_all(b"multi threaded payload").unwrap();
        let compressed = Finish::finish(encoder).unwrap().into_inner();

        let mut decoded = String::new();
        liblzma::read::XzDecoder::new(Cursor::new(compressed))
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "multi threaded payload");
    }

    #[test]
    fn test_xz_config_deserialization() {
        let config: XzConfig = serde_yml::from_str("level: 6\nthread: 2\n").unwrap();
        assert_eq!(config, XzConfig::builder().level(6).thread(2).build());
        assert!(serde_yml::from_str::<XzConfig>("levels: 6\n").is_err());
    }
}
