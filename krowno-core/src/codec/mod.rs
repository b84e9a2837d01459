use crate::error::{KrownoError, Result};

pub mod gzipc;

/// Compression tag as stored in the archive header.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    #[default]
    None = 0,
    Gzip = 1,
    Lz4 = 2,
    Zstd = 3,
}

impl Compression {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Lz4),
            3 => Ok(Self::Zstd),
            _ => Err(KrownoError::ArchiveFormat(format!(
                "unknown compression tag {tag}"
            ))),
        }
    }

    /// Collapse unimplemented codecs onto gzip. The writer stores the
    /// normalized tag, so a reader never meets an lz4/zstd payload.
    /// Returns the effective codec and whether a fallback happened.
    pub fn normalize(self) -> (Self, bool) {
        match self {
            Self::Lz4 | Self::Zstd => (Self::Gzip, true),
            other => (other, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for c in [
            Compression::None,
            Compression::Gzip,
            Compression::Lz4,
            Compression::Zstd,
        ] {
            assert_eq!(Compression::from_tag(c.tag()).unwrap(), c);
        }
        assert!(Compression::from_tag(9).is_err());
    }

    #[test]
    fn unimplemented_codecs_fall_back_to_gzip() {
        assert_eq!(Compression::Lz4.normalize(), (Compression::Gzip, true));
        assert_eq!(Compression::Zstd.normalize(), (Compression::Gzip, true));
        assert_eq!(Compression::Gzip.normalize(), (Compression::Gzip, false));
        assert_eq!(Compression::None.normalize(), (Compression::None, false));
    }
}
