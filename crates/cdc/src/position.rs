use adapter::Error;
use chrono::{DateTime, Utc};

/// A validated change-stream position. The raw text is kept verbatim so
/// positions round-trip losslessly through get/set, whatever their form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionToken {
    raw: String,
    pub kind: PositionKind,
}

/// The recognized position formats, one per CDC mechanism family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionKind {
    /// `mysql-bin.000001:12345`.
    Binlog { file: String, offset: u64 },
    /// Write-ahead-log LSN, `0/A1B2C3D4`.
    WalLsn(u64),
    /// Decimal system change number.
    Scn(u64),
    /// RFC 3339 watermark used by polling sources.
    Watermark(DateTime<Utc>),
    /// Anything else; positions are opaque to generic code.
    Opaque,
}

impl PositionToken {
    /// Parse and validate a position string. Only the empty string is
    /// rejected; unrecognized forms are accepted as opaque.
    pub fn parse(raw: &str) -> Result<PositionToken, Error> {
        if raw.is_empty() {
            return Err(Error::InvalidData("empty position token".to_string()));
        }

        // A timestamp also contains ':'-separated digits, so the watermark
        // form is tried before the binlog form.
        let kind = if let Some((hi, lo)) = raw.split_once('/') {
            match (u64::from_str_radix(hi, 16), u64::from_str_radix(lo, 16)) {
                (Ok(hi), Ok(lo)) if hi <= u32::MAX as u64 && lo <= u32::MAX as u64 => {
                    PositionKind::WalLsn((hi << 32) | lo)
                }
                _ => PositionKind::Opaque,
            }
        } else if let Ok(scn) = raw.parse::<u64>() {
            PositionKind::Scn(scn)
        } else if let Ok(watermark) = DateTime::parse_from_rfc3339(raw) {
            PositionKind::Watermark(watermark.with_timezone(&Utc))
        } else if let Some((file, offset)) = raw.rsplit_once(':') {
            match offset.parse::<u64>() {
                Ok(offset) if !file.is_empty() => PositionKind::Binlog {
                    file: file.to_string(),
                    offset,
                },
                _ => PositionKind::Opaque,
            }
        } else {
            PositionKind::Opaque
        };

        Ok(PositionToken {
            raw: raw.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Format a WAL LSN the way the backend prints it.
    pub fn from_wal_lsn(lsn: u64) -> PositionToken {
        let raw = format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF);
        PositionToken {
            raw,
            kind: PositionKind::WalLsn(lsn),
        }
    }

    pub fn from_binlog(file: &str, offset: u64) -> PositionToken {
        PositionToken {
            raw: format!("{file}:{offset}"),
            kind: PositionKind::Binlog {
                file: file.to_string(),
                offset,
            },
        }
    }

    pub fn from_watermark(watermark: DateTime<Utc>) -> PositionToken {
        PositionToken {
            raw: watermark.to_rfc3339(),
            kind: PositionKind::Watermark(watermark),
        }
    }
}

impl std::fmt::Display for PositionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonical_forms_parse_and_round_trip() {
        for raw in [
            "mysql-bin.000001:12345",
            "48732918",
            "0/A1B2C3D4",
            "16/0",
            "2024-05-01T12:30:00+00:00",
        ] {
            let token = PositionToken::parse(raw).unwrap();
            assert_eq!(token.to_string(), raw, "round-trip of {raw}");
        }
    }

    #[test]
    fn kinds_are_recognized() {
        assert!(matches!(
            PositionToken::parse("mysql-bin.000001:12345").unwrap().kind,
            PositionKind::Binlog { offset: 12345, .. }
        ));
        assert!(matches!(
            PositionToken::parse("48732918").unwrap().kind,
            PositionKind::Scn(48732918)
        ));
        assert_eq!(
            PositionToken::parse("0/A1B2C3D4").unwrap().kind,
            PositionKind::WalLsn(0xA1B2C3D4)
        );
        assert!(matches!(
            PositionToken::parse("not a known form").unwrap().kind,
            PositionKind::Opaque
        ));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(PositionToken::parse("").is_err());
    }

    #[test]
    fn wal_lsn_formats_like_the_backend() {
        assert_eq!(PositionToken::from_wal_lsn(0xA1B2C3D4).as_str(), "0/A1B2C3D4");
        assert_eq!(
            PositionToken::from_wal_lsn((0x16 << 32) | 0x10).as_str(),
            "16/10"
        );
    }
}
