use crate::Flags;

const ETYPE_DEPRECATED: Flags = 1 << 0;

/// The encryption types a Windows domain can mark in
/// `msDS-supportedEncryptionTypes`, strongest first, with the attribute
/// bit each one maps to. Encryption types without a bit (des3) exist in
/// keytabs but cannot be represented in the directory attribute.
static KEYTYPES: [Keytype; 6] = [
    Keytype {
        enctype: Enctype::AES256_CTS_HMAC_SHA1_96,
        name: "aes256-cts-hmac-sha1-96",
        mask: 0x10,
        flags: 0,
    },
    Keytype {
        enctype: Enctype::AES128_CTS_HMAC_SHA1_96,
        name: "aes128-cts-hmac-sha1-96",
        mask: 0x08,
        flags: 0,
    },
    Keytype {
        enctype: Enctype::DES3_CBC_SHA1,
        name: "des3-cbc-sha1",
        mask: 0,
        flags: ETYPE_DEPRECATED,
    },
    Keytype {
        enctype: Enctype::ARCFOUR_HMAC,
        name: "arcfour-hmac",
        mask: 0x04,
        flags: ETYPE_DEPRECATED,
    },
    Keytype {
        enctype: Enctype::DES_CBC_MD5,
        name: "des-cbc-md5",
        mask: 0x02,
        flags: ETYPE_DEPRECATED,
    },
    Keytype {
        enctype: Enctype::DES_CBC_CRC,
        name: "des-cbc-crc",
        mask: 0x01,
        flags: ETYPE_DEPRECATED,
    },
];

/// The set written to new accounts when neither the caller nor the
/// directory supplies one.
pub const DEFAULT_ENCTYPES: [Enctype; 6] = [
    Enctype::AES256_CTS_HMAC_SHA1_96,
    Enctype::AES128_CTS_HMAC_SHA1_96,
    Enctype::DES3_CBC_SHA1,
    Enctype::ARCFOUR_HMAC,
    Enctype::DES_CBC_MD5,
    Enctype::DES_CBC_CRC,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enctype(pub i32);

macro_rules! enctype {
    ($enctype:ident, $int:expr) => {
        pub const $enctype: Enctype = Enctype($int);
    };
}

impl Enctype {
    enctype!(NULL, 0x0000);
    enctype!(DES_CBC_CRC, 0x0001);
    enctype!(DES_CBC_MD5, 0x0003);
    enctype!(DES3_CBC_SHA1, 0x0010);
    // RFC 3962
    enctype!(AES128_CTS_HMAC_SHA1_96, 0x0011);
    // RFC 3962
    enctype!(AES256_CTS_HMAC_SHA1_96, 0x0012);
    // RFC 4757
    enctype!(ARCFOUR_HMAC, 0x0017);

    pub fn is_deprecated(self) -> bool {
        Keytype::find_enctype(self)
            .map(|keytype| keytype.flags & ETYPE_DEPRECATED != 0)
            .unwrap_or(true)
    }

    pub fn name(self) -> anyhow::Result<&'static str> {
        Keytype::find_enctype(self)
            .map(|keytype| keytype.name)
            .ok_or_else(|| anyhow::anyhow!("Invalid enctype: {}", self.0))
    }

    pub fn deprecated_name(self) -> anyhow::Result<String> {
        let name = self.name()?;
        if self.is_deprecated() {
            Ok(format!("DEPRECATED:{}", name))
        } else {
            Ok(name.to_owned())
        }
    }
}

struct Keytype {
    enctype: Enctype,
    name: &'static str,
    mask: u32,
    flags: Flags,
}

impl Keytype {
    fn find_enctype(enctype: Enctype) -> Option<&'static Self> {
        KEYTYPES.iter().filter(|ktp| ktp.enctype == enctype).next()
    }
}

/// Decodes a `msDS-supportedEncryptionTypes` value into an enctype list,
/// strongest first. Returns `None` when the value is not a number or no
/// bit in it maps to a known enctype.
pub fn parse_supported_enctypes(value: &str) -> Option<Vec<Enctype>> {
    let mask: u32 = value.trim().parse().ok()?;
    let enctypes: Vec<Enctype> = KEYTYPES
        .iter()
        .filter(|ktp| ktp.mask != 0 && mask & ktp.mask != 0)
        .map(|ktp| ktp.enctype)
        .collect();
    if enctypes.is_empty() {
        None
    } else {
        Some(enctypes)
    }
}

/// Encodes an enctype list as a `msDS-supportedEncryptionTypes` value.
/// Returns `None` when no entry can be represented in the attribute.
pub fn format_supported_enctypes(enctypes: &[Enctype]) -> Option<String> {
    let mask = enctypes
        .iter()
        .filter_map(|enctype| Keytype::find_enctype(*enctype))
        .fold(0u32, |mask, ktp| mask | ktp.mask);
    if mask == 0 {
        None
    } else {
        Some(mask.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mask_strongest_first() {
        assert_eq!(
            parse_supported_enctypes("28"),
            Some(vec![
                Enctype::AES256_CTS_HMAC_SHA1_96,
                Enctype::AES128_CTS_HMAC_SHA1_96,
                Enctype::ARCFOUR_HMAC,
            ])
        );
    }

    #[test]
    fn rejects_unusable_masks() {
        assert_eq!(parse_supported_enctypes("0"), None);
        assert_eq!(parse_supported_enctypes("garbage"), None);
        // Bits nothing maps to
        assert_eq!(parse_supported_enctypes("2048"), None);
    }

    #[test]
    fn formats_known_bits_and_skips_des3() {
        let formatted = format_supported_enctypes(&DEFAULT_ENCTYPES).unwrap();
        assert_eq!(formatted, "31");
        assert_eq!(format_supported_enctypes(&[Enctype::DES3_CBC_SHA1]), None);
    }

    #[test]
    fn round_trips_through_the_attribute() {
        let enctypes = [
            Enctype::AES256_CTS_HMAC_SHA1_96,
            Enctype::ARCFOUR_HMAC,
        ];
        let value = format_supported_enctypes(&enctypes).unwrap();
        assert_eq!(parse_supported_enctypes(&value).unwrap(), enctypes.to_vec());
    }

    #[test]
    fn names_mark_deprecated_types() {
        assert_eq!(
            Enctype::AES256_CTS_HMAC_SHA1_96.deprecated_name().unwrap(),
            "aes256-cts-hmac-sha1-96"
        );
        assert_eq!(
            Enctype::ARCFOUR_HMAC.deprecated_name().unwrap(),
            "DEPRECATED:arcfour-hmac"
        );
        assert!(Enctype(0x01ff).name().is_err());
    }
}
