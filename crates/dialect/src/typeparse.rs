use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // base name, optional (p[,s]) suffix, optional [] array suffix.
    static ref TYPE_SUFFIX: Regex =
        Regex::new(r"^\s*([A-Za-z0-9_ ]+?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?\s*(\[\s*\])?\s*$")
            .unwrap();
}

/// The pieces of a native type string: lowercased base name, optional
/// length-or-precision, optional scale, and whether an array suffix was
/// present. Strings that don't match at all come back whole as the base.
pub(crate) struct NativeTypeParts {
    pub base: String,
    pub length_or_precision: Option<u32>,
    pub scale: Option<u32>,
    pub is_array: bool,
}

pub(crate) fn split_native_type(native: &str) -> NativeTypeParts {
    // Postgres catalogs spell array types with a leading underscore.
    let (native, leading_array) = match native.strip_prefix('_') {
        Some(rest) => (rest, true),
        None => (native, false),
    };

    match TYPE_SUFFIX.captures(native) {
        Some(captures) => NativeTypeParts {
            base: captures[1].trim().to_lowercase(),
            length_or_precision: captures.get(2).and_then(|m| m.as_str().parse().ok()),
            scale: captures.get(3).and_then(|m| m.as_str().parse().ok()),
            is_array: leading_array || captures.get(4).is_some(),
        },
        None => NativeTypeParts {
            base: native.trim().to_lowercase(),
            length_or_precision: None,
            scale: None,
            is_array: leading_array,
        },
    }
}

#[cfg(test)]
mod test {
    use super::split_native_type;

    #[test]
    fn splits_suffixes() {
        let parts = split_native_type("varchar(255)");
        assert_eq!(parts.base, "varchar");
        assert_eq!(parts.length_or_precision, Some(255));
        assert_eq!(parts.scale, None);
        assert!(!parts.is_array);

        let parts = split_native_type("NUMERIC(10, 2)");
        assert_eq!(parts.base, "numeric");
        assert_eq!(parts.length_or_precision, Some(10));
        assert_eq!(parts.scale, Some(2));

        let parts = split_native_type("character varying (64)");
        assert_eq!(parts.base, "character varying");
        assert_eq!(parts.length_or_precision, Some(64));

        let parts = split_native_type("integer[]");
        assert_eq!(parts.base, "integer");
        assert!(parts.is_array);

        let parts = split_native_type("_int4");
        assert_eq!(parts.base, "int4");
        assert!(parts.is_array);

        let parts = split_native_type("timestamp without time zone");
        assert_eq!(parts.base, "timestamp without time zone");
    }
}
