//! Id list parsing.

use crate::error::IdsError;

/// Parses a comma separated list of canonical non-negative integers.
///
/// `None` and the empty string yield an empty list. Every token must be a
/// decimal number without sign, whitespace or leading zeros (`0` itself is
/// accepted). `thing` names the parameter in the error message.
pub fn parse_id_list(thing: &str, list: Option<&str>) -> Result<Vec<u64>, IdsError> {
    let list = match list {
        None => return Ok(Vec::new()),
        Some(l) if l.is_empty() => return Ok(Vec::new()),
        Some(l) => l,
    };

    let invalid = || {
        IdsError::BadRequest(format!(
            "The {} parameter '{}' is not a valid string representation of a comma separated list of longs",
            thing, list
        ))
    };

    list.split(',')
        .map(|token| {
            if !is_canonical(token) {
                return Err(invalid());
            }
            token.parse::<u64>().map_err(|_| invalid())
        })
        .collect()
}

fn is_canonical(token: &str) -> bool {
    let bytes = token.as_bytes();
    match bytes {
        [] => false,
        [b'0'] => true,
        [b'0', ..] => false,
        _ => bytes.iter().all(u8::is_ascii_digit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_canonical_lists() {
        assert_eq!(parse_id_list("datasetIds", None).unwrap(), Vec::<u64>::new());
        assert_eq!(parse_id_list("datasetIds", Some("")).unwrap(), Vec::<u64>::new());
        assert_eq!(parse_id_list("datasetIds", Some("0")).unwrap(), vec![0]);
        assert_eq!(
            parse_id_list("datasetIds", Some("1,22,333")).unwrap(),
            vec![1, 22, 333]
        );
    }

    #[test]
    fn test_rejects_malformed_tokens() {
        for bad in [
            "01", "1, 2", " 1", "1,", ",1", "1,,2", "-1", "+1", "1.0", "abc", "1;2",
            "99999999999999999999999",
        ] {
            let err = parse_id_list("datafileIds", Some(bad)).unwrap_err();
            assert_eq!(err.kind(), "BadRequestException", "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_error_message_names_parameter() {
        let err = parse_id_list("investigationIds", Some("x")).unwrap_err();
        assert!(err.to_string().contains("investigationIds"));
        assert!(err.to_string().contains("'x'"));
    }

    proptest! {
        #[test]
        fn prop_canonical_lists_parse_back(ids in prop::collection::vec(any::<u64>(), 1..20)) {
            let text = ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
            prop_assert_eq!(parse_id_list("ids", Some(&text)).unwrap(), ids);
        }

        #[test]
        fn prop_leading_zero_rejected(id in 0u64..1_000_000) {
            let text = format!("0{}", id);
            prop_assert!(parse_id_list("ids", Some(&text)).is_err());
        }

        #[test]
        fn prop_embedded_whitespace_rejected(a in 0u64..1000, b in 0u64..1000, ws in "[ \t]{1,3}") {
            let text = format!("{},{}{}", a, ws, b);
            prop_assert!(parse_id_list("ids", Some(&text)).is_err());
        }
    }
}
