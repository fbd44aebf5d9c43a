//! Deadline propagation headers: `Connect-Timeout-Ms` and `Grpc-Timeout`.

use std::time::Duration;

use crate::error::ConnectError;

/// `Connect-Timeout-Ms` carries at most this many digits.
const CONNECT_TIMEOUT_MAX_DIGITS: usize = 10;

/// `Grpc-Timeout` carries at most this many digits before its unit.
const GRPC_TIMEOUT_MAX_DIGITS: usize = 8;
const GRPC_TIMEOUT_MAX_VALUE: u128 = 99_999_999;

/// Parse `Connect-Timeout-Ms`.
pub fn parse_connect_timeout(value: &str) -> Result<Duration, ConnectError> {
    if value.is_empty()
        || value.len() > CONNECT_TIMEOUT_MAX_DIGITS
        || !value.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(ConnectError::invalid_argument(format!(
            "protocol error: invalid Connect-Timeout-Ms {value:?}"
        )));
    }
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConnectError::invalid_argument(format!("protocol error: invalid Connect-Timeout-Ms {value:?}: {e}")))
}

/// Encode `Connect-Timeout-Ms`, saturating at ten digits.
pub fn encode_connect_timeout(timeout: Duration) -> String {
    let millis = timeout.as_millis().min(9_999_999_999);
    millis.to_string()
}

/// Parse `Grpc-Timeout`: 1 to 8 digits followed by `H`, `M`, `S`, `m`, `u` or `n`.
pub fn parse_grpc_timeout(value: &str) -> Result<Duration, ConnectError> {
    let invalid =
        || ConnectError::invalid_argument(format!("protocol error: invalid Grpc-Timeout {value:?}"));
    if value.len() < 2 || !value.is_ascii() {
        return Err(invalid());
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > GRPC_TIMEOUT_MAX_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return Err(invalid()),
    };
    Ok(timeout)
}

/// Encode `Grpc-Timeout` with the finest unit that fits in eight digits.
pub fn encode_grpc_timeout(timeout: Duration) -> String {
    let nanos = timeout.as_nanos();
    let units: [(u128, char); 6] = [
        (1, 'n'),
        (1_000, 'u'),
        (1_000_000, 'm'),
        (1_000_000_000, 'S'),
        (60_000_000_000, 'M'),
        (3_600_000_000_000, 'H'),
    ];
    for (scale, unit) in units {
        let value = nanos.div_ceil(scale);
        if value <= GRPC_TIMEOUT_MAX_VALUE {
            return format!("{value}{unit}");
        }
    }
    format!("{GRPC_TIMEOUT_MAX_VALUE}H")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;

    #[test]
    fn test_connect_timeout() {
        assert_eq!(parse_connect_timeout("0").unwrap(), Duration::ZERO);
        assert_eq!(
            parse_connect_timeout("1500").unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(
            parse_connect_timeout("9999999999").unwrap(),
            Duration::from_millis(9_999_999_999)
        );
        for bad in ["", "10s", "-1", "12345678901", " 1"] {
            let err = parse_connect_timeout(bad).unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "{bad:?}");
            assert_eq!(err.code().http_status(), http::StatusCode::BAD_REQUEST);
        }
        assert_eq!(encode_connect_timeout(Duration::from_millis(250)), "250");
    }

    #[test]
    fn test_grpc_timeout_parse() {
        assert_eq!(parse_grpc_timeout("1H").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_grpc_timeout("2M").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_grpc_timeout("3S").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_grpc_timeout("4m").unwrap(), Duration::from_millis(4));
        assert_eq!(parse_grpc_timeout("5u").unwrap(), Duration::from_micros(5));
        assert_eq!(parse_grpc_timeout("99999999n").unwrap(), Duration::from_nanos(99_999_999));
        for bad in ["", "S", "1", "1x", "123456789S", "-1S", "1.5S"] {
            assert_eq!(
                parse_grpc_timeout(bad).unwrap_err().code(),
                Code::InvalidArgument,
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_grpc_timeout_encode() {
        assert_eq!(encode_grpc_timeout(Duration::from_nanos(500)), "500n");
        assert_eq!(encode_grpc_timeout(Duration::from_millis(100)), "100000u");
        assert_eq!(encode_grpc_timeout(Duration::from_secs(1)), "1000000u");
        assert_eq!(encode_grpc_timeout(Duration::from_secs(1000)), "1000000m");
        assert_eq!(encode_grpc_timeout(Duration::from_secs(500_000)), "500000S");
        let encoded = encode_grpc_timeout(Duration::from_secs(10));
        assert_eq!(parse_grpc_timeout(&encoded).unwrap(), Duration::from_secs(10));
    }
}
