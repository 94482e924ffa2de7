//! Response classification for the device wire protocol
//!
//! The device answers every command on the same line-oriented stream it uses
//! for unsolicited output, and sometimes re-echoes an already answered
//! exchange before the real reply arrives. Classification is therefore done
//! against the command that was sent: a reply whose first two characters
//! match the command answers it, a reply starting with `NO` is a rejection,
//! and anything else is stale traffic to be read past.

/// Outcome category of a classified reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Echo matched and the numeric payload decoded
    Answered,
    /// Echo matched with no numeric payload, a pure acknowledgement
    NoNumbers,
    /// Echo matched but the payload failed numeric decoding
    ValueError,
    /// Device rejected the command with an error code
    DeviceError,
    /// Reply belongs to another exchange, not yet the real answer
    Stale,
}

/// A reply parsed against the command that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub raw: String,
    pub numbers: Vec<f64>,
    pub kind: ResponseKind,
    pub error: Option<String>,
}

/// Payload stored when an answer carries no usable numbers
const SENTINEL_PAYLOAD: f64 = 1.0;

/// Classify `reply` against the command `cmd` that was sent
///
/// Pure function: the same `(reply, cmd)` pair always classifies the same
/// way. `hex_numbers` selects hexadecimal payload decoding, used only for
/// the queue-status command.
pub fn classify(reply: &str, cmd: &str, hex_numbers: bool) -> ParsedResponse {
    let trimmed = reply.trim();
    let echo = &cmd[..cmd.len().min(2)];

    if !echo.is_empty() && trimmed.starts_with(echo) {
        let payload = &trimmed[echo.len()..];
        let filtered: String = payload
            .chars()
            .map(|c| if keep_char(c, hex_numbers) { c } else { ' ' })
            .collect();

        if filtered.split_whitespace().next().is_none() {
            return ParsedResponse {
                raw: trimmed.to_string(),
                numbers: vec![SENTINEL_PAYLOAD],
                kind: ResponseKind::NoNumbers,
                error: None,
            };
        }

        let decoded: std::result::Result<Vec<f64>, ()> = filtered
            .split_whitespace()
            .map(|token| {
                if hex_numbers {
                    u64::from_str_radix(token, 16).map(|v| v as f64).map_err(|_| ())
                } else {
                    token.parse::<f64>().map_err(|_| ())
                }
            })
            .collect();

        return match decoded {
            Ok(numbers) => ParsedResponse {
                raw: trimmed.to_string(),
                numbers,
                kind: ResponseKind::Answered,
                error: None,
            },
            Err(()) => ParsedResponse {
                raw: trimmed.to_string(),
                numbers: vec![SENTINEL_PAYLOAD],
                kind: ResponseKind::ValueError,
                error: None,
            },
        };
    }

    if trimmed.starts_with("NO") {
        let code = trimmed.split_whitespace().nth(1).unwrap_or("").to_string();
        return ParsedResponse {
            raw: trimmed.to_string(),
            numbers: Vec::new(),
            kind: ResponseKind::DeviceError,
            error: Some(code),
        };
    }

    ParsedResponse {
        raw: trimmed.to_string(),
        numbers: Vec::new(),
        kind: ResponseKind::Stale,
        error: None,
    }
}

fn keep_char(c: char, hex_numbers: bool) -> bool {
    if hex_numbers {
        c.is_ascii_hexdigit()
    } else {
        c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')
    }
}

/// Human-readable meaning of a device error code
pub fn describe_error(code: &str) -> &'static str {
    match code {
        "1" => "framing error",
        "2" => "reserved for future use",
        "3" => "unrecognized command",
        "4" => "message too large",
        "5" => "unimplemented instruction or non-decodable parameters",
        "6" => "motion queue is full, movement command rejected",
        "7" => "travel bounds exceeded",
        "8" => "maximum velocity exceeded",
        "9" => "maximum acceleration exceeded",
        "A" => "instrument is operating autonomously, command rejected",
        "B" => "invalid adjustment size",
        "C" => "invalid total adjustment",
        "D" => "duration out of range",
        "E" => "reserved for future use",
        "F" => "illegal extent specified",
        "G" => "attempt to access password-protected data",
        "Y" => "hardware failure detected",
        "Z" => "illegal internal firmware state",
        "Q" => "command received but not executed, instrument is in manual mode",
        "R" => "command received but not executed, instrument is updating time from GPS",
        "P" => "command received but not executed, password was not correct",
        "10" => "session kept losing authentication",
        _ => "unknown error code",
    }
}

/// Error code the device returns when write-protected data is touched
/// without authentication.
pub const PROTECTION_ERROR_CODE: &str = "G";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_echo_with_numbers_is_answered() {
        let parsed = classify("CP 123.45 67.89\r\n", "CP", false);
        assert_eq!(parsed.kind, ResponseKind::Answered);
        assert_eq!(parsed.numbers, vec![123.45, 67.89]);
        assert!(parsed.error.is_none());
    }

    #[test]
    fn echo_is_matched_on_first_two_characters_only() {
        // The device echoes only the verb, not the arguments.
        let parsed = classify("PO 180.0", "PO 0 180.0", false);
        assert_eq!(parsed.kind, ResponseKind::Answered);
        assert_eq!(parsed.numbers, vec![180.0]);
    }

    #[test]
    fn bare_acknowledgement_yields_sentinel() {
        let parsed = classify("HO", "HO", false);
        assert_eq!(parsed.kind, ResponseKind::NoNumbers);
        assert_eq!(parsed.numbers, vec![1.0]);
    }

    #[test]
    fn undecodable_payload_yields_value_error() {
        // Stray signs survive the filter but do not parse as numbers.
        let parsed = classify("VE -.-", "VE", false);
        assert_eq!(parsed.kind, ResponseKind::ValueError);
        assert_eq!(parsed.numbers, vec![1.0]);
    }

    #[test]
    fn version_text_decodes_leading_number() {
        let parsed = classify("VE 8.107", "VE", false);
        assert_eq!(parsed.kind, ResponseKind::Answered);
        assert_eq!(parsed.numbers, vec![8.107]);
    }

    #[test]
    fn device_rejection_extracts_code() {
        let parsed = classify("NO G", "PO 0 10.0", false);
        assert_eq!(parsed.kind, ResponseKind::DeviceError);
        assert_eq!(parsed.error.as_deref(), Some("G"));
    }

    #[test]
    fn unrelated_reply_is_stale() {
        let parsed = classify("TI 2024 93 10 0 0", "CP", false);
        assert_eq!(parsed.kind, ResponseKind::Stale);
        assert!(parsed.numbers.is_empty());
    }

    #[test]
    fn empty_reply_is_stale() {
        let parsed = classify("", "CP", false);
        assert_eq!(parsed.kind, ResponseKind::Stale);
    }

    #[test]
    fn hex_payload_decodes_base_16() {
        let parsed = classify("QS 1f", "QS", true);
        assert_eq!(parsed.kind, ResponseKind::Answered);
        assert_eq!(parsed.numbers, vec![31.0]);
    }

    #[test]
    fn negative_numbers_decode() {
        let parsed = classify("AD -0.05 0.1", "AD", false);
        assert_eq!(parsed.numbers, vec![-0.05, 0.1]);
    }

    #[test]
    fn protection_code_is_described() {
        assert_eq!(
            describe_error("G"),
            "attempt to access password-protected data"
        );
        assert_eq!(describe_error("?"), "unknown error code");
    }
}
