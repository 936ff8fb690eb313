//! Typed messages from console-style text such as `/appled/0/state 1`.

use super::{encode::validate_address, Argument, FramingError, Message, OscError};

impl Message {
    /// Parse `"<address> [arg ...]"`, inferring each argument's type.
    pub fn parse_command(line: &str) -> Result<Message, OscError> {
        let mut tokens = line.split_whitespace();
        let address = tokens.next().ok_or(FramingError::Empty)?;
        validate_address(address)?;

        let mut msg = Message::new(address);
        for tok in tokens {
            msg.push(infer_argument(tok));
        }
        Ok(msg)
    }
}

/// Digits (with an optional leading '-') become an int, digits with exactly
/// one '.' become a float, anything else stays a string.
pub fn infer_argument(token: &str) -> Argument {
    let body = token.strip_prefix('-').unwrap_or(token);
    let numeric = !body.is_empty() && body.chars().all(|c| c.is_ascii_digit() || c == '.');

    if numeric {
        match body.matches('.').count() {
            0 => {
                if let Ok(v) = token.parse::<i32>() {
                    return Argument::Int(v);
                }
            }
            1 if body.len() > 1 => {
                if let Ok(v) = token.parse::<f32>() {
                    return Argument::Float(v);
                }
            }
            _ => {}
        }
    }
    Argument::String(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_argument_types() {
        assert_eq!(infer_argument("42"), Argument::Int(42));
        assert_eq!(infer_argument("-7"), Argument::Int(-7));
        assert_eq!(infer_argument("2.5"), Argument::Float(2.5));
        assert_eq!(infer_argument("-.5"), Argument::Float(-0.5));
        assert_eq!(infer_argument("1.2.3"), Argument::String("1.2.3".into()));
        assert_eq!(infer_argument("."), Argument::String(".".into()));
        assert_eq!(infer_argument("-"), Argument::String("-".into()));
        assert_eq!(infer_argument("on"), Argument::String("on".into()));
        assert_eq!(
            infer_argument("99999999999"),
            Argument::String("99999999999".into())
        );
    }

    #[test]
    fn parses_address_and_arguments() {
        let msg = Message::parse_command("  /servo/1/position   512 0.25 fast ").unwrap();
        assert_eq!(msg.address, "/servo/1/position");
        assert_eq!(msg.type_tag(), ",ifs");
    }

    #[test]
    fn bare_address_gets_empty_type_tag() {
        let msg = Message::parse_command("/system/info").unwrap();
        assert!(msg.args.is_empty());
        assert_eq!(msg.type_tag(), ",");
    }

    #[test]
    fn rejects_empty_and_relative_input() {
        assert_eq!(
            Message::parse_command("   ").unwrap_err(),
            OscError::Framing(FramingError::Empty)
        );
        assert!(matches!(
            Message::parse_command("led 1").unwrap_err(),
            OscError::Framing(FramingError::InvalidAddress(_))
        ));
    }
}
