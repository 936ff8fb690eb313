use std::thread;
use std::time::{Duration, Instant};

use mc_toolkit::osc::{infer_argument, Message};
use mc_toolkit::session::{Incoming, OscSession};

use crate::cli;
use crate::context;
use crate::exit_codes;
use crate::output::{Direction, Event, Reporter};

const IDLE_SLEEP: Duration = Duration::from_millis(5);

pub fn run(args: cli::SendArgs, out: &mut dyn Reporter) -> i32 {
    let msg = match build_message(&args.address, &args.args) {
        Ok(m) => m,
        Err(e) => return fail(out, exit_codes::EXIT_INVALID_INPUT, e),
    };

    let Some(transport) = context::control_transport(&args) else {
        return fail(
            out,
            exit_codes::EXIT_INVALID_INPUT,
            "pass --port or --udp".to_string(),
        );
    };

    let mut session = OscSession::new(transport);
    if let Err(e) = session.open() {
        return fail(out, exit_codes::EXIT_NO_DEVICE, e.to_string());
    }
    let device = session.transport().describe();

    if let Err(e) = session.send_now(&msg) {
        let _ = session.close();
        return fail(out, exit_codes::EXIT_WRITE_FAILED, e.to_string());
    }
    out.emit(Event::Message {
        direction: Direction::Sent,
        device: device.clone(),
        message: msg,
    });

    let deadline = Instant::now() + Duration::from_millis(args.listen_ms);
    let mut code = exit_codes::EXIT_OK;
    while Instant::now() < deadline {
        match session.poll() {
            Ok(Some(Incoming::Packet(packet))) => {
                for m in packet.messages() {
                    out.emit(Event::Message {
                        direction: Direction::Received,
                        device: device.clone(),
                        message: m.clone(),
                    });
                }
            }
            Ok(Some(Incoming::Malformed(e))) => out.emit(Event::Malformed {
                device: device.clone(),
                reason: e.to_string(),
            }),
            Ok(None) => thread::sleep(IDLE_SLEEP),
            Err(e) => {
                code = fail(out, exit_codes::EXIT_UNEXPECTED, e.to_string());
                break;
            }
        }
    }

    if let Err(e) = session.close() {
        tracing::debug!(device = %device, "close: {e}");
    }
    code
}

/// Validate the address, then type each argument the way the board's
/// console does. Arguments are taken whole, so strings may contain spaces.
fn build_message(address: &str, args: &[String]) -> Result<Message, String> {
    let mut msg = Message::parse_command(address).map_err(|e| e.to_string())?;
    if !msg.args.is_empty() {
        return Err(format!("address must not contain spaces: {address:?}"));
    }
    for a in args {
        msg.push(infer_argument(a));
    }
    Ok(msg)
}

fn fail(out: &mut dyn Reporter, code: i32, message: String) -> i32 {
    out.emit(Event::Error { code, message });
    code
}

#[cfg(test)]
mod tests {
    use mc_toolkit::osc::Argument;

    use super::build_message;

    #[test]
    fn arguments_are_typed_individually() {
        let msg = build_message(
            "/system/name",
            &["my board".to_string(), "-3".to_string(), "0.25".to_string()],
        )
        .unwrap();
        assert_eq!(
            msg.args,
            vec![
                Argument::String("my board".to_string()),
                Argument::Int(-3),
                Argument::Float(0.25),
            ]
        );
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(build_message("appled/0/state", &[]).is_err());
        assert!(build_message("/a /b", &[]).is_err());
        assert!(build_message("", &[]).is_err());
    }
}
