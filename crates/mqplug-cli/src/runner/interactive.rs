//! Interactive conformance mode: one hook call per input line.

use std::io::Write;

use bytes::Bytes;
use mqplug_core::AppResult;
use mqplug_plugin::api::events::{
    AuthEvent, DisconnectEvent, DisconnectReason, PublishEvent, SubscribeEvent,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::call::HookCall;
use super::session::RunnerSession;

const HELP: &str = "\
Available commands:
  auth <client> <user> <password> <ip>
    Invoke on_auth
  subscribe <client> <user> <topic> <qos> [ip]
    Invoke on_subscribe
  publish <client> <user> <topic> <payload> <qos> [retain]
    Invoke on_publish
  disconnect <client> <user> [graceful|timeout|protocol_error]
    Invoke on_disconnect
  info
    Show plugin metadata and session state
  help
    Show this message
  exit / quit
    Close the plugin and leave";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Call(HookCall),
    Info,
    Help,
    Exit,
}

/// Reads commands from `input` until `exit`, `quit` or end of input.
pub async fn run_interactive<R, W>(
    session: &RunnerSession,
    input: R,
    out: &mut W,
) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "Interactive mode. Type 'help' for available commands.")?;
    writeln!(out)?;

    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };

        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                writeln!(out, "{message}")?;
                continue;
            }
        };

        match command {
            Command::Call(call) => match session.invoke(call).await {
                Ok(obs) => writeln!(out, "{obs}")?,
                Err(e) => writeln!(out, "error: {e}")?,
            },
            Command::Info => print_info(session, out)?,
            Command::Help => writeln!(out, "{HELP}")?,
            Command::Exit => {
                writeln!(out, "Bye!")?;
                break;
            }
        }
    }
    Ok(())
}

fn print_info<W: Write>(session: &RunnerSession, out: &mut W) -> std::io::Result<()> {
    if let Some(meta) = session.meta() {
        writeln!(out, "  Name:        {}", meta.name)?;
        writeln!(out, "  Version:     {}", meta.version)?;
        writeln!(out, "  SDK Version: {}", meta.sdk_version)?;
        writeln!(out, "  Runtime:     {}", meta.runtime_version)?;
        writeln!(
            out,
            "  Build Time:  {}",
            meta.build_time.as_deref().unwrap_or("unknown")
        )?;
    }
    writeln!(out, "  State:       {}", session.state())
}

/// `Ok(None)` for a blank line; `Err` carries the text to show the user.
fn parse(line: &str) -> Result<Option<Command>, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&cmd, args)) = parts.split_first() else {
        return Ok(None);
    };

    let command = match cmd {
        "auth" => {
            let [client, user, password, ip] = args else {
                return Err("Usage: auth <client> <user> <password> <ip>".into());
            };
            Command::Call(HookCall::Auth(AuthEvent {
                client_id: client.to_string(),
                username: user.to_string(),
                password: Bytes::copy_from_slice(password.as_bytes()),
                ip: ip.to_string(),
                threat_score: 0,
            }))
        }
        "subscribe" => {
            let (client, user, topic, qos, ip) = match args {
                [client, user, topic, qos] => (client, user, topic, qos, ""),
                [client, user, topic, qos, ip] => (client, user, topic, qos, *ip),
                _ => return Err("Usage: subscribe <client> <user> <topic> <qos> [ip]".into()),
            };
            Command::Call(HookCall::Subscribe(SubscribeEvent {
                client_id: client.to_string(),
                username: user.to_string(),
                topic: topic.to_string(),
                qos: parse_qos(qos)?,
                ip: ip.to_string(),
                threat_score: 0,
            }))
        }
        "publish" => {
            let (client, user, topic, payload, qos, retain) = match args {
                [client, user, topic, payload, qos] => (client, user, topic, payload, qos, false),
                [client, user, topic, payload, qos, retain] => (
                    client,
                    user,
                    topic,
                    payload,
                    qos,
                    matches!(*retain, "true" | "1"),
                ),
                _ => {
                    return Err(
                        "Usage: publish <client> <user> <topic> <payload> <qos> [retain]".into(),
                    );
                }
            };
            Command::Call(HookCall::Publish(PublishEvent {
                client_id: client.to_string(),
                username: user.to_string(),
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(payload.as_bytes()),
                qos: parse_qos(qos)?,
                retain,
            }))
        }
        "disconnect" => {
            let (client, user, reason) = match args {
                [client, user] => (client, user, DisconnectReason::Graceful),
                [client, user, reason] => (client, user, reason.parse::<DisconnectReason>()?),
                _ => return Err("Usage: disconnect <client> <user> [reason]".into()),
            };
            Command::Call(HookCall::Disconnect(DisconnectEvent {
                client_id: client.to_string(),
                username: user.to_string(),
                reason,
            }))
        }
        "info" => Command::Info,
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => {
            return Err(format!(
                "Unknown command: {other}. Type 'help' for available commands."
            ));
        }
    };
    Ok(Some(command))
}

fn parse_qos(raw: &str) -> Result<u8, String> {
    match raw.parse::<u8>() {
        Ok(qos) if qos <= 2 => Ok(qos),
        _ => Err(format!("invalid qos '{raw}' (expected 0, 1 or 2)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth() {
        let Ok(Some(Command::Call(HookCall::Auth(event)))) =
            parse("auth c1 admin secret 10.0.0.1")
        else {
            panic!("expected auth call");
        };
        assert_eq!(event.username, "admin");
        assert_eq!(&event.password[..], b"secret");
        assert_eq!(event.ip, "10.0.0.1");
    }

    #[test]
    fn test_parse_optional_arguments() {
        let Ok(Some(Command::Call(HookCall::Publish(event)))) = parse("publish c1 u t/1 hi 1 true")
        else {
            panic!("expected publish call");
        };
        assert!(event.retain);
        assert_eq!(event.qos, 1);

        let Ok(Some(Command::Call(HookCall::Disconnect(event)))) = parse("disconnect c1 u")
        else {
            panic!("expected disconnect call");
        };
        assert_eq!(event.reason, DisconnectReason::Graceful);
    }

    #[test]
    fn test_parse_errors_are_messages() {
        assert_eq!(parse("   "), Ok(None));
        assert_eq!(parse("quit"), Ok(Some(Command::Exit)));
        assert!(parse("auth c1 admin").unwrap_err().starts_with("Usage: auth"));
        assert!(parse("subscribe c1 u t 7").unwrap_err().contains("invalid qos '7'"));
        assert!(parse("disconnect c1 u sideways").unwrap_err().contains("unknown disconnect reason"));
        assert_eq!(
            parse("frobnicate").unwrap_err(),
            "Unknown command: frobnicate. Type 'help' for available commands."
        );
    }
}
