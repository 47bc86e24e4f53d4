//! Base command vocabulary spoken to a measurement source.

use std::fmt;

use crate::error::{RelayError, Result};

/// Parameter groups a source may be asked for.
const UNSUPPORTED_PARAMETERS: [&str; 3] = ["force", "analog", "events"];

/// Commands a live device or the emulator understands.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseCommand {
    Version(Option<String>),
    /// Requested parameter groups, lowercased; empty means all.
    SendParameters(Vec<String>),
    SendCurrentFrame,
    StreamFrames(StreamRequest),
    Bye,
}

/// Arguments of `STREAMFRAMES`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamRequest {
    Start { frequency: Option<f64> },
    Stop,
}

impl BaseCommand {
    /// Parse command text: case-insensitive, whitespace-separated, leading `_` ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let lowered = text.trim().trim_start_matches('_').to_ascii_lowercase();
        let mut words = lowered.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<String> = words.map(str::to_string).collect();

        match name {
            "version" => Ok(BaseCommand::Version(args.into_iter().next())),
            "sendparameters" => Ok(BaseCommand::SendParameters(args)),
            "sendcurrentframe" => Ok(BaseCommand::SendCurrentFrame),
            "streamframes" => {
                if args.iter().any(|a| a.starts_with("stop")) {
                    return Ok(BaseCommand::StreamFrames(StreamRequest::Stop));
                }
                let frequency = args
                    .iter()
                    .filter_map(|a| a.strip_prefix("frequency:"))
                    .find_map(|f| f.parse::<f64>().ok())
                    .filter(|f| f.is_finite() && *f > 0.0);
                Ok(BaseCommand::StreamFrames(StreamRequest::Start { frequency }))
            }
            "bye" => Ok(BaseCommand::Bye),
            _ => Err(RelayError::protocol(format!("Unknown command: {}", text.trim()))),
        }
    }

    /// Parameter groups this side cannot provide, if any were requested.
    pub fn unsupported_parameters(&self) -> Vec<&str> {
        match self {
            BaseCommand::SendParameters(groups) => groups
                .iter()
                .map(String::as_str)
                .filter(|g| UNSUPPORTED_PARAMETERS.contains(g))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for BaseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseCommand::Version(Some(version)) => write!(f, "version {version}"),
            BaseCommand::Version(None) => f.write_str("version"),
            BaseCommand::SendParameters(groups) if groups.is_empty() => {
                f.write_str("sendparameters all")
            }
            BaseCommand::SendParameters(groups) => write!(f, "sendparameters {}", groups.join(" ")),
            BaseCommand::SendCurrentFrame => f.write_str("sendcurrentframe"),
            BaseCommand::StreamFrames(StreamRequest::Stop) => f.write_str("streamframes stop"),
            BaseCommand::StreamFrames(StreamRequest::Start { frequency: Some(hz) }) => {
                write!(f, "streamframes frequency:{hz}")
            }
            BaseCommand::StreamFrames(StreamRequest::Start { frequency: None }) => {
                f.write_str("streamframes")
            }
            BaseCommand::Bye => f.write_str("bye"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() -> anyhow::Result<()> {
        assert_eq!(BaseCommand::parse("SendCurrentFrame 6d")?, BaseCommand::SendCurrentFrame);
        assert_eq!(BaseCommand::parse("_Version 1.0")?, BaseCommand::Version(Some("1.0".into())));
        assert_eq!(
            BaseCommand::parse("StreamFrames Frequency:100")?,
            BaseCommand::StreamFrames(StreamRequest::Start { frequency: Some(100.0) })
        );
        assert_eq!(
            BaseCommand::parse("streamframes stop")?,
            BaseCommand::StreamFrames(StreamRequest::Stop)
        );
        assert_eq!(BaseCommand::parse("BYE")?, BaseCommand::Bye);
        Ok(())
    }

    #[test]
    fn unknown_commands_keep_their_text() {
        match BaseCommand::parse("setbyteorder big") {
            Err(RelayError::Protocol { message }) => {
                assert_eq!(message, "Unknown command: setbyteorder big")
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
        assert!(BaseCommand::parse("").is_err());
    }

    #[test]
    fn unsupported_parameter_groups() -> anyhow::Result<()> {
        let command = BaseCommand::parse("sendparameters 3d Force")?;
        assert_eq!(command.unsupported_parameters(), ["force"]);
        assert!(BaseCommand::parse("sendparameters all")?.unsupported_parameters().is_empty());
        Ok(())
    }

    #[test]
    fn display_parses_back() -> anyhow::Result<()> {
        for command in [
            BaseCommand::Version(Some("1.0".into())),
            BaseCommand::SendCurrentFrame,
            BaseCommand::StreamFrames(StreamRequest::Start { frequency: Some(100.0) }),
            BaseCommand::StreamFrames(StreamRequest::Stop),
            BaseCommand::Bye,
        ] {
            assert_eq!(BaseCommand::parse(&command.to_string())?, command);
        }
        Ok(())
    }
}
