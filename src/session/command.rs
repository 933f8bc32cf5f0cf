//! Control-channel command protocol
//!
//! Commands are text messages starting with the gesture token `🤏`
//! followed by a command word. Anything else is free text for the chat
//! fallback.
//!
//! | Message                                 | Effect                       |
//! |-----------------------------------------|------------------------------|
//! | `🤏 start_gesture_analysis`             | enable analysis              |
//! | `🤏 stop_gesture_analysis`              | disable analysis             |
//! | `🤏 set_analysis_interval <secs>`       | change the sampling interval |
//! | `🤏 set_confidence_threshold <0-100>`   | change the result threshold  |

use std::time::Duration;

use crate::gesture::router::animation_message;

/// Prefix token of every gesture command and reply
pub const GESTURE_TOKEN: &str = "🤏";

pub const START_COMMAND: &str = "start_gesture_analysis";
pub const STOP_COMMAND: &str = "stop_gesture_analysis";
pub const SET_INTERVAL_COMMAND: &str = "set_analysis_interval";
pub const SET_THRESHOLD_COMMAND: &str = "set_confidence_threshold";

/// A parsed control-channel message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    StartAnalysis,
    StopAnalysis,
    SetInterval(Duration),
    SetThreshold(i64),
    /// Gesture command with a missing or unparsable argument
    Invalid(String),
    /// Not a command
    Text(String),
}

impl ControlCommand {
    pub fn parse(message: &str) -> Self {
        let trimmed = message.trim();
        let Some(rest) = trimmed.strip_prefix(GESTURE_TOKEN) else {
            return ControlCommand::Text(message.to_string());
        };
        let rest = rest.trim_start();

        if rest.starts_with(START_COMMAND) {
            ControlCommand::StartAnalysis
        } else if rest.starts_with(STOP_COMMAND) {
            ControlCommand::StopAnalysis
        } else if let Some(arg) = rest.strip_prefix(SET_INTERVAL_COMMAND) {
            match arg.trim().parse::<f64>().ok().map(Duration::try_from_secs_f64) {
                Some(Ok(interval)) => ControlCommand::SetInterval(interval),
                _ => ControlCommand::Invalid(format!(
                    "{} expects seconds, got '{}'",
                    SET_INTERVAL_COMMAND,
                    arg.trim()
                )),
            }
        } else if let Some(arg) = rest.strip_prefix(SET_THRESHOLD_COMMAND) {
            match arg.trim().parse::<i64>() {
                Ok(n) => ControlCommand::SetThreshold(n),
                Err(_) => ControlCommand::Invalid(format!(
                    "{} expects an integer 0-100, got '{}'",
                    SET_THRESHOLD_COMMAND,
                    arg.trim()
                )),
            }
        } else {
            ControlCommand::Text(message.to_string())
        }
    }
}

pub fn analysis_started() -> String {
    format!("{} ✅ Gesture analysis started", GESTURE_TOKEN)
}

pub fn analysis_stopped() -> String {
    format!("{} ⏹️ Gesture analysis stopped", GESTURE_TOKEN)
}

pub fn analyzer_unavailable() -> String {
    format!("{} ❌ No gesture analyzer available", GESTURE_TOKEN)
}

/// One-time animation sent right after analysis starts
pub fn test_animation() -> String {
    animation_message("🎯", "test_activation")
}

pub fn interval_set(effective: Duration) -> String {
    format!(
        "{} ⏱️ Analysis interval set to {:.1}s",
        GESTURE_TOKEN,
        effective.as_secs_f64()
    )
}

pub fn threshold_set(effective: u8) -> String {
    format!("{} 🎚️ Confidence threshold set to {}%", GESTURE_TOKEN, effective)
}

pub fn invalid_command(reason: &str) -> String {
    format!("{} ⚠️ {}", GESTURE_TOKEN, reason)
}

pub fn greeting() -> String {
    "🎉 Hello from the server! The data channel is open.".to_string()
}

pub fn connection_id(id: &str) -> String {
    format!("🆔 Connection ID: {}", id)
}

pub fn heartbeat(seq: u64, time: &str) -> String {
    format!("🤖 Heartbeat #{} from server - {}", seq, time)
}

pub fn chat_reply(text: &str) -> String {
    format!("🤖 Model response: {}", text)
}

pub fn echo(text: &str) -> String {
    format!("📢 Echo from server: {}", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toggle_commands() {
        assert_eq!(
            ControlCommand::parse("🤏 start_gesture_analysis"),
            ControlCommand::StartAnalysis
        );
        assert_eq!(
            ControlCommand::parse("🤏start_gesture_analysis now please"),
            ControlCommand::StartAnalysis
        );
        assert_eq!(
            ControlCommand::parse("  🤏 stop_gesture_analysis\n"),
            ControlCommand::StopAnalysis
        );
    }

    #[test]
    fn test_parse_tunables() {
        assert_eq!(
            ControlCommand::parse("🤏 set_analysis_interval 3.5"),
            ControlCommand::SetInterval(Duration::from_millis(3500))
        );
        assert_eq!(
            ControlCommand::parse("🤏 set_confidence_threshold 150"),
            ControlCommand::SetThreshold(150)
        );
        assert!(matches!(
            ControlCommand::parse("🤏 set_analysis_interval soon"),
            ControlCommand::Invalid(_)
        ));
        assert!(matches!(
            ControlCommand::parse("🤏 set_confidence_threshold"),
            ControlCommand::Invalid(_)
        ));
    }

    #[test]
    fn test_out_of_range_interval_is_invalid() {
        for arg in ["1e30", "-2", "inf", "NaN"] {
            let cmd = ControlCommand::parse(&format!("🤏 set_analysis_interval {}", arg));
            assert!(matches!(cmd, ControlCommand::Invalid(_)), "{} -> {:?}", arg, cmd);
        }
    }

    #[test]
    fn test_everything_else_is_text() {
        assert_eq!(
            ControlCommand::parse("start_gesture_analysis"),
            ControlCommand::Text("start_gesture_analysis".to_string())
        );
        assert_eq!(
            ControlCommand::parse("🤏 dance"),
            ControlCommand::Text("🤏 dance".to_string())
        );
        assert_eq!(ControlCommand::parse(""), ControlCommand::Text(String::new()));
    }

    #[test]
    fn test_messages() {
        assert_eq!(test_animation(), "GESTURE_ANIMATION:🎯:test_activation");
        assert_eq!(heartbeat(3, "12:00:01"), "🤖 Heartbeat #3 from server - 12:00:01");
        assert_eq!(echo("hi"), "📢 Echo from server: hi");
        assert!(analyzer_unavailable().starts_with(GESTURE_TOKEN));
    }
}
