//! Action Language
//!
//! Action strings configured on a signal are either a prefixed host action
//! such as `*VOLUME=UP` or a plain shell command. Parameters after `=` are
//! separated by `**`.

use async_trait::async_trait;
use tracing::warn;

use crate::error::ActionError;

const PARAM_SEPARATOR: &str = "**";

/// Direction of a volume step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeDirection {
    Up,
    Down,
}

/// A parsed action string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `*ALERT=text`: show a user-visible alert
    Alert(String),
    /// `*VOLUME=UP|DOWN` or `*VOLUME_HIDDEN=UP|DOWN`
    Volume {
        direction: VolumeDirection,
        visible: bool,
    },
    /// `*MEDIA_BUTTON=KEYCODE`: dispatch a media key
    MediaButton(String),
    /// `*BUTTON_ROOT=KEYCODE`: inject a key event with elevated rights
    RootButton(String),
    /// `*INTENT=action**uri`
    Intent { action: String, uri: Option<String> },
    /// `*TASKER=task**param1**param2...`
    Tasker { task: String, params: Vec<String> },
    /// Anything else runs as a shell command
    Shell(String),
}

impl Action {
    /// Parse an action string; unknown prefixes fall through to a shell command
    pub fn parse(spec: &str) -> Result<Self, ActionError> {
        let spec = spec.trim();

        let Some(rest) = spec.strip_prefix('*') else {
            return Ok(Action::Shell(spec.to_string()));
        };
        let Some((name, value)) = rest.split_once('=') else {
            return Ok(Action::Shell(spec.to_string()));
        };
        let mut params = split_params(value);

        let action = match name {
            "VOLUME" | "VOLUME_HIDDEN" => Action::Volume {
                direction: parse_direction(params.first().map(String::as_str).unwrap_or(""))?,
                visible: name == "VOLUME",
            },
            "ALERT" => Action::Alert(value.trim().to_string()),
            "MEDIA_BUTTON" => Action::MediaButton(first_param("MEDIA_BUTTON", &params)?),
            "BUTTON_ROOT" => Action::RootButton(first_param("BUTTON_ROOT", &params)?),
            "INTENT" => {
                let action = first_param("INTENT", &params)?;
                Action::Intent {
                    action,
                    uri: params.get(1).cloned(),
                }
            }
            "TASKER" => {
                let task = first_param("TASKER", &params)?;
                params.remove(0);
                Action::Tasker { task, params }
            }
            _ => Action::Shell(spec.to_string()),
        };

        Ok(action)
    }
}

fn split_params(value: &str) -> Vec<String> {
    let mut params: Vec<String> = value
        .split(PARAM_SEPARATOR)
        .map(|p| p.trim().to_string())
        .collect();
    while params.last().is_some_and(|p| p.is_empty()) {
        params.pop();
    }
    params
}

fn first_param(action: &'static str, params: &[String]) -> Result<String, ActionError> {
    match params.first() {
        Some(p) if !p.is_empty() => Ok(p.clone()),
        _ => Err(ActionError::InvalidArgument {
            action,
            value: String::new(),
        }),
    }
}

fn parse_direction(value: &str) -> Result<VolumeDirection, ActionError> {
    match value.to_ascii_uppercase().as_str() {
        "UP" => Ok(VolumeDirection::Up),
        "DOWN" => Ok(VolumeDirection::Down),
        _ => Err(ActionError::InvalidArgument {
            action: "VOLUME",
            value: value.to_string(),
        }),
    }
}

/// Carries out actions on the host
#[async_trait]
pub trait ActionPerformer: Send + Sync {
    /// Perform one action string
    async fn perform_action(&self, spec: &str) -> Result<(), ActionError>;

    /// Raise a user-visible alert
    fn alert(&self, text: &str) {
        warn!("ALERT: {}", text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_command_is_shell() {
        assert_eq!(
            Action::parse("am start -n com.example/.Main").unwrap(),
            Action::Shell("am start -n com.example/.Main".to_string())
        );
    }

    #[test]
    fn test_unknown_prefix_is_shell() {
        assert_eq!(
            Action::parse("*REBOOT=now").unwrap(),
            Action::Shell("*REBOOT=now".to_string())
        );
        assert_eq!(Action::parse("*ALERT").unwrap(), Action::Shell("*ALERT".to_string()));
    }

    #[test]
    fn test_volume() {
        assert_eq!(
            Action::parse("*VOLUME=UP").unwrap(),
            Action::Volume {
                direction: VolumeDirection::Up,
                visible: true
            }
        );
        assert_eq!(
            Action::parse("*VOLUME_HIDDEN=down").unwrap(),
            Action::Volume {
                direction: VolumeDirection::Down,
                visible: false
            }
        );
        assert!(matches!(
            Action::parse("*VOLUME=SIDEWAYS"),
            Err(ActionError::InvalidArgument { action: "VOLUME", .. })
        ));
    }

    #[test]
    fn test_alert_keeps_separators() {
        assert_eq!(
            Action::parse("*ALERT=low fuel ** refill").unwrap(),
            Action::Alert("low fuel ** refill".to_string())
        );
    }

    #[test]
    fn test_buttons() {
        assert_eq!(
            Action::parse("*MEDIA_BUTTON=KEYCODE_MEDIA_NEXT").unwrap(),
            Action::MediaButton("KEYCODE_MEDIA_NEXT".to_string())
        );
        assert_eq!(
            Action::parse("*BUTTON_ROOT=24").unwrap(),
            Action::RootButton("24".to_string())
        );
        assert!(Action::parse("*MEDIA_BUTTON=").is_err());
    }

    #[test]
    fn test_intent_with_and_without_uri() {
        assert_eq!(
            Action::parse("*INTENT=android.intent.action.VIEW**geo:0,0").unwrap(),
            Action::Intent {
                action: "android.intent.action.VIEW".to_string(),
                uri: Some("geo:0,0".to_string())
            }
        );
        assert_eq!(
            Action::parse("*INTENT=android.intent.action.MAIN**").unwrap(),
            Action::Intent {
                action: "android.intent.action.MAIN".to_string(),
                uri: None
            }
        );
    }

    #[test]
    fn test_tasker_params() {
        assert_eq!(
            Action::parse("*TASKER=Nav Home ** fast ** 2").unwrap(),
            Action::Tasker {
                task: "Nav Home".to_string(),
                params: vec!["fast".to_string(), "2".to_string()]
            }
        );
    }
}
